//! Casegraph CLI: investigations, path queries and graph maintenance.
//!
//! Usage:
//!   casegraph investigate "<question>" [--case-file case.yaml]
//!   casegraph paths "<entity a>" "<entity b>"
//!   casegraph resolve "<name>"
//!   casegraph dedup [--heuristic-only]
//!   casegraph import <graph.json>
//!   casegraph communities <assignments.json>

use casegraph::dedup::Deduplicator;
use casegraph::investigate::{CaseContext, InvestigationRequest, Investigator};
use casegraph::model::{OpenAiModel, TextModel};
use casegraph::query::{find_paths_narrative, resolve_match};
use casegraph::{
    CancellationToken, Collaborators, CommunityAssignment, Config, GraphSnapshot, GraphStore,
    OpenStore, RecordStore, SqliteStore,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "casegraph",
    version,
    about = "Investigative knowledge graph and research pipeline"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to SQLite database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// YAML config file; environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an investigation and print its event stream as SSE frames
    Investigate {
        /// Free-text question
        query: String,
        /// YAML file with case background (title, summary, entities, suggested_questions)
        #[arg(long)]
        case_file: Option<PathBuf>,
    },
    /// Describe how two entities are connected
    Paths {
        entity_a: String,
        entity_b: String,
    },
    /// Show which entity a name resolves to
    Resolve {
        name: String,
    },
    /// Merge duplicate entities
    Dedup {
        /// Skip the model-assisted pass
        #[arg(long)]
        heuristic_only: bool,
    },
    /// Upsert nodes and edges from a graph JSON file
    Import {
        #[arg(required = true)]
        path: PathBuf,
    },
    /// Stamp community assignments from a JSON file onto nodes
    Communities {
        #[arg(required = true)]
        path: PathBuf,
    },
}

fn load_config(path: Option<&Path>, db: Option<PathBuf>) -> Result<Config, String> {
    let mut config = Config::load(path).map_err(|e| e.to_string())?;
    if let Some(db) = db {
        config.store.path = Some(db);
    }
    Ok(config)
}

fn open_store(config: &Config) -> Result<Arc<SqliteStore>, String> {
    let path = config.store.resolved_path();
    SqliteStore::open(&path)
        .map(Arc::new)
        .map_err(|e| format!("Failed to open database {}: {}", path.display(), e))
}

fn runtime() -> Result<tokio::runtime::Runtime, String> {
    tokio::runtime::Runtime::new().map_err(|e| format!("failed to create tokio runtime: {}", e))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    serde_json::from_str(&text).map_err(|e| format!("Invalid JSON in {}: {}", path.display(), e))
}

fn cmd_investigate(config: &Config, query: String, case_file: Option<&Path>) -> i32 {
    let mut request = InvestigationRequest::new(query);
    if let Some(path) = case_file {
        let case: CaseContext = match std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_yaml::from_str(&text).map_err(|e| e.to_string()))
        {
            Ok(case) => case,
            Err(e) => {
                eprintln!("Error: invalid case file {}: {}", path.display(), e);
                return 1;
            }
        };
        request = request.with_case(case);
    }

    let collaborators = match Collaborators::from_config(config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let rt = match runtime() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}", e);
            return 1;
        }
    };

    let investigator = Investigator::new(collaborators, config.investigation.clone());
    rt.block_on(async move {
        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, cancelling");
                on_interrupt.cancel();
            }
        });

        let mut events = investigator.start(request, cancel);
        while let Some(event) = events.recv().await {
            match event.to_sse() {
                Ok(frame) => print!("{}", frame),
                Err(e) => tracing::error!(error = %e, "failed to encode event"),
            }
            if event.is_done() {
                break;
            }
        }
    });
    0
}

fn cmd_paths(store: &SqliteStore, entity_a: &str, entity_b: &str) -> i32 {
    match store.load() {
        Ok(graph) => {
            println!("{}", find_paths_narrative(&graph, entity_a, entity_b));
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_resolve(store: &SqliteStore, name: &str) -> i32 {
    let graph = match store.load() {
        Ok(g) => g,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match resolve_match(&graph.nodes, name) {
        Some(m) => {
            println!(
                "{} ({}, {}) via {:?} match",
                m.node.label,
                m.node.id,
                m.node.entity_type.as_str(),
                m.kind
            );
            0
        }
        None => {
            eprintln!("No entity matches '{}'", name);
            1
        }
    }
}

fn cmd_dedup(config: &Config, store: Arc<SqliteStore>, heuristic_only: bool) -> i32 {
    let model: Option<Arc<dyn TextModel>> = match (&config.model.base_url, heuristic_only) {
        (Some(url), false) => Some(Arc::new(OpenAiModel::new(url.as_str(), &config.model))),
        (None, false) => {
            eprintln!("Warning: no model configured, running heuristic pass only");
            None
        }
        (_, true) => None,
    };
    let rt = match runtime() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}", e);
            return 1;
        }
    };

    let records: Arc<dyn RecordStore> = store;
    let dedup = Deduplicator::new(records, config.dedup.clone()).with_model(model);
    match rt.block_on(dedup.run()) {
        Ok(report) => {
            println!(
                "Merged {} entities ({} by label, {} by model), removed {} edges, rewrote {}",
                report.merged,
                report.heuristic_merges,
                report.semantic_merges,
                report.removed_edges,
                report.rewritten_edges
            );
            if report.failed_batches > 0 {
                eprintln!("Warning: {} model batches failed", report.failed_batches);
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_import(store: &SqliteStore, path: &Path) -> i32 {
    let mut graph: GraphSnapshot = match read_json(path) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    graph.circular_layout();
    match store.add_elements(&graph.nodes, &graph.edges) {
        Ok(report) => {
            println!(
                "Imported {} nodes and {} edges",
                report.nodes_upserted, report.edges_upserted
            );
            if report.edges_rejected > 0 {
                eprintln!(
                    "Warning: skipped {} self-loops or dangling edges",
                    report.edges_rejected
                );
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_communities(store: &SqliteStore, path: &Path) -> i32 {
    let assignments: Vec<CommunityAssignment> = match read_json(path) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match store.apply_communities(&assignments) {
        Ok(n) => {
            println!("Assigned {} communities to {} nodes", assignments.len(), n);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match load_config(cli.config.as_deref(), cli.db) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let code = match cli.command {
        Commands::Investigate { query, case_file } => {
            cmd_investigate(&config, query, case_file.as_deref())
        }
        command => {
            let store = match open_store(&config) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            };
            match command {
                Commands::Paths { entity_a, entity_b } => cmd_paths(&store, &entity_a, &entity_b),
                Commands::Resolve { name } => cmd_resolve(&store, &name),
                Commands::Dedup { heuristic_only } => cmd_dedup(&config, store, heuristic_only),
                Commands::Import { path } => cmd_import(&store, &path),
                Commands::Communities { path } => cmd_communities(&store, &path),
                Commands::Investigate { .. } => unreachable!(),
            }
        }
    };
    std::process::exit(code);
}
