//! Synthesis context and prompts

use super::events::Source;
use super::session::InvestigationSession;
use crate::graph::Edge;
use crate::search::Candidate;
use std::collections::HashSet;

/// Longest chunk excerpt placed in the context, in characters
pub const CHUNK_EXCERPT_CHARS: usize = 1200;
const GRAPH_EVIDENCE_EDGES: usize = 30;
const KEYWORD_MATCHES: usize = 10;
const KEYWORD_EVIDENCE_CHARS: usize = 300;
const MAX_SOURCES: usize = 20;

pub const NO_CONTEXT_MESSAGE: &str = "No relevant information was found in the database for this query. \
     Try uploading documents first, or rephrase your query with more specific terms.";

const BLOCK_SEPARATOR: &str = "\n\n---\n\n";

/// Cut `text` to at most `max` characters, preferring the last sentence
/// end or line break in the second half.
pub fn truncate_at_sentence(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max).collect();
    let boundary = truncated
        .chars()
        .enumerate()
        .filter(|(_, c)| *c == '.' || *c == '\n')
        .map(|(i, _)| i)
        .last();
    match boundary {
        Some(i) if i > max / 2 => truncated.chars().take(i + 1).collect(),
        _ => truncated,
    }
}

fn chunk_block(chunk: &Candidate) -> String {
    format!(
        "[Source: {}, Page: {}]\n{}",
        chunk.filename,
        chunk.page,
        truncate_at_sentence(&chunk.text, CHUNK_EXCERPT_CHARS)
    )
}

fn graph_evidence_block(edges: &[Edge]) -> String {
    let mut block = String::from("\n\nKNOWLEDGE GRAPH EVIDENCE:\n");
    for edge in edges.iter().take(GRAPH_EVIDENCE_EDGES) {
        if edge.evidence_text.is_empty() {
            continue;
        }
        let file = if edge.source_filename.is_empty() {
            "graph"
        } else {
            &edge.source_filename
        };
        block.push_str(&format!("[Source: {file}, Relationship: {}]\n", edge.predicate));
        block.push_str(&format!(
            "{} --[{}]--> {}: {}\n\n",
            edge.source, edge.predicate, edge.target, edge.evidence_text
        ));
    }
    block
}

fn keyword_block(edges: &[Edge]) -> String {
    let mut block = String::from("\n\nKEYWORD MATCHES IN EVIDENCE:\n");
    for edge in edges.iter().take(KEYWORD_MATCHES) {
        let evidence: String = edge.evidence_text.chars().take(KEYWORD_EVIDENCE_CHARS).collect();
        block.push_str(&format!(
            "- {} --[{}]--> {}: {evidence}\n",
            edge.source, edge.predicate, edge.target
        ));
    }
    block
}

/// Evidence blocks in context order; empty when nothing was found
pub fn evidence_blocks(session: &InvestigationSession) -> Vec<String> {
    let mut blocks = Vec::new();
    if let Some(narrative) = &session.connection_narrative {
        blocks.push(format!("\n\nGRAPH CONNECTIONS FOUND:\n{narrative}\n"));
    }
    blocks.extend(session.pool.chunks().iter().map(chunk_block));
    if !session.graph_evidence.is_empty() {
        blocks.push(graph_evidence_block(&session.graph_evidence));
    }
    if let Some(intel) = &session.intel {
        blocks.push(intel.profile_block());
    }
    if !session.keyword_matches.is_empty() {
        blocks.push(keyword_block(&session.keyword_matches));
    }
    blocks
}

/// Full synthesis context, or `None` when no phase produced evidence.
///
/// Phase failures are listed in a trailing data-gaps section so the report
/// can caveat its findings.
pub fn build_context(session: &InvestigationSession) -> Option<String> {
    let blocks = evidence_blocks(session);
    if blocks.iter().all(|b| b.trim().is_empty()) {
        return None;
    }
    let mut context = blocks.join(BLOCK_SEPARATOR);
    if !session.errors_log.is_empty() {
        context.push_str(
            "\n\nDATA GAPS (some pipeline phases failed, caveat findings accordingly):\n",
        );
        for error in &session.errors_log {
            context.push_str(&format!("- {error}\n"));
        }
    }
    Some(context)
}

pub fn synthesis_prompt(context: &str, query: &str) -> String {
    let sections = "Write a thorough investigative report with these sections:\n\
         ## Executive Summary\nBrief overview of key findings.\n\n\
         ## Key Connections\nImportant relationships and links discovered.\n\n\
         ## Document Evidence\nSpecific evidence from source documents with citations [Source: filename].\n\n\
         ## Timeline\nChronological events if dates are available.\n\n\
         ## Assessment\nAnalytical assessment of the findings.\n\n\
         Cite sources using [Source: filename] tags. Be thorough but precise.";
    format!(
        "You are an elite investigative intelligence analyst writing a comprehensive investigative report.\n\n\
         CONTEXT (documents, graph intelligence, entity profiles):\n{context}\n\n\
         INVESTIGATION QUERY: {query}\n\n\
         {sections}\n\n\
         ONLY use information from the provided context. \
         Do not fabricate information not supported by the provided context. \
         If the provided context is insufficient to fully answer the query, explicitly state what \
         information is missing rather than speculating."
    )
}

pub fn follow_up_prompt(session: &InvestigationSession, query: &str) -> String {
    let entities: Vec<String> = session.discovered_entities().into_iter().take(5).collect();
    let relationships: Vec<String> = session.discovered_relationships().into_iter().take(5).collect();
    let mut prompt = format!(
        "Based on this investigation about '{query}', suggest 3-4 specific follow-up questions \
         that would deepen the investigation. Focus on unexplored connections, missing evidence, \
         or related entities. Return JSON array of strings.\n\n\
         Key entities found: {}, {}\n\
         Relationships: {}",
        session.analysis.primary_entity,
        entities.join(", "),
        relationships.join(", ")
    );
    let findings: String = session.report.chars().take(500).collect();
    if !findings.is_empty() {
        prompt.push_str(&format!("\n\nKey findings so far:\n{findings}"));
    }
    prompt
}

/// Sources cited by the pooled chunks, one per `filename:page`
pub fn collect_sources(chunks: &[Candidate]) -> Vec<Source> {
    let mut seen = HashSet::new();
    chunks
        .iter()
        .filter(|c| seen.insert(format!("{}:{}", c.filename, c.page)))
        .take(MAX_SOURCES)
        .map(|c| Source {
            filename: c.filename.clone(),
            page: c.page.clone(),
            score: (f64::from(c.score) * 1000.0).round() / 1000.0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::investigate::QueryAnalysis;
    use crate::search::PageRef;

    fn chunk(text: &str, filename: &str, page: i64) -> Candidate {
        Candidate {
            text: text.to_string(),
            filename: filename.to_string(),
            page: PageRef::Number(page),
            score: 0.87654,
        }
    }

    #[test]
    fn truncation_prefers_late_sentence_boundary() {
        let text = format!("{}. {}", "a".repeat(80), "b".repeat(50));
        assert_eq!(truncate_at_sentence(&text, 100), format!("{}.", "a".repeat(80)));

        let early = format!("{}. {}", "a".repeat(10), "b".repeat(200));
        assert_eq!(truncate_at_sentence(&early, 100).chars().count(), 100);
        assert_eq!(truncate_at_sentence("short.", 100), "short.");
    }

    #[test]
    fn empty_session_has_no_context() {
        let mut session = InvestigationSession::new("q", QueryAnalysis::default());
        assert!(build_context(&session).is_none());

        // Errors alone are not evidence
        session.errors_log.push("Semantic Search: 1 pass(es) failed".into());
        assert!(build_context(&session).is_none());
    }

    #[test]
    fn narrative_leads_and_gaps_trail() {
        let mut session = InvestigationSession::new("q", QueryAnalysis::default());
        session.pool.extend([chunk("Wire sent to Acme.", "bank.pdf", 2)]);
        session.connection_narrative = Some("Path 1: Acme Corp --[employed_by]--> John Smith".into());
        session.errors_log.push("Keyword Search: timeout".into());

        let context = build_context(&session).unwrap();
        let narrative = context.find("GRAPH CONNECTIONS FOUND").unwrap();
        let document = context.find("[Source: bank.pdf, Page: 2]").unwrap();
        assert!(narrative < document);
        assert!(context.contains("\n\n---\n\n"));
        assert!(context.trim_end().ends_with("- Keyword Search: timeout"));
    }

    #[test]
    fn graph_evidence_skips_edges_without_quotes() {
        let edges = vec![
            Edge::new("john_smith", "employed_by", "acme_corp").with_evidence("Hired 1999.", "", 0),
            Edge::new("jane_doe", "knows", "john_smith"),
        ];
        let block = graph_evidence_block(&edges);
        assert!(block.contains("[Source: graph, Relationship: employed_by]"));
        assert!(block.contains("john_smith --[employed_by]--> acme_corp: Hired 1999."));
        assert!(!block.contains("knows"));
    }

    #[test]
    fn sources_dedup_by_file_and_page() {
        let chunks = vec![
            chunk("one", "a.pdf", 1),
            chunk("two", "a.pdf", 1),
            chunk("three", "a.pdf", 2),
        ];
        let sources = collect_sources(&chunks);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].score, 0.877);
    }

    #[test]
    fn synthesis_prompt_embeds_context_and_query() {
        let prompt = synthesis_prompt("CTX", "Who paid?");
        assert!(prompt.contains("CONTEXT (documents, graph intelligence, entity profiles):\nCTX\n\n"));
        assert!(prompt.contains("INVESTIGATION QUERY: Who paid?"));
        assert!(prompt.contains("## Timeline"));
    }
}
