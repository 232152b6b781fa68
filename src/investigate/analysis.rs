//! Query analysis: pull named entities and search phrasing out of a
//! free-text question

use crate::model::extract_json_object;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Optional case background attached to a request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaseContext {
    pub title: String,
    pub summary: String,
    pub entities: Vec<String>,
    pub suggested_questions: Vec<String>,
}

/// Append case background to the raw query
pub fn enrich_query(query: &str, case: &CaseContext) -> String {
    let mut parts = vec![query.to_string()];
    if !case.summary.is_empty() {
        parts.push(format!("Case background: {}", case.summary));
    }
    if !case.entities.is_empty() {
        let entities: Vec<&str> = case.entities.iter().take(10).map(String::as_str).collect();
        parts.push(format!("Key entities: {}", entities.join(", ")));
    }
    if !case.suggested_questions.is_empty() {
        let angles: Vec<&str> = case
            .suggested_questions
            .iter()
            .take(4)
            .map(String::as_str)
            .collect();
        parts.push(format!("Investigation angles: {}", angles.join("; ")));
    }
    parts.join("\n")
}

/// Structured reading of the query
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryAnalysis {
    /// Empty unless the query names a specific person, organization or place
    pub primary_entity: String,
    pub secondary_entities: Vec<String>,
    pub key_terms: Vec<String>,
    pub reformulated_queries: Vec<String>,
}

pub fn analysis_prompt(query: &str) -> String {
    format!(
        "You are an investigative intelligence analyst. Analyze this query and extract structured information.\n\n\
         RULES:\n\
         - \"primary_entity\" MUST be a specific named person, organization, or location mentioned in the query. \
         Generic words like 'network', 'individuals', 'transactions', 'documents' are NOT entities. \
         If the query does not mention a specific named entity, set primary_entity to an empty string.\n\
         - \"secondary_entities\": other specific named entities mentioned or implied (list of strings, empty if none)\n\
         - \"key_terms\": important search terms and phrases for document retrieval (list of strings)\n\
         - \"reformulated_queries\": 2-3 alternative phrasings to find relevant documents (list of strings)\n\n\
         Query: {query}\n\n\
         Return JSON only."
    )
}

fn string_list(map: &Map<String, Value>, key: &str) -> Vec<String> {
    match map.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

impl QueryAnalysis {
    /// Parse the model's reply; `None` when no JSON object can be found
    pub fn parse(reply: &str) -> Option<Self> {
        let map = extract_json_object(reply)?;
        Some(Self {
            primary_entity: map
                .get("primary_entity")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string(),
            secondary_entities: string_list(&map, "secondary_entities"),
            key_terms: string_list(&map, "key_terms"),
            reformulated_queries: string_list(&map, "reformulated_queries"),
        })
    }

    /// The raw query as the only key term
    pub fn fallback(query: &str) -> Self {
        Self {
            key_terms: vec![query.trim().to_string()],
            ..Self::default()
        }
    }

    pub fn has_entity(&self) -> bool {
        !self.primary_entity.is_empty()
    }

    /// Progress detail for a successful analysis
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if self.has_entity() {
            parts.push(format!("Primary: {}", self.primary_entity));
        }
        if !self.secondary_entities.is_empty() {
            parts.push(format!("+{} entities", self.secondary_entities.len()));
        }
        if parts.is_empty() {
            parts.push("General query, using semantic search".to_string());
        }
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_reply_and_skips_non_strings() {
        let reply = "```json\n{\"primary_entity\": \" Acme Corp \", \"secondary_entities\": [\"John Smith\", 4, \"\"], \
                     \"key_terms\": [\"payroll\"], \"reformulated_queries\": [\"Acme payroll records\"]}\n```";
        let analysis = QueryAnalysis::parse(reply).unwrap();
        assert_eq!(analysis.primary_entity, "Acme Corp");
        assert_eq!(analysis.secondary_entities, vec!["John Smith"]);
        assert_eq!(analysis.summary(), "Primary: Acme Corp, +1 entities");
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let analysis = QueryAnalysis::parse("{}").unwrap();
        assert!(!analysis.has_entity());
        assert_eq!(analysis.summary(), "General query, using semantic search");
        assert!(QueryAnalysis::parse("I cannot help with that").is_none());
    }

    #[test]
    fn fallback_uses_raw_query_as_key_term() {
        let analysis = QueryAnalysis::fallback("  flight logs 2002 ");
        assert_eq!(analysis.key_terms, vec!["flight logs 2002"]);
        assert!(analysis.reformulated_queries.is_empty());
    }

    #[test]
    fn enrichment_caps_entities_and_angles() {
        let case = CaseContext {
            title: "Case 7".into(),
            summary: "Shell companies".into(),
            entities: (0..12).map(|i| format!("E{i}")).collect(),
            suggested_questions: (0..6).map(|i| format!("Q{i}")).collect(),
        };
        let enriched = enrich_query("Who paid?", &case);
        let lines: Vec<&str> = enriched.lines().collect();
        assert_eq!(lines[0], "Who paid?");
        assert_eq!(lines[1], "Case background: Shell companies");
        assert!(lines[2].ends_with("E8, E9"));
        assert_eq!(lines[3], "Investigation angles: Q0; Q1; Q2; Q3");
    }

    #[test]
    fn empty_case_leaves_query_untouched() {
        assert_eq!(enrich_query("Who paid?", &CaseContext::default()), "Who paid?");
    }
}
