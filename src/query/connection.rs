//! Detection of "how is A connected to B" style questions

use regex_lite::Regex;
use std::sync::OnceLock;

const CONNECTION_PATTERNS: [&str; 5] = [
    r"(?i)how (?:is|are) (.+?) (?:connected|related|linked) to (.+?)[?.]?$",
    r"(?i)(?:connection|link|relationship) between (.+?) and (.+?)[?.]?$",
    r"(?i)what (?:connects|links|ties) (.+?) (?:to|and|with) (.+?)[?.]?$",
    r"(?i)trace (?:the )?(?:path|connection) (?:from|between) (.+?) (?:to|and) (.+?)[?.]?$",
    r"(?i)(.+?) (?:connection|relationship|link) (?:to|with) (.+?)[?.]?$",
];

fn patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        CONNECTION_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

fn clean(name: &str) -> String {
    name.trim().trim_matches(|c| c == '"' || c == '\'').to_string()
}

/// If `query` asks how two entities relate, return their names.
///
/// Patterns are tried in order; a match only counts when both names are
/// longer than one character.
pub fn detect_connection_query(query: &str) -> Option<(String, String)> {
    let query = query.trim();
    for pattern in patterns() {
        let Some(caps) = pattern.captures(query) else {
            continue;
        };
        let a = caps.get(1).map(|m| clean(m.as_str())).unwrap_or_default();
        let b = caps.get(2).map(|m| clean(m.as_str())).unwrap_or_default();
        if a.chars().count() > 1 && b.chars().count() > 1 {
            return Some((a, b));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(a: &str, b: &str) -> Option<(String, String)> {
        Some((a.to_string(), b.to_string()))
    }

    #[test]
    fn all_patterns_compile() {
        assert_eq!(patterns().len(), CONNECTION_PATTERNS.len());
    }

    #[test]
    fn detects_how_connected() {
        assert_eq!(
            detect_connection_query("How is Acme Corp connected to John Smith?"),
            pair("Acme Corp", "John Smith")
        );
    }

    #[test]
    fn detects_relationship_between() {
        assert_eq!(
            detect_connection_query("What is the relationship between \"Jane Doe\" and Globex."),
            pair("Jane Doe", "Globex")
        );
    }

    #[test]
    fn detects_what_links_and_trace() {
        assert_eq!(
            detect_connection_query("what links the foundation with Epstein"),
            pair("the foundation", "Epstein")
        );
        assert_eq!(
            detect_connection_query("Trace the path from Alpha to Omega"),
            pair("Alpha", "Omega")
        );
    }

    #[test]
    fn ignores_plain_questions_and_short_names() {
        assert_eq!(detect_connection_query("Who owns the island?"), None);
        assert_eq!(detect_connection_query("how is X connected to Y?"), None);
    }
}
