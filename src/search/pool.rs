//! Deduplicated evidence accumulated across search passes

use super::pass::Candidate;
use std::collections::HashSet;

/// Characters of a chunk considered when comparing for duplicates
const SIGNATURE_CHARS: usize = 500;

/// Whitespace-collapsed prefix identifying a chunk
pub fn chunk_signature(text: &str) -> String {
    let prefix: String = text.chars().take(SIGNATURE_CHARS).collect();
    prefix.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Ordered, deduplicated chunk pool
///
/// The first chunk with a given signature wins; later duplicates are
/// dropped regardless of which phase or pass produced them.
#[derive(Debug, Default)]
pub struct EvidencePool {
    chunks: Vec<Candidate>,
    seen: HashSet<String>,
}

impl EvidencePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add candidates, returning how many were new
    pub fn extend(&mut self, candidates: impl IntoIterator<Item = Candidate>) -> usize {
        let before = self.chunks.len();
        for candidate in candidates {
            if self.seen.insert(chunk_signature(&candidate.text)) {
                self.chunks.push(candidate);
            }
        }
        self.chunks.len() - before
    }

    pub fn chunks(&self) -> &[Candidate] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
