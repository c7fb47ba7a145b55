// Retrieval Domain Model - ranked passages, never persisted

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Lowest comparable similarity score
pub const MIN_SCORE: f32 = 0.0;
/// Highest comparable similarity score
pub const MAX_SCORE: f32 = 1.0;

/// One passage returned by the vector index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub passage_id: String,
    pub text: String,
    pub score: f32,
}

/// Passages ordered by descending score, ties broken by ascending `passage_id`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    passages: Vec<Passage>,
}

impl RetrievalResult {
    /// Normalize raw index hits: drop non-finite scores, clamp into
    /// `[MIN_SCORE, MAX_SCORE]`, sort, and keep the best `top_k`.
    pub fn ranked(passages: impl IntoIterator<Item = Passage>, top_k: usize) -> Self {
        let mut passages: Vec<Passage> = passages
            .into_iter()
            .filter(|p| p.score.is_finite())
            .map(|mut p| {
                p.score = p.score.clamp(MIN_SCORE, MAX_SCORE);
                p
            })
            .collect();

        passages.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.passage_id.cmp(&b.passage_id))
        });
        passages.truncate(top_k);

        Self { passages }
    }

    pub fn passages(&self) -> &[Passage] {
        &self.passages
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    /// Render as the content of a `tool` message
    pub fn to_tool_content(&self, query: &str) -> String {
        serde_json::json!({
            "tool": "retrieval",
            "query": query,
            "passages": self.passages,
        })
        .to_string()
    }
}
