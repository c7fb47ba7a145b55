// Vector Retrieval Tool Port
// Adapter over an external vector index: read-only, deterministic per index snapshot.

use crate::domain::RetrievalResult;
use async_trait::async_trait;
use thiserror::Error;

/// Retrieval errors
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Retrieval unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed retrieval response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait RetrievalTool: Send + Sync {
    /// Return the `top_k` passages most similar to `text`
    ///
    /// # Errors
    /// - RetrievalError::Unavailable if the index cannot be reached
    async fn query(&self, text: &str, top_k: usize) -> Result<RetrievalResult, RetrievalError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::domain::Passage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Fixed corpus ranked per query; optionally always unavailable
    pub struct StaticRetrievalTool {
        passages: Vec<Passage>,
        unavailable: bool,
        calls: AtomicUsize,
        queries: Mutex<Vec<String>>,
    }

    impl StaticRetrievalTool {
        pub fn new(passages: Vec<Passage>) -> Self {
            Self {
                passages,
                unavailable: false,
                calls: AtomicUsize::new(0),
                queries: Mutex::new(Vec::new()),
            }
        }

        pub fn unavailable() -> Self {
            Self {
                unavailable: true,
                ..Self::new(Vec::new())
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn queries(&self) -> Vec<String> {
            self.queries.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }
    }

    #[async_trait]
    impl RetrievalTool for StaticRetrievalTool {
        async fn query(
            &self,
            text: &str,
            top_k: usize,
        ) -> Result<RetrievalResult, RetrievalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.queries
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(text.to_string());

            if self.unavailable {
                return Err(RetrievalError::Unavailable(
                    "index connection refused".to_string(),
                ));
            }
            Ok(RetrievalResult::ranked(self.passages.clone(), top_k))
        }
    }
}
