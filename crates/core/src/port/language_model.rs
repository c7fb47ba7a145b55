// Language Model Port
// The model is an external collaborator; the engine only drives the tool-call contract.

use crate::domain::{JobId, Message};
use async_trait::async_trait;
use thiserror::Error;

/// What the model wants next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelTurn {
    /// Final assistant reply
    Final(String),
    /// Run the retrieval tool and call back with its result
    Retrieve { query: String, top_k: Option<usize> },
}

/// One model invocation
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub job_id: &'a JobId,
    pub agent_id: &'a str,
    pub messages: &'a [Message],
    /// False on the last permitted round; the model must answer directly
    pub tools_enabled: bool,
}

/// Model errors
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model unavailable: {0}")]
    Unavailable(String),

    #[error("Model rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Malformed model response: {0}")]
    Malformed(String),
}

/// Language model collaborator
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Ask the model for its next turn given the conversation so far
    async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelTurn, ModelError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::domain::Role;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted reply
    #[derive(Debug, Clone)]
    pub enum MockTurn {
        Final(String),
        Retrieve(String),
        Fail(String),
        Panic(String),
    }

    /// Plays back a script, then echoes the last user message
    pub struct ScriptedModel {
        script: Mutex<VecDeque<MockTurn>>,
        calls: Mutex<Vec<(usize, bool)>>,
    }

    impl ScriptedModel {
        pub fn new(script: impl IntoIterator<Item = MockTurn>) -> Self {
            Self {
                script: Mutex::new(script.into_iter().collect()),
                calls: Mutex::new(Vec::new()),
            }
        }

        /// Always echoes; never requests tools
        pub fn echo() -> Self {
            Self::new(Vec::new())
        }

        /// Always asks for retrieval
        pub fn always_retrieve(query: &str, times: usize) -> Self {
            Self::new((0..times).map(|_| MockTurn::Retrieve(query.to_string())))
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
        }

        /// `(message_count, tools_enabled)` per call
        pub fn calls(&self) -> Vec<(usize, bool)> {
            self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelTurn, ModelError> {
            self.calls
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push((request.messages.len(), request.tools_enabled));

            let next = self
                .script
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front();

            match next {
                Some(MockTurn::Final(text)) => Ok(ModelTurn::Final(text)),
                Some(MockTurn::Retrieve(query)) => Ok(ModelTurn::Retrieve { query, top_k: None }),
                Some(MockTurn::Fail(msg)) => Err(ModelError::Unavailable(msg)),
                Some(MockTurn::Panic(msg)) => panic!("{}", msg),
                None => {
                    let last_user = request
                        .messages
                        .iter()
                        .rev()
                        .find(|m| m.role == Role::User)
                        .map(|m| m.content.as_str())
                        .unwrap_or("(no input)");
                    Ok(ModelTurn::Final(format!("echo: {}", last_user)))
                }
            }
        }
    }
}
