//! Streaming chat client and response fan-out

mod openai;
mod tee;

pub use openai::OpenAiChat;
pub use tee::{ResponseTee, TeeReader};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;

use crate::Result;

/// One ordered unit of a streamed response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseFragment {
    /// A text delta
    Text(String),

    /// Terminal tool-invocation descriptor; no further text follows
    ToolCall {
        /// Tool name as reported by the model
        name: String,
        /// JSON-encoded arguments, concatenated from deltas
        arguments: String,
    },
}

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of the running conversation transcript
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Lazy, single-pass sequence of response fragments
pub type ResponseStream = BoxStream<'static, Result<ResponseFragment>>;

/// Text-generation client
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Request a streamed completion for the conversation so far
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be started; mid-stream
    /// failures surface as an `Err` item terminating the stream
    async fn generate(&self, history: &[ChatMessage]) -> Result<ResponseStream>;
}
