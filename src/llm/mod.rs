//! Language-model backend seam.
//!
//! The pipeline depends on exactly two capabilities: a request/response
//! completion (keyword extraction) and a request/streaming completion
//! (answer synthesis). Keeping both behind [`ChatBackend`] lets tests
//! substitute deterministic scripted replies for the live model.

pub mod openai;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;

pub use openai::OpenAiBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// One chat completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    /// Completion budget hint; `None` leaves the provider default.
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self { messages, max_tokens: None }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Incremental text chunks from a streaming completion. Finite and one-shot:
/// regenerating an answer requires a fresh call. Dropping the stream early
/// releases the underlying network stream.
pub type TokenStream = BoxStream<'static, Result<String>>;

/// The two model calls the pipeline makes, behind one object-safe trait.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Single request/response completion; returns the full reply text.
    async fn complete(&self, request: ChatRequest) -> Result<String>;

    /// Streaming completion; yields reply text incrementally. A transport
    /// failure mid-stream surfaces as one `Err` item, after which the
    /// stream ends.
    async fn complete_stream(&self, request: ChatRequest) -> Result<TokenStream>;
}
