use thiserror::Error;

/// Errors produced by the assistant pipeline.
///
/// Most of these never reach the caller: extraction failures collapse to an
/// empty keyword bundle and synthesis failures are rendered as a visible
/// trailing fragment in the answer stream.
#[derive(Error, Debug)]
pub enum AssistantError {
    /// Transport-level failure talking to the language model (including
    /// request or stream timeouts).
    #[error("language model error: {0}")]
    Llm(String),

    /// The model replied, but the reply could not be turned into a keyword
    /// bundle (no JSON object, empty body, schema mismatch).
    #[error("keyword extraction error: {0}")]
    Extraction(String),

    /// The answer stream broke mid-flight.
    #[error("answer synthesis error: {0}")]
    Synthesis(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AssistantError>;
