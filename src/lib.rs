//! Conference-intelligence chat assistant for pharmaceutical medical
//! affairs: natural-language questions against an in-memory table of
//! congress study sessions, answered with a streamed conversational reply
//! plus the filtered rows for tabular display.
//!
//! The pipeline is query -> keyword extraction (LLM) -> deterministic
//! multi-stage filtering -> answer synthesis (LLM, streamed). The language
//! model sits behind [`ChatBackend`] so the deterministic parts stay fully
//! testable.

pub mod dataset;
pub mod error;
pub mod extractor;
pub mod filter;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod synthesizer;

// Re-export commonly used types
pub use dataset::StudyDataset;
pub use error::{AssistantError, Result};
pub use extractor::KeywordExtractor;
pub use llm::{ChatBackend, ChatMessage, ChatRequest, ChatRole, OpenAiBackend, TokenStream};
pub use models::{ConversationTurn, KeywordBundle, ReasoningMode, StudyRecord, UiFilters};
pub use pipeline::{AssistantPipeline, ChatReply, ChatTurnRequest};
pub use synthesizer::{AnswerStream, ResultSynthesizer, SynthesisInput};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedBackend;
    use futures::StreamExt;
    use std::sync::Arc;

    #[tokio::test]
    async fn pipeline_smoke_test() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .with_completion(r#"{"speakers": ["Thomas Powles"]}"#)
                .with_chunks(vec![Ok("Thomas Powles presents one session.".to_string())]),
        );
        let pipeline = AssistantPipeline::new(backend, 2025);

        let dataset = StudyDataset::new(vec![StudyRecord {
            id: "1".to_string(),
            title: "EV-302 final analysis".to_string(),
            session_type: "Oral".to_string(),
            theme: "GU Cancers".to_string(),
            date: "10/18/2025".to_string(),
            time: "10:30".to_string(),
            room: "Hall A".to_string(),
            speakers: "Thomas Powles".to_string(),
            affiliation: "Barts Cancer Institute".to_string(),
            speaker_location: None,
            abstract_text: None,
            search_text: None,
        }])
        .with_computed_search_text();

        let reply = pipeline
            .chat(
                &dataset,
                ChatTurnRequest {
                    query: "what is Powles presenting?".to_string(),
                    ..Default::default()
                },
            )
            .await;

        assert_eq!(reply.rows.len(), 1);
        let answer: String = reply.answer.collect::<Vec<_>>().await.concat();
        assert!(answer.contains("Powles"));
    }
}
