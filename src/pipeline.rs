//! Pipeline orchestration: extract keywords, filter the dataset, synthesize
//! the answer.
//!
//! One call per user turn, strictly sequential (the synthesis call depends
//! on the filtered output of the extraction call). The filtered rows are
//! fully materialized before the answer stream starts emitting, and rows and
//! stream are independently consumable by the caller.

use std::sync::Arc;

use tracing::info;

use crate::dataset::StudyDataset;
use crate::extractor::KeywordExtractor;
use crate::filter;
use crate::llm::ChatBackend;
use crate::models::{ConversationTurn, ReasoningMode, StudyRecord, UiFilters};
use crate::synthesizer::{AnswerStream, ResultSynthesizer, SynthesisInput};

/// One user turn, with all of its context passed explicitly.
#[derive(Debug, Clone, Default)]
pub struct ChatTurnRequest {
    pub query: String,
    pub ui_filters: UiFilters,
    pub history: Vec<ConversationTurn>,
    pub mode: ReasoningMode,
    /// Therapeutic-area scope the caller has active, if any.
    pub area_scope: Option<String>,
    /// Latest cached background report for that scope, if one exists.
    pub background_report: Option<String>,
}

/// The pipeline's output: rows for tabular display plus the streamed answer.
pub struct ChatReply {
    pub rows: Vec<StudyRecord>,
    pub answer: AnswerStream,
}

/// The assembled pipeline. Holds no dataset state: the dataset is an
/// argument per call, so concurrent requests can share one read-only copy.
pub struct AssistantPipeline {
    extractor: KeywordExtractor,
    synthesizer: ResultSynthesizer,
}

impl AssistantPipeline {
    pub fn new(backend: Arc<dyn ChatBackend>, conference_year: i32) -> Self {
        Self {
            extractor: KeywordExtractor::new(backend.clone(), conference_year),
            synthesizer: ResultSynthesizer::new(backend),
        }
    }

    /// Runs one full turn: keyword extraction, filtering (skipped for an
    /// empty bundle, which forces an empty row set), then synthesis over
    /// whatever rows resulted.
    pub async fn chat(&self, dataset: &StudyDataset, request: ChatTurnRequest) -> ChatReply {
        let bundle = self
            .extractor
            .extract(&request.query, dataset.len(), &request.ui_filters, &request.history)
            .await;

        let rows = if bundle.is_empty() {
            info!("no entities extracted, answering without data evidence");
            Vec::new()
        } else {
            let rows = filter::apply(dataset, &bundle);
            info!(matched = rows.len(), total = dataset.len(), "dataset filtered");
            rows
        };

        let answer = self
            .synthesizer
            .synthesize(SynthesisInput {
                query: &request.query,
                rows: &rows,
                dataset_size: dataset.len(),
                ui_filters: &request.ui_filters,
                bundle: &bundle,
                mode: request.mode,
                history: &request.history,
                area_scope: request.area_scope.as_deref(),
                background_report: request.background_report.as_deref(),
            })
            .await;

        ChatReply { rows, answer }
    }
}
