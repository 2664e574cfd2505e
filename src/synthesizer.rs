//! Answer synthesis over the filtered rows.
//!
//! Builds the second model call of the pipeline: the filtered session rows
//! (budgeted to fit the context window), the conversation window, the active
//! therapeutic-area scope and any cached background report all go into the
//! prompt, and the answer comes back as a lazy, finite, one-shot stream of
//! text fragments. Transport failures surface as one visible trailing
//! fragment; they are the only user-visible failure mode in the pipeline.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tracing::{info, warn};

use crate::llm::{ChatBackend, ChatMessage, ChatRequest};
use crate::models::{ConversationTurn, KeywordBundle, ReasoningMode, StudyRecord, UiFilters};

/// Streamed answer fragments. Finite and one-shot: regenerating requires a
/// fresh synthesis call. Errors are already rendered into the final
/// fragment, so consumers only ever see text.
pub type AnswerStream = BoxStream<'static, String>;

/// Character budget for the rendered rows section of the prompt. Rows past
/// the budget collapse into a single "...and N more" line.
const MAX_ROWS_PROMPT_CHARS: usize = 24_000;

const STANDARD_MAX_TOKENS: u32 = 1_024;
const DEEP_THINKING_MAX_TOKENS: u32 = 4_096;

const SYNTHESIS_PROMPT: &str = r#"You are a congress-intelligence assistant for a pharmaceutical medical-affairs team, answering questions about conference study sessions.

HOW TO ANSWER:
- Answer the user's question directly first; only afterwards point to the supporting sessions. Roughly 70% of your reply should address the question itself and 30% should cite the evidence.
- When matching sessions are provided, ground every claim about the conference in them and reference sessions by title. Never invent sessions, speakers, or dates.
- When no sessions are provided, answer from general pharmaceutical and medical knowledge, and say that no matching sessions were found if the user asked about the data.
- Greetings and small talk get a brief, natural reply.
- If the question is outside the pharmaceutical/medical domain, politely decline and steer back to the conference data.
"#;

const STANDARD_STYLE: &str =
    "Keep the reply focused and reasonably brief; expand only where the data demands it.";

const DEEP_THINKING_STYLE: &str = "Reason through the data thoroughly before concluding: compare the matching sessions, note patterns across dates, institutions and therapeutic areas, and call out caveats or gaps. A longer, structured reply is expected.";

/// Everything the synthesizer needs for one answer. All context is passed
/// explicitly; nothing is read from ambient state.
pub struct SynthesisInput<'a> {
    pub query: &'a str,
    pub rows: &'a [StudyRecord],
    pub dataset_size: usize,
    pub ui_filters: &'a UiFilters,
    pub bundle: &'a KeywordBundle,
    pub mode: ReasoningMode,
    pub history: &'a [ConversationTurn],
    pub area_scope: Option<&'a str>,
    pub background_report: Option<&'a str>,
}

pub struct ResultSynthesizer {
    backend: Arc<dyn ChatBackend>,
}

impl ResultSynthesizer {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }

    /// Produces the answer stream for the given input. Never returns an
    /// error: a failed stream connection becomes a single-fragment stream
    /// carrying the error notice.
    pub async fn synthesize(&self, input: SynthesisInput<'_>) -> AnswerStream {
        info!(
            rows = input.rows.len(),
            dataset_size = input.dataset_size,
            mode = ?input.mode,
            "starting answer synthesis"
        );

        let request = build_request(&input);
        match self.backend.complete_stream(request).await {
            Ok(stream) => stream
                .map(|fragment| match fragment {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "answer stream broke mid-flight");
                        error_fragment(&e.to_string())
                    }
                })
                .boxed(),
            Err(e) => {
                warn!(error = %e, "answer stream could not be opened");
                stream::iter(vec![error_fragment(&e.to_string())]).boxed()
            }
        }
    }
}

fn error_fragment(detail: &str) -> String {
    format!("\n\n[The assistant could not finish this answer: {detail}]")
}

fn build_request(input: &SynthesisInput<'_>) -> ChatRequest {
    let (style, max_tokens) = match input.mode {
        ReasoningMode::Standard => (STANDARD_STYLE, STANDARD_MAX_TOKENS),
        ReasoningMode::DeepThinking => (DEEP_THINKING_STYLE, DEEP_THINKING_MAX_TOKENS),
    };

    let mut system = String::from(SYNTHESIS_PROMPT);
    system.push('\n');
    system.push_str(style);
    if let Some(scope) = input.area_scope {
        system.push_str(&format!("\n\nActive therapeutic-area scope: {scope}."));
    }
    if let Some(report) = input.background_report {
        system.push_str(&format!(
            "\n\nBackground report for the active scope (use as context, do not repeat verbatim):\n{report}"
        ));
    }

    let mut messages = vec![ChatMessage::system(system)];
    for turn in recent_turns(input.history) {
        messages.push(ChatMessage::user(turn.user.clone()));
        messages.push(ChatMessage::assistant(turn.assistant.clone()));
    }
    messages.push(ChatMessage::user(render_user_message(input)));

    ChatRequest::new(messages).with_max_tokens(max_tokens)
}

fn recent_turns(history: &[ConversationTurn]) -> &[ConversationTurn] {
    let start = history.len().saturating_sub(crate::extractor::HISTORY_WINDOW);
    &history[start..]
}

fn render_user_message(input: &SynthesisInput<'_>) -> String {
    let mut message = format!(
        "Dataset: {} sessions visible. Active UI filters: {}.\n",
        input.dataset_size,
        input.ui_filters.describe()
    );

    if !input.bundle.is_empty() {
        message.push_str(&format!(
            "Extracted filter keywords: {}.\n",
            summarize_bundle(input.bundle)
        ));
    }

    if input.rows.is_empty() {
        message.push_str("Matching sessions: none.\n");
    } else {
        message.push_str(&format!(
            "Matching sessions ({} total):\n{}",
            input.rows.len(),
            render_rows(input.rows)
        ));
    }

    message.push_str(&format!("\nUser question: {}", input.query));
    message
}

fn summarize_bundle(bundle: &KeywordBundle) -> String {
    let mut parts = Vec::new();
    if !bundle.drug_combinations.is_empty() {
        let groups: Vec<String> = bundle
            .drug_combinations
            .iter()
            .map(|group| group.join(" + "))
            .collect();
        parts.push(format!("drugs [{}]", groups.join(" OR ")));
    }
    if !bundle.drug_classes.is_empty() {
        parts.push(format!("classes [{}]", bundle.drug_classes.join(", ")));
    }
    if !bundle.therapeutic_areas.is_empty() {
        parts.push(format!("areas [{}]", bundle.therapeutic_areas.join(", ")));
    }
    if !bundle.institutions.is_empty() {
        parts.push(format!("institutions [{}]", bundle.institutions.join(", ")));
    }
    if !bundle.dates.is_empty() {
        parts.push(format!("dates [{}]", bundle.dates.join(", ")));
    }
    if !bundle.speakers.is_empty() {
        parts.push(format!("speakers [{}]", bundle.speakers.join(", ")));
    }
    if !bundle.search_terms.is_empty() {
        parts.push(format!("terms [{}]", bundle.search_terms.join(", ")));
    }
    parts.join("; ")
}

/// Renders rows into the prompt up to [`MAX_ROWS_PROMPT_CHARS`]; the rest is
/// summarized as a count so large result sets cannot blow the context
/// window.
fn render_rows(rows: &[StudyRecord]) -> String {
    let mut out = String::new();
    let mut shown = 0usize;

    for (index, row) in rows.iter().enumerate() {
        let mut line = format!(
            "{}. {} | {} {} | {} | {} | speakers: {} | {}",
            index + 1,
            row.title,
            row.date,
            row.time,
            row.session_type,
            row.theme,
            row.speakers,
            row.affiliation
        );
        if let Some(location) = &row.speaker_location {
            line.push_str(&format!(" ({location})"));
        }
        line.push('\n');

        if out.len() + line.len() > MAX_ROWS_PROMPT_CHARS {
            break;
        }
        out.push_str(&line);
        shown += 1;
    }

    if shown < rows.len() {
        out.push_str(&format!(
            "...and {} more matching sessions not shown.\n",
            rows.len() - shown
        ));
    }
    out
}
