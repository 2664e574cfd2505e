//! LLM-assisted keyword extraction.
//!
//! Turns a free-form user question (plus a short conversation window and the
//! caller's active UI filters) into a structured [`KeywordBundle`]. The
//! model does the entity recognition and abbreviation expansion; this module
//! owns prompt assembly, tolerant JSON parsing, and a deterministic
//! post-pass over dates and free-text terms. Extraction never fails the
//! pipeline: any error collapses to the empty bundle.

use std::sync::Arc;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{AssistantError, Result};
use crate::llm::{ChatBackend, ChatMessage, ChatRequest};
use crate::models::{ConversationTurn, KeywordBundle, UiFilters};

/// How many recent turns reach the model.
pub(crate) const HISTORY_WINDOW: usize = 3;

const EXTRACTION_MAX_TOKENS: u32 = 800;

const EXTRACTION_PROMPT: &str = r#"You are the keyword extraction step of a congress-intelligence assistant for pharmaceutical medical affairs. From the user's message, extract the entities needed to filter a table of conference study sessions.

Respond with ONLY this JSON object, no prose, no code fences:
{
  "drug_combinations": [["drug a", "drug b"]],
  "drug_classes": [],
  "therapeutic_areas": [],
  "institutions": [],
  "dates": [],
  "speakers": [],
  "search_terms": []
}

RULES:
- drug_combinations: each inner list is a set of drugs that must ALL appear together (an AND-group); separate alternatives are separate inner lists. A single drug is a one-element group. Expand abbreviations and shorthand from your domain knowledge: "EV+P" means ["enfortumab vedotin", "pembrolizumab"], "sac-TMT" means "sacituzumab tirumotecan", and so on. Use full generic names.
- dates: rewrite every date-like token to MM/DD/YYYY. If the first numeric component is greater than 12 it is a day, so swap it with the month. If the year is missing, use {CONFERENCE_YEAR}.
- speakers: person names as given, without titles.
- institutions: hospitals, universities, cancer centers, companies.
- therapeutic_areas: disease/indication categories (e.g. "urothelial carcinoma", "NSCLC").
- search_terms: remaining specific free-text concepts worth matching. NEVER include generic words ("metastatic", "study", "data"), single letters, or therapeutic-area names already covered by the active UI filters given with the request.
- If the message is only a confirmation ("Yes", "yes please, and..."), re-derive the entities from what the assistant proposed in its PREVIOUS reply, not from the confirmation text.
- Greetings, small talk, and conceptual questions with no named entities get all fields empty. Do not invent entities.
"#;

/// Keyword extractor backed by a [`ChatBackend`].
pub struct KeywordExtractor {
    backend: Arc<dyn ChatBackend>,
    /// Year assumed for date tokens that omit one.
    conference_year: i32,
}

impl KeywordExtractor {
    pub fn new(backend: Arc<dyn ChatBackend>, conference_year: i32) -> Self {
        Self { backend, conference_year }
    }

    /// Extracts a keyword bundle for `query`. On any failure (transport,
    /// timeout, empty reply, malformed JSON) returns the empty bundle; the
    /// pipeline can still answer generically.
    pub async fn extract(
        &self,
        query: &str,
        visible_rows: usize,
        ui_filters: &UiFilters,
        history: &[ConversationTurn],
    ) -> KeywordBundle {
        match self.try_extract(query, visible_rows, ui_filters, history).await {
            Ok(bundle) => {
                info!(
                    combinations = bundle.drug_combinations.len(),
                    dates = bundle.dates.len(),
                    speakers = bundle.speakers.len(),
                    search_terms = bundle.search_terms.len(),
                    "keyword extraction complete"
                );
                bundle
            }
            Err(e) => {
                warn!(error = %e, "keyword extraction failed, continuing with empty bundle");
                KeywordBundle::default()
            }
        }
    }

    async fn try_extract(
        &self,
        query: &str,
        visible_rows: usize,
        ui_filters: &UiFilters,
        history: &[ConversationTurn],
    ) -> Result<KeywordBundle> {
        let system = EXTRACTION_PROMPT.replace("{CONFERENCE_YEAR}", &self.conference_year.to_string());

        let mut messages = vec![ChatMessage::system(system)];
        for turn in recent_turns(history) {
            messages.push(ChatMessage::user(turn.user.clone()));
            messages.push(ChatMessage::assistant(turn.assistant.clone()));
        }
        messages.push(ChatMessage::user(format!(
            "Visible dataset size: {visible_rows} sessions.\nActive UI filters: {}.\n\nUser message: {query}",
            ui_filters.describe()
        )));

        let reply = self
            .backend
            .complete(ChatRequest::new(messages).with_max_tokens(EXTRACTION_MAX_TOKENS))
            .await?;

        let mut bundle = parse_bundle(&reply)?;
        self.normalize(&mut bundle, ui_filters);
        Ok(bundle)
    }

    /// Deterministic cleanup applied regardless of how well the model
    /// followed instructions.
    fn normalize(&self, bundle: &mut KeywordBundle, ui_filters: &UiFilters) {
        for date in &mut bundle.dates {
            if let Some(normalized) = normalize_date_token(date, self.conference_year) {
                *date = normalized;
            }
        }
        bundle.drug_combinations.retain(|group| !group.is_empty());
        scrub_search_terms(&mut bundle.search_terms, ui_filters);
    }
}

fn recent_turns(history: &[ConversationTurn]) -> &[ConversationTurn] {
    let start = history.len().saturating_sub(HISTORY_WINDOW);
    &history[start..]
}

/// Locates the JSON object in the reply (models occasionally wrap it in
/// prose or fences) and deserializes it.
fn parse_bundle(reply: &str) -> Result<KeywordBundle> {
    let start = reply
        .find('{')
        .ok_or_else(|| AssistantError::Extraction("no JSON object in reply".to_string()))?;
    let end = reply
        .rfind('}')
        .ok_or_else(|| AssistantError::Extraction("unterminated JSON object in reply".to_string()))?;
    if end < start {
        return Err(AssistantError::Extraction("malformed JSON object in reply".to_string()));
    }
    let bundle = serde_json::from_str(&reply[start..=end])?;
    debug!("parsed keyword bundle from model reply");
    Ok(bundle)
}

static DATE_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d{1,4})\s*[./-]\s*(\d{1,2})(?:\s*[./-]\s*(\d{2,4}))?\s*$")
        .expect("date token pattern is valid")
});

/// Rewrites a numeric date token to canonical MM/DD/YYYY. The first
/// component is treated as day-first and swapped when it exceeds 12; a
/// missing year defaults to the conference year. Returns `None` when the
/// token is not a recognizable numeric date (it is then left as the model
/// produced it).
pub(crate) fn normalize_date_token(raw: &str, conference_year: i32) -> Option<String> {
    let captures = DATE_TOKEN.captures(raw)?;
    let first: u32 = captures.get(1)?.as_str().parse().ok()?;
    let second: u32 = captures.get(2)?.as_str().parse().ok()?;

    let (month, day) = if first > 12 { (second, first) } else { (first, second) };

    let year = match captures.get(3) {
        Some(m) => {
            let y: i32 = m.as_str().parse().ok()?;
            if y < 100 { 2000 + y } else { y }
        }
        None => conference_year,
    };

    NaiveDate::from_ymd_opt(year, month, day)?;
    Some(format!("{month:02}/{day:02}/{year}"))
}

/// Drops degenerate free-text terms: empty/single-character tokens and
/// therapeutic-area names the user already has active as UI filters.
fn scrub_search_terms(terms: &mut Vec<String>, ui_filters: &UiFilters) {
    let active_areas: Vec<String> = ui_filters
        .therapeutic_areas
        .iter()
        .map(|a| a.trim().to_lowercase())
        .collect();
    terms.retain(|term| {
        let trimmed = term.trim();
        trimmed.chars().count() > 1 && !active_areas.contains(&trimmed.to_lowercase())
    });
}
