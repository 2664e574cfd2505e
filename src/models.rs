use serde::{Deserialize, Serialize};

/// One conference session/presentation as loaded from the congress dataset.
///
/// Dates and speaker lists are free text in the source data and arrive in
/// inconsistent formats; nothing here is normalized beyond what the loader
/// already did. Records are immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyRecord {
    /// Source identifier. Not guaranteed unique or non-empty.
    pub id: String,
    pub title: String,
    pub session_type: String,
    /// Theme or track the session is filed under.
    pub theme: String,
    /// Free-text session date, e.g. "10/18/2025" or "Oct 18".
    pub date: String,
    pub time: String,
    pub room: String,
    /// Free-text speaker list, multiple names, inconsistent formatting.
    pub speakers: String,
    pub affiliation: String,
    #[serde(default)]
    pub speaker_location: Option<String>,
    #[serde(default)]
    pub abstract_text: Option<String>,
    /// Loader-provided lowercase concatenation of the text columns, used as
    /// a fast full-text field. Consumers must fall back to per-column
    /// matching when this is absent.
    #[serde(default)]
    pub search_text: Option<String>,
}

/// Structured output of the keyword extractor; drives every filter stage.
///
/// `drug_combinations` holds AND-groups: every drug in a group must appear
/// in a row for that group to match, and the groups themselves are OR'd.
/// A fully empty bundle is meaningful: it marks a greeting, an off-topic
/// message, or a conceptual question with no named entities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeywordBundle {
    #[serde(default)]
    pub drug_combinations: Vec<Vec<String>>,
    #[serde(default)]
    pub drug_classes: Vec<String>,
    #[serde(default)]
    pub therapeutic_areas: Vec<String>,
    #[serde(default)]
    pub institutions: Vec<String>,
    /// Normalized MM/DD/YYYY date strings.
    #[serde(default)]
    pub dates: Vec<String>,
    #[serde(default)]
    pub speakers: Vec<String>,
    /// Free-text terms that survived scrubbing of generic tokens.
    #[serde(default)]
    pub search_terms: Vec<String>,
}

impl KeywordBundle {
    /// True when no field carries any keyword at all.
    pub fn is_empty(&self) -> bool {
        self.drug_combinations.iter().all(|g| g.is_empty())
            && self.drug_classes.is_empty()
            && self.therapeutic_areas.is_empty()
            && self.institutions.is_empty()
            && self.dates.is_empty()
            && self.speakers.is_empty()
            && self.search_terms.is_empty()
    }
}

/// One completed user/assistant exchange, retained to support elliptical
/// follow-ups ("Yes", "broaden to bladder cancer").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub user: String,
    pub assistant: String,
}

/// Filter selections currently active in the caller's UI. Passed to both
/// model calls so the assistant does not re-extract what the user already
/// narrowed by hand.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UiFilters {
    #[serde(default)]
    pub drugs: Vec<String>,
    #[serde(default)]
    pub therapeutic_areas: Vec<String>,
    #[serde(default)]
    pub sessions: Vec<String>,
    #[serde(default)]
    pub dates: Vec<String>,
}

impl UiFilters {
    pub fn is_empty(&self) -> bool {
        self.drugs.is_empty()
            && self.therapeutic_areas.is_empty()
            && self.sessions.is_empty()
            && self.dates.is_empty()
    }

    /// Human-readable summary for prompt embedding.
    pub fn describe(&self) -> String {
        if self.is_empty() {
            return "none".to_string();
        }
        let mut parts = Vec::new();
        if !self.drugs.is_empty() {
            parts.push(format!("drugs: {}", self.drugs.join(", ")));
        }
        if !self.therapeutic_areas.is_empty() {
            parts.push(format!("therapeutic areas: {}", self.therapeutic_areas.join(", ")));
        }
        if !self.sessions.is_empty() {
            parts.push(format!("session types: {}", self.sessions.join(", ")));
        }
        if !self.dates.is_empty() {
            parts.push(format!("dates: {}", self.dates.join(", ")));
        }
        parts.join("; ")
    }
}

/// How much reasoning/verbosity budget the synthesizer asks the model for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningMode {
    #[default]
    Standard,
    DeepThinking,
}
