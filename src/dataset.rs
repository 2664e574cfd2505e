use crate::models::StudyRecord;

/// Immutable, read-only view over the loaded congress dataset.
///
/// The loader owns parsing and column cleanup; this wrapper only exposes the
/// rows. Concurrent queries share a dataset by reference and every filter
/// run produces its own owned result, so nothing here needs interior
/// mutability.
#[derive(Debug, Clone, Default)]
pub struct StudyDataset {
    records: Vec<StudyRecord>,
}

impl StudyDataset {
    pub fn new(records: Vec<StudyRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[StudyRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Fills in the lowercase full-text column for loaders that did not
    /// precompute it. Records that already carry `search_text` are left
    /// untouched.
    pub fn with_computed_search_text(mut self) -> Self {
        for record in &mut self.records {
            if record.search_text.is_none() {
                record.search_text = Some(concat_text_columns(record));
            }
        }
        self
    }
}

fn concat_text_columns(record: &StudyRecord) -> String {
    let mut text = format!(
        "{} {} {} {} {}",
        record.title, record.theme, record.session_type, record.speakers, record.affiliation
    );
    if let Some(location) = &record.speaker_location {
        text.push(' ');
        text.push_str(location);
    }
    if let Some(abstract_text) = &record.abstract_text {
        text.push(' ');
        text.push_str(abstract_text);
    }
    text.to_lowercase()
}
