//! Deterministic tabular filter engine.
//!
//! Applies an extracted [`KeywordBundle`] against the full dataset through a
//! fixed sequence of column-scoped stages, each narrowing the previous
//! stage's survivors. Pure: the source dataset is never mutated and every
//! call builds its own owned result.

use std::borrow::Cow;
use std::collections::HashSet;

use regex::Regex;
use tracing::debug;

use crate::dataset::StudyDataset;
use crate::models::{KeywordBundle, StudyRecord};

/// The fixed stage order. Each stage only ever sees rows that survived the
/// stages before it.
const STAGE_ORDER: [Stage; 7] = [
    Stage::Dates,
    Stage::Institutions,
    Stage::DrugCombinations,
    Stage::DrugClasses,
    Stage::TherapeuticAreas,
    Stage::Speakers,
    Stage::SearchTerms,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Dates,
    Institutions,
    DrugCombinations,
    DrugClasses,
    TherapeuticAreas,
    Speakers,
    SearchTerms,
}

/// Stage applicability policy. A stage runs iff its keyword list is
/// non-empty and it is not suppressed.
///
/// When drug combinations are present they are the authoritative entity
/// filter: the drug-class and free-text stages are suppressed so they cannot
/// re-narrow an already drug-scoped result. This holds even when the
/// combination stage matched zero rows.
fn stage_enabled(stage: Stage, bundle: &KeywordBundle) -> bool {
    let combos_present = bundle.drug_combinations.iter().any(|g| !g.is_empty());
    match stage {
        Stage::Dates => !bundle.dates.is_empty(),
        Stage::Institutions => !bundle.institutions.is_empty(),
        Stage::DrugCombinations => combos_present,
        Stage::DrugClasses => !bundle.drug_classes.is_empty() && !combos_present,
        Stage::TherapeuticAreas => !bundle.therapeutic_areas.is_empty(),
        Stage::Speakers => !bundle.speakers.is_empty(),
        Stage::SearchTerms => !bundle.search_terms.is_empty() && !combos_present,
    }
}

/// Runs the full stage sequence and returns the surviving rows, cloned, in
/// their original dataset order.
///
/// A fully empty bundle makes every stage a no-op, so the entire dataset
/// comes back unchanged; forcing the "no entities means no evidence" empty
/// result is the orchestrator's call, not the engine's.
pub fn apply(dataset: &StudyDataset, bundle: &KeywordBundle) -> Vec<StudyRecord> {
    let records = dataset.records();
    let mut survivors: Vec<usize> = (0..records.len()).collect();

    for stage in STAGE_ORDER {
        if !stage_enabled(stage, bundle) {
            continue;
        }
        let before = survivors.len();
        survivors = run_stage(stage, records, survivors, bundle);
        debug!(?stage, before, after = survivors.len(), "filter stage applied");
        if survivors.is_empty() {
            break;
        }
    }

    survivors.iter().map(|&i| records[i].clone()).collect()
}

fn run_stage(
    stage: Stage,
    records: &[StudyRecord],
    survivors: Vec<usize>,
    bundle: &KeywordBundle,
) -> Vec<usize> {
    match stage {
        Stage::Dates => filter_dates(records, survivors, &bundle.dates),
        Stage::Institutions => filter_institutions(records, survivors, &bundle.institutions),
        Stage::DrugCombinations => {
            filter_drug_combinations(records, survivors, &bundle.drug_combinations)
        }
        Stage::DrugClasses => retain_any_term(records, survivors, &bundle.drug_classes, full_text),
        Stage::TherapeuticAreas => {
            retain_any_term(records, survivors, &bundle.therapeutic_areas, area_text)
        }
        Stage::Speakers => filter_speakers(records, survivors, &bundle.speakers),
        Stage::SearchTerms => retain_any_term(records, survivors, &bundle.search_terms, full_text),
    }
}

/// Case-insensitive escaped-literal substring predicate. Every user-supplied
/// term is escaped before compilation so `+`, `(` and friends stay literal.
fn literal_pattern(term: &str) -> Option<Regex> {
    Regex::new(&format!("(?i){}", regex::escape(term.trim()))).ok()
}

/// Precomputed full-text haystack when the loader supplied it, else the
/// title.
fn full_text(record: &StudyRecord) -> Cow<'_, str> {
    match &record.search_text {
        Some(text) => Cow::Borrowed(text.as_str()),
        None => Cow::Borrowed(record.title.as_str()),
    }
}

/// Haystack for therapeutic-area terms: full text, else title + theme.
fn area_text(record: &StudyRecord) -> Cow<'_, str> {
    match &record.search_text {
        Some(text) => Cow::Borrowed(text.as_str()),
        None => Cow::Owned(format!("{} {}", record.title, record.theme)),
    }
}

fn filter_dates(records: &[StudyRecord], survivors: Vec<usize>, dates: &[String]) -> Vec<usize> {
    let patterns: Vec<Regex> = dates.iter().filter_map(|d| literal_pattern(d)).collect();
    survivors
        .into_iter()
        .filter(|&i| patterns.iter().any(|p| p.is_match(&records[i].date)))
        .collect()
}

/// Institution terms match the affiliation column OR the speaker-location
/// column; rows without a location fall back to affiliation alone.
fn filter_institutions(
    records: &[StudyRecord],
    survivors: Vec<usize>,
    institutions: &[String],
) -> Vec<usize> {
    let patterns: Vec<Regex> = institutions
        .iter()
        .filter_map(|t| literal_pattern(t))
        .collect();
    survivors
        .into_iter()
        .filter(|&i| {
            let record = &records[i];
            patterns.iter().any(|p| {
                p.is_match(&record.affiliation)
                    || record
                        .speaker_location
                        .as_deref()
                        .is_some_and(|location| p.is_match(location))
            })
        })
        .collect()
}

/// AND within each group, OR (union with dedup) across groups. A singleton
/// group degenerates to one substring test. Result keeps original dataset
/// order.
fn filter_drug_combinations(
    records: &[StudyRecord],
    survivors: Vec<usize>,
    groups: &[Vec<String>],
) -> Vec<usize> {
    let mut seen: HashSet<usize> = HashSet::new();
    let mut matched: Vec<usize> = Vec::new();

    for group in groups.iter().filter(|g| !g.is_empty()) {
        let mut group_rows = survivors.clone();
        for drug in group {
            let Some(pattern) = literal_pattern(drug) else {
                group_rows.clear();
                break;
            };
            group_rows.retain(|&i| pattern.is_match(&full_text(&records[i])));
        }
        for i in group_rows {
            if seen.insert(i) {
                matched.push(i);
            }
        }
    }

    matched.sort_unstable();
    matched
}

/// Keeps rows where any term matches the haystack produced by `haystack`.
fn retain_any_term(
    records: &[StudyRecord],
    survivors: Vec<usize>,
    terms: &[String],
    haystack: fn(&StudyRecord) -> Cow<'_, str>,
) -> Vec<usize> {
    let patterns: Vec<Regex> = terms.iter().filter_map(|t| literal_pattern(t)).collect();
    survivors
        .into_iter()
        .filter(|&i| {
            let text = haystack(&records[i]);
            patterns.iter().any(|p| p.is_match(&text))
        })
        .collect()
}

/// Fuzzy speaker match: the row's speaker field must contain the requested
/// last name and a word starting with the requested first initial, as two
/// independent predicates. Tolerates middle names/initials on either side.
/// Single-token names fall back to plain substring matching. Multiple
/// requested speakers are OR'd.
fn filter_speakers(records: &[StudyRecord], survivors: Vec<usize>, speakers: &[String]) -> Vec<usize> {
    let matchers: Vec<SpeakerMatcher> = speakers
        .iter()
        .filter_map(|name| SpeakerMatcher::new(name))
        .collect();
    survivors
        .into_iter()
        .filter(|&i| matchers.iter().any(|m| m.matches(&records[i].speakers)))
        .collect()
}

enum SpeakerMatcher {
    /// Last name containment plus first-initial word start.
    FirstLast { last: Regex, initial: Regex },
    /// Single-token name: plain substring.
    Plain(Regex),
}

impl SpeakerMatcher {
    fn new(name: &str) -> Option<Self> {
        let tokens: Vec<&str> = name.split_whitespace().collect();
        match tokens.as_slice() {
            [] => None,
            [only] => literal_pattern(only).map(SpeakerMatcher::Plain),
            [first, .., last] => {
                let initial = first.chars().next()?;
                let last = literal_pattern(last)?;
                let initial =
                    Regex::new(&format!(r"(?i)\b{}", regex::escape(&initial.to_string()))).ok()?;
                Some(SpeakerMatcher::FirstLast { last, initial })
            }
        }
    }

    fn matches(&self, field: &str) -> bool {
        match self {
            SpeakerMatcher::FirstLast { last, initial } => {
                last.is_match(field) && initial.is_match(field)
            }
            SpeakerMatcher::Plain(pattern) => pattern.is_match(field),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, title: &str) -> StudyRecord {
        StudyRecord {
            id: id.to_string(),
            title: title.to_string(),
            session_type: "Oral".to_string(),
            theme: "Genitourinary Cancers".to_string(),
            date: "10/18/2025".to_string(),
            time: "10:30".to_string(),
            room: "Hall A".to_string(),
            speakers: "Thomas Powles".to_string(),
            affiliation: "Barts Cancer Institute".to_string(),
            speaker_location: None,
            abstract_text: None,
            search_text: Some(title.to_lowercase()),
        }
    }

    fn dataset(records: Vec<StudyRecord>) -> StudyDataset {
        StudyDataset::new(records)
    }

    fn ids(rows: &[StudyRecord]) -> Vec<&str> {
        rows.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn empty_bundle_is_a_no_op() {
        let data = dataset(vec![record("a", "one"), record("b", "two"), record("c", "three")]);
        let rows = apply(&data, &KeywordBundle::default());
        assert_eq!(ids(&rows), vec!["a", "b", "c"]);
    }

    #[test]
    fn date_stage_matches_substring_case_insensitively() {
        let mut r1 = record("a", "one");
        r1.date = "Saturday 10/18/2025".to_string();
        let mut r2 = record("b", "two");
        r2.date = "October 19, 2025".to_string();
        let mut r3 = record("c", "three");
        r3.date = "10/18/2025 AM".to_string();
        let data = dataset(vec![r1, r2, r3]);

        let bundle = KeywordBundle {
            dates: vec!["10/18/2025".to_string()],
            ..Default::default()
        };
        assert_eq!(ids(&apply(&data, &bundle)), vec!["a", "c"]);
    }

    #[test]
    fn combination_groups_are_unioned_and_group_members_intersected() {
        let data = dataset(vec![
            record("only-a", "study of avelumab maintenance"),
            record("only-b", "study of bevacizumab alone"),
            record("both", "avelumab plus bevacizumab combination"),
            record("neither", "unrelated radiotherapy session"),
        ]);

        let union = KeywordBundle {
            drug_combinations: vec![vec!["avelumab".to_string()], vec!["bevacizumab".to_string()]],
            ..Default::default()
        };
        assert_eq!(ids(&apply(&data, &union)), vec!["only-a", "only-b", "both"]);

        let intersection = KeywordBundle {
            drug_combinations: vec![vec!["avelumab".to_string(), "bevacizumab".to_string()]],
            ..Default::default()
        };
        assert_eq!(ids(&apply(&data, &intersection)), vec!["both"]);
    }

    #[test]
    fn combination_round_trip_returns_exactly_the_both_term_rows() {
        let mut records = Vec::new();
        for i in 0..3 {
            records.push(record(
                &format!("both-{i}"),
                "enfortumab vedotin with pembrolizumab in la/muc",
            ));
        }
        records.push(record("one-0", "enfortumab vedotin monotherapy"));
        records.push(record("one-1", "pembrolizumab maintenance"));
        for i in 0..10 {
            records.push(record(&format!("other-{i}"), "unrelated topic"));
        }
        let data = dataset(records);

        let bundle = KeywordBundle {
            drug_combinations: vec![vec![
                "enfortumab vedotin".to_string(),
                "pembrolizumab".to_string(),
            ]],
            ..Default::default()
        };
        let rows = apply(&data, &bundle);
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.id.starts_with("both-")));
    }

    #[test]
    fn search_terms_do_not_narrow_a_combination_result() {
        let data = dataset(vec![
            record("both", "avelumab plus bevacizumab combination"),
            record("only-a", "avelumab maintenance"),
        ]);
        let without_terms = KeywordBundle {
            drug_combinations: vec![vec!["avelumab".to_string(), "bevacizumab".to_string()]],
            ..Default::default()
        };
        let with_terms = KeywordBundle {
            search_terms: vec!["no row contains this phrase".to_string()],
            ..without_terms.clone()
        };
        assert_eq!(ids(&apply(&data, &without_terms)), ids(&apply(&data, &with_terms)));
    }

    #[test]
    fn drug_classes_are_skipped_when_combinations_are_present() {
        let data = dataset(vec![record("both", "avelumab plus bevacizumab combination")]);
        let bundle = KeywordBundle {
            drug_combinations: vec![vec!["avelumab".to_string()]],
            drug_classes: vec!["antibody-drug conjugate".to_string()],
            ..Default::default()
        };
        assert_eq!(apply(&data, &bundle).len(), 1);
    }

    #[test]
    fn drug_classes_apply_when_no_combinations() {
        let data = dataset(vec![
            record("adc", "nectin-4 antibody-drug conjugate data"),
            record("io", "checkpoint inhibitor data"),
        ]);
        let bundle = KeywordBundle {
            drug_classes: vec!["antibody-drug conjugate".to_string()],
            ..Default::default()
        };
        assert_eq!(ids(&apply(&data, &bundle)), vec!["adc"]);
    }

    #[test]
    fn literal_terms_with_regex_metacharacters_do_not_blow_up() {
        let data = dataset(vec![record("a", "ev+p combination results")]);
        let bundle = KeywordBundle {
            search_terms: vec!["ev+p".to_string()],
            ..Default::default()
        };
        assert_eq!(apply(&data, &bundle).len(), 1);
    }

    #[test]
    fn speaker_match_tolerates_middle_initial_differences() {
        let mut r1 = record("jiang", "one");
        r1.speakers = "Cindy Y. Jiang".to_string();
        let mut r2 = record("smith", "two");
        r2.speakers = "Cindy Y. Smith".to_string();
        let data = dataset(vec![r1, r2]);

        let bundle = KeywordBundle {
            speakers: vec!["Cindy J. Jiang".to_string()],
            ..Default::default()
        };
        assert_eq!(ids(&apply(&data, &bundle)), vec!["jiang"]);
    }

    #[test]
    fn speaker_single_token_falls_back_to_substring() {
        let mut r1 = record("powles", "one");
        r1.speakers = "Prof. Thomas Powles".to_string();
        let mut r2 = record("other", "two");
        r2.speakers = "Andrea Necchi".to_string();
        let data = dataset(vec![r1, r2]);

        let bundle = KeywordBundle {
            speakers: vec!["powles".to_string()],
            ..Default::default()
        };
        assert_eq!(ids(&apply(&data, &bundle)), vec!["powles"]);
    }

    #[test]
    fn speakers_are_ored() {
        let mut r1 = record("jiang", "one");
        r1.speakers = "Cindy Y. Jiang".to_string();
        let mut r2 = record("powles", "two");
        r2.speakers = "Thomas Powles".to_string();
        let mut r3 = record("other", "three");
        r3.speakers = "Andrea Necchi".to_string();
        let data = dataset(vec![r1, r2, r3]);

        let bundle = KeywordBundle {
            speakers: vec!["Cindy Jiang".to_string(), "Thomas Powles".to_string()],
            ..Default::default()
        };
        assert_eq!(ids(&apply(&data, &bundle)), vec!["jiang", "powles"]);
    }

    #[test]
    fn institutions_match_affiliation_or_speaker_location() {
        let mut r1 = record("aff", "one");
        r1.affiliation = "Memorial Sloan Kettering Cancer Center".to_string();
        let mut r2 = record("loc", "two");
        r2.affiliation = "Unlisted".to_string();
        r2.speaker_location = Some("New York, Memorial Sloan Kettering".to_string());
        let mut r3 = record("none", "three");
        r3.affiliation = "Elsewhere".to_string();
        let data = dataset(vec![r1, r2, r3]);

        let bundle = KeywordBundle {
            institutions: vec!["sloan kettering".to_string()],
            ..Default::default()
        };
        assert_eq!(ids(&apply(&data, &bundle)), vec!["aff", "loc"]);
    }

    #[test]
    fn therapeutic_area_falls_back_to_title_and_theme() {
        let mut r1 = record("match", "novel therapy outcomes");
        r1.search_text = None;
        r1.theme = "Bladder Cancer".to_string();
        let mut r2 = record("other", "unrelated");
        r2.search_text = None;
        r2.theme = "Lung Cancer".to_string();
        let data = dataset(vec![r1, r2]);

        let bundle = KeywordBundle {
            therapeutic_areas: vec!["bladder".to_string()],
            ..Default::default()
        };
        assert_eq!(ids(&apply(&data, &bundle)), vec!["match"]);
    }

    #[test]
    fn combination_falls_back_to_title_without_search_text() {
        let mut r1 = record("match", "Enfortumab Vedotin plus Pembrolizumab");
        r1.search_text = None;
        let mut r2 = record("other", "Something else");
        r2.search_text = None;
        let data = dataset(vec![r1, r2]);

        let bundle = KeywordBundle {
            drug_combinations: vec![vec![
                "enfortumab vedotin".to_string(),
                "pembrolizumab".to_string(),
            ]],
            ..Default::default()
        };
        assert_eq!(ids(&apply(&data, &bundle)), vec!["match"]);
    }

    #[test]
    fn stages_compose_sequentially() {
        let mut r1 = record("keep", "avelumab maintenance in bladder cancer");
        r1.date = "10/18/2025".to_string();
        let mut r2 = record("wrong-date", "avelumab maintenance in bladder cancer");
        r2.date = "10/19/2025".to_string();
        let data = dataset(vec![r1, r2]);

        let bundle = KeywordBundle {
            dates: vec!["10/18/2025".to_string()],
            drug_combinations: vec![vec!["avelumab".to_string()]],
            ..Default::default()
        };
        assert_eq!(ids(&apply(&data, &bundle)), vec!["keep"]);
    }

    #[test]
    fn source_dataset_is_untouched() {
        let data = dataset(vec![record("a", "avelumab"), record("b", "other")]);
        let bundle = KeywordBundle {
            drug_combinations: vec![vec!["avelumab".to_string()]],
            ..Default::default()
        };
        let _ = apply(&data, &bundle);
        assert_eq!(data.len(), 2);
        assert_eq!(data.records()[1].id, "b");
    }
}
