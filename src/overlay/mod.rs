//! Layered view of a target-language file for the editor.
//!
//! Three layers, highest first: an accepted web override, the imported target file, and
//! the empty string. The source value always comes from the source file.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::types::{Content, TranslationRecord};

const PLACEHOLDER: &str = "{lang}";

/// Which layer produced `current_value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Origin {
    WebOverride,
    Imported,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedEntry {
    pub key: String,
    pub source_value: String,
    pub current_value: String,
    pub is_valid: bool,
    pub origin: Origin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation_id: Option<String>,
}

/// Merges with no staleness signals for imported values.
#[must_use]
pub fn resolve(
    source: &Content,
    target: Option<&Content>,
    overrides: &[TranslationRecord],
) -> Vec<MergedEntry> {
    Overlay::new(source).target(target).overrides(overrides).resolve()
}

pub struct Overlay<'a> {
    source: &'a Content,
    target: Option<&'a Content>,
    overrides: &'a [TranslationRecord],
    stale_keys: HashSet<&'a str>,
}

impl<'a> Overlay<'a> {
    #[must_use]
    pub fn new(source: &'a Content) -> Self {
        Self {
            source,
            target: None,
            overrides: &[],
            stale_keys: HashSet::new(),
        }
    }

    #[must_use]
    pub fn target(mut self, target: Option<&'a Content>) -> Self {
        self.target = target;
        self
    }

    /// Records that are not approved or committed are ignored.
    #[must_use]
    pub fn overrides(mut self, overrides: &'a [TranslationRecord]) -> Self {
        self.overrides = overrides;
        self
    }

    /// Keys whose imported value is known to be stale.
    #[must_use]
    pub fn with_stale_keys<I>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.stale_keys.extend(keys);
        self
    }

    #[must_use]
    pub fn resolve(&self) -> Vec<MergedEntry> {
        let mut accepted: HashMap<&str, &TranslationRecord> = HashMap::new();
        for record in self.overrides.iter().filter(|r| r.status.is_accepted()) {
            accepted
                .entry(record.key.as_str())
                .and_modify(|current| {
                    if record.updated_at > current.updated_at {
                        *current = record;
                    }
                })
                .or_insert(record);
        }

        self.source
            .iter()
            .map(|(key, source_value)| {
                if let Some(record) = accepted.get(key.as_str()) {
                    return MergedEntry {
                        key: key.clone(),
                        source_value: source_value.clone(),
                        current_value: record.value.clone(),
                        is_valid: record.is_valid,
                        origin: Origin::WebOverride,
                        invalid_reason: record.invalid_reason.clone(),
                        translation_id: Some(record.id.clone()),
                    };
                }

                match self.target.and_then(|t| t.get(key)) {
                    Some(imported) => MergedEntry {
                        key: key.clone(),
                        source_value: source_value.clone(),
                        current_value: imported.clone(),
                        is_valid: !self.stale_keys.contains(key.as_str()),
                        origin: Origin::Imported,
                        invalid_reason: None,
                        translation_id: None,
                    },
                    None => MergedEntry {
                        key: key.clone(),
                        source_value: source_value.clone(),
                        current_value: String::new(),
                        is_valid: false,
                        origin: Origin::Empty,
                        invalid_reason: None,
                        translation_id: None,
                    },
                }
            })
            .collect()
    }
}

fn is_delimiter(c: char) -> bool {
    matches!(c, '/' | '\\' | '.' | '-' | '_')
}

/// Replaces every occurrence of `language` that sits between delimiters with a
/// placeholder. `None` if the filename never mentions the language.
#[must_use]
pub fn filename_pattern(filename: &str, language: &str) -> Option<String> {
    if language.is_empty() {
        return None;
    }
    let mut pattern = String::with_capacity(filename.len());
    let mut last = 0;
    let mut found = false;
    for (start, token) in filename.match_indices(language) {
        if start < last {
            continue;
        }
        let end = start + token.len();
        let before = filename[..start].chars().next_back().is_none_or(is_delimiter);
        let after = filename[end..].chars().next().is_none_or(is_delimiter);
        if before && after {
            pattern.push_str(&filename[last..start]);
            pattern.push_str(PLACEHOLDER);
            last = end;
            found = true;
        }
    }
    if !found {
        return None;
    }
    pattern.push_str(&filename[last..]);
    Some(pattern)
}

/// True if `target` is the `target_language` counterpart of `source`.
#[must_use]
pub fn filenames_match(
    source: &str,
    source_language: &str,
    target: &str,
    target_language: &str,
) -> bool {
    match (
        filename_pattern(source, source_language),
        filename_pattern(target, target_language),
    ) {
        (Some(s), Some(t)) => s == t,
        (None, None) => source == target,
        _ => false,
    }
}

pub fn find_target<'c, I>(
    source: &str,
    source_language: &str,
    target_language: &str,
    candidates: I,
) -> Option<&'c str>
where
    I: IntoIterator<Item = &'c str>,
{
    candidates
        .into_iter()
        .find(|c| filenames_match(source, source_language, c, target_language))
}

/// Name the target file would have if it followed the source naming.
#[must_use]
pub fn target_filename(source: &str, source_language: &str, target_language: &str) -> String {
    match filename_pattern(source, source_language) {
        Some(pattern) => pattern.replace(PLACEHOLDER, target_language),
        None => source.to_string(),
    }
}
