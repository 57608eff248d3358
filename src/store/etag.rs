use chrono::{DateTime, SecondsFormat, Utc};

use crate::types::{TranslationFile, TranslationRecord};

pub const EMPTY_ETAG: &str = "\"0-empty\"";

/// Cache token for a listing: row count plus the newest `last_updated`.
///
/// Equal tokens imply equal listings as long as every write bumps `last_updated`. The
/// count catches removals of rows that were not the newest.
#[must_use]
pub fn etag(rows: &[TranslationFile]) -> String {
    token(rows.len(), rows.iter().map(|r| r.last_updated).max())
}

/// Cache token for a merged file view, which also changes when any record layered over
/// the files is written.
#[must_use]
pub fn view_etag(files: &[TranslationFile], records: &[TranslationRecord]) -> String {
    let newest = files
        .iter()
        .map(|f| f.last_updated)
        .chain(records.iter().map(|r| r.updated_at))
        .max();
    token(files.len() + records.len(), newest)
}

fn token(count: usize, newest: Option<DateTime<Utc>>) -> String {
    match newest {
        Some(newest) => format!(
            "\"{count}-{}\"",
            newest.to_rfc3339_opts(SecondsFormat::Micros, true)
        ),
        None => EMPTY_ETAG.to_string(),
    }
}
