use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a submitted translation.
///
/// Records are never hard-deleted; `Deleted` is a tombstone so history stays auditable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranslationStatus {
    Draft,
    #[default]
    Pending,
    Approved,
    Committed,
    Rejected,
    Deleted,
}

impl TranslationStatus {
    pub const ALL: [TranslationStatus; 6] = [
        Self::Draft,
        Self::Pending,
        Self::Approved,
        Self::Committed,
        Self::Rejected,
        Self::Deleted,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Committed => "committed",
            Self::Rejected => "rejected",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<TranslationStatus> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    /// Approved and committed records are the ones that override imported text.
    /// At most one record per coordinate may be in this set.
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Approved | Self::Committed)
    }
}

impl fmt::Display for TranslationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
