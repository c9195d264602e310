//! Quarantine record model

use super::ExtractionFailure;
use chrono::{DateTime, Utc};
use melodee_common::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Why a file was quarantined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuarantineReason {
    ChecksumMismatch,
    TagParseError,
    UnsupportedContainer,
    MoveFailure,
    Other,
}

impl QuarantineReason {
    pub const ALL: [QuarantineReason; 5] = [
        QuarantineReason::ChecksumMismatch,
        QuarantineReason::TagParseError,
        QuarantineReason::UnsupportedContainer,
        QuarantineReason::MoveFailure,
        QuarantineReason::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuarantineReason::ChecksumMismatch => "checksum_mismatch",
            QuarantineReason::TagParseError => "tag_parse_error",
            QuarantineReason::UnsupportedContainer => "unsupported_container",
            QuarantineReason::MoveFailure => "move_failure",
            QuarantineReason::Other => "other",
        }
    }
}

impl From<ExtractionFailure> for QuarantineReason {
    fn from(kind: ExtractionFailure) -> Self {
        match kind {
            ExtractionFailure::UnsupportedContainer => QuarantineReason::UnsupportedContainer,
            ExtractionFailure::TagParse => QuarantineReason::TagParseError,
            ExtractionFailure::Unreadable => QuarantineReason::Other,
        }
    }
}

impl fmt::Display for QuarantineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuarantineReason {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QuarantineReason::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown quarantine reason: {}", s)))
    }
}

/// A file held aside after failing validation or a move
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineRecord {
    pub id: i64,
    /// Current location (inside the quarantine area when relocation succeeded)
    pub file_path: PathBuf,
    /// Where the file was found
    pub original_path: PathBuf,
    pub reason: QuarantineReason,
    pub message: String,
    /// Owning library / scan id
    pub library_id: String,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// List filter; `None` fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuarantineFilter {
    pub reason: Option<QuarantineReason>,
    pub library_id: Option<String>,
    pub resolved: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_round_trip() {
        for reason in QuarantineReason::ALL {
            assert_eq!(reason.as_str().parse::<QuarantineReason>().unwrap(), reason);
        }
        let err = "corrupt".parse::<QuarantineReason>().unwrap_err();
        assert_eq!(err.code(), "BAD_REQUEST");
    }

    #[test]
    fn test_reason_from_extraction_failure() {
        assert_eq!(
            QuarantineReason::from(ExtractionFailure::UnsupportedContainer),
            QuarantineReason::UnsupportedContainer
        );
        assert_eq!(
            QuarantineReason::from(ExtractionFailure::TagParse),
            QuarantineReason::TagParseError
        );
        assert_eq!(
            QuarantineReason::from(ExtractionFailure::Unreadable),
            QuarantineReason::Other
        );
    }
}
