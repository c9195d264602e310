//! Staging item lifecycle
//!
//! ```text
//! pending_review --approve--> approved --promote--> (row deleted, catalog created)
//! pending_review --reject---> rejected --delete---> (row + optionally files deleted)
//! ```
//!
//! Nothing returns to `pending_review`; re-processing creates a new item.

use chrono::{DateTime, Utc};
use melodee_common::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Review status of a staged album
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagingStatus {
    PendingReview,
    Approved,
    Rejected,
}

/// Operator action on a staging item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingAction {
    Approve,
    Reject,
    Promote,
    Delete,
}

/// Result of applying an action to a status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Row stays, with a new status
    To(StagingStatus),
    /// Row is removed (promotion or deletion)
    Remove,
}

/// Action not allowed from the current status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot {action} a staging item that is {from}")]
pub struct InvalidTransition {
    pub from: StagingStatus,
    pub action: StagingAction,
}

impl From<InvalidTransition> for Error {
    fn from(err: InvalidTransition) -> Self {
        Error::Conflict(err.to_string())
    }
}

impl StagingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StagingStatus::PendingReview => "pending_review",
            StagingStatus::Approved => "approved",
            StagingStatus::Rejected => "rejected",
        }
    }

    /// Apply an operator action
    pub fn apply(self, action: StagingAction) -> Result<Transition, InvalidTransition> {
        use StagingAction::*;
        use StagingStatus::*;

        match (self, action) {
            (PendingReview, Approve) => Ok(Transition::To(Approved)),
            (PendingReview, Reject) => Ok(Transition::To(Rejected)),
            (Approved, Promote) => Ok(Transition::Remove),
            (Rejected, Delete) => Ok(Transition::Remove),
            (PendingReview, Promote | Delete)
            | (Approved, Approve | Reject | Delete)
            | (Rejected, Approve | Reject | Promote) => Err(InvalidTransition { from: self, action }),
        }
    }
}

impl fmt::Display for StagingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for StagingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            StagingAction::Approve => "approve",
            StagingAction::Reject => "reject",
            StagingAction::Promote => "promote",
            StagingAction::Delete => "delete",
        };
        f.write_str(verb)
    }
}

impl FromStr for StagingStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_review" => Ok(StagingStatus::PendingReview),
            "approved" => Ok(StagingStatus::Approved),
            "rejected" => Ok(StagingStatus::Rejected),
            other => Err(Error::InvalidInput(format!("unknown staging status: {}", other))),
        }
    }
}

/// One album moved to staging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingItem {
    pub id: i64,
    pub scan_id: String,
    pub staging_path: PathBuf,
    pub metadata_file: PathBuf,
    pub artist_name: String,
    pub album_name: String,
    pub track_count: i64,
    pub total_size: i64,
    pub processed_at: DateTime<Utc>,
    pub status: StagingStatus,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    /// SHA-256 of the serialized sidecar at staging time
    pub metadata_checksum: String,
    pub created_at: DateTime<Utc>,
}

/// Insert payload produced by the processor
#[derive(Debug, Clone, PartialEq)]
pub struct NewStagingItem {
    pub scan_id: String,
    pub staging_path: PathBuf,
    pub metadata_file: PathBuf,
    pub artist_name: String,
    pub album_name: String,
    pub track_count: i64,
    pub total_size: i64,
    pub metadata_checksum: String,
}

/// Aggregate counts for the review queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingStats {
    pub pending_review: i64,
    pub approved: i64,
    pub rejected: i64,
    pub total_tracks: i64,
    pub total_size: i64,
}

impl StagingStats {
    pub fn total_items(&self) -> i64 {
        self.pending_review + self.approved + self.rejected
    }
}
