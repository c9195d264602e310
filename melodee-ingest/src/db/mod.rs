//! Persistence for the ingest pipeline
//!
//! - [`ledger`]: per-scan SQLite ledger of discovered files
//! - [`staging`], [`quarantine`], [`directory_codes`], [`catalog`]: repositories over the
//!   shared catalog database initialized by `melodee_common::db`

pub mod catalog;
pub mod directory_codes;
pub mod ledger;
pub mod quarantine;
pub mod staging;

pub use ledger::{remove_expired_ledgers, ScanLedger, ScanRun};
pub use quarantine::QuarantineRepository;
pub use staging::StagingRepository;

use chrono::{DateTime, Utc};
use melodee_common::{Error, Result};

/// Parse an RFC 3339 timestamp column
pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Invalid timestamp '{}': {}", value, e)))
}

pub(crate) fn parse_optional_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_timestamp).transpose()
}

/// Current time in the storage format
pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}
