//! Melodee ingest pipeline
//!
//! Turns an inbound folder of audio files into reviewed albums in the
//! production library:
//!
//! 1. [`services::InboundScanner`] walks the inbound tree, extracts tags and
//!    hashes into a per-scan [`db::ScanLedger`]
//! 2. [`services::album_grouping`] clusters ledger rows into albums
//! 3. [`services::Processor`] moves each album into the staging tree, writes a
//!    sidecar and registers a [`models::StagingItem`]
//! 4. Operators approve or reject staging items through
//!    [`db::StagingRepository`]
//! 5. [`services::PromotionHandler`] moves approved albums into the library and
//!    the catalog in one transaction
//!
//! Files that cannot be processed end up in the quarantine area
//! ([`services::QuarantineService`]).

pub mod cli;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod utils;

pub use db::{ScanLedger, StagingRepository};
pub use services::{InboundScanner, ProcessReport, Processor, PromotionHandler, RunOutcome};
