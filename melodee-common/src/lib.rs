//! # Melodee Common Library
//!
//! Shared code for the Melodee ingest binaries:
//! - Error type with API-facing error codes
//! - Configuration loading (TOML + environment + defaults)
//! - Tracing setup
//! - Catalog database initialization

pub mod config;
pub mod db;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
