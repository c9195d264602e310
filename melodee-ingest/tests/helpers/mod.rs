//! Test Helper Utilities
//!
//! Shared fixtures for the ingest integration tests

#![allow(dead_code)]

pub mod audio_generator;
pub mod db_utils;

pub use audio_generator::{generate_album, generate_tagged_wav, generate_wav, TrackTags};
pub use db_utils::{count_rows, create_test_catalog, scan_inbound};
