//! Catalog database access shared by the Melodee binaries

pub mod init;

pub use init::{init_database, init_memory_database};
