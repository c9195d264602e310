//! Utility modules for melodee-ingest

pub mod db_retry;
pub mod fs_ops;

pub use db_retry::retry_on_lock;
pub use fs_ops::{copy_dir_verified, move_file, sanitize_segment, unique_path};
