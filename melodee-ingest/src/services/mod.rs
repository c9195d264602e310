//! Ingest pipeline services
//!
//! Scanner → ledger → grouping → processor → (staging, quarantine) → promotion

pub mod album_grouping;
pub mod directory_codes;
pub mod file_scanner;
pub mod metadata_extractor;
pub mod processor;
pub mod promotion;
pub mod quarantine;
pub mod rate_limiter;

pub use album_grouping::{group_ledger, normalize_album, normalize_artist, vote_year};
pub use directory_codes::DirectoryCodeGenerator;
pub use file_scanner::{FileScanner, InboundScanner, ScanError, ScanStats};
pub use metadata_extractor::{MetadataError, MetadataExtractor};
pub use processor::{ProcessReport, Processor, ProcessorConfig, RunOutcome, StagedAlbum};
pub use promotion::{PromotionHandler, PromotionOutcome};
pub use quarantine::QuarantineService;
pub use rate_limiter::TokenBucket;
