//! Content-addressed ingestion and storage for a personal book library.
//!
//! Files are fingerprinted, deduplicated, filed under a canonical
//! `public/…` or `private/<owner>/…` tree, grouped with their other formats
//! and recorded in an append-only import ledger. [`Library`] is the entry
//! point; the pipeline itself lives in [`import`].

pub mod catalog;
pub mod config;
pub mod convert;
pub mod cover;
pub mod db;
pub mod dedup;
pub mod error;
pub mod events;
pub mod hasher;
pub mod history;
pub mod import;
pub mod library;
pub mod models;
pub mod parser;
pub mod paths;
pub mod scanner;
pub mod timeout;

pub use catalog::{BookUpdate, DeletePolicy, DeleteReport};
pub use config::LibraryConfig;
pub use cover::CoverInput;
pub use error::{IngestError, Result};
pub use events::{ImportEvent, ImportObserver, LogObserver, RecordingObserver};
pub use history::HistoryStats;
pub use import::{ImportManifest, ImportOutcome, ImportRequest, ManifestEntry, Stage};
pub use library::{Adapters, Library};
pub use models::{Book, BookFormat, ImportHistory, ImportStatus};
pub use scanner::ScanTemplate;
