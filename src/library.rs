use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;

use crate::catalog::{self, BookUpdate, DeletePolicy, DeleteReport};
use crate::config::LibraryConfig;
use crate::convert::{DefaultConverter, FormatConverter};
use crate::cover::{CoverGenerator, TextCoverGenerator};
use crate::db;
use crate::error::{IngestError, Result};
use crate::events::{ImportObserver, LogObserver};
use crate::history::{HistoryStats, ImportHistoryLedger};
use crate::import::{sweep_stale_staging, ImportManifest, ImportOrchestrator, ImportOutcome, ImportRequest};
use crate::models::{Book, ImportHistory};
use crate::parser::{FormatExtractor, MetadataExtractor};
use crate::paths::PathPlanner;
use crate::scanner::{self, ScanTemplate};

/// Pluggable collaborators of the pipeline.
#[derive(Clone)]
pub struct Adapters {
    pub extractor: Arc<dyn MetadataExtractor>,
    pub converter: Arc<dyn FormatConverter>,
    pub cover_generator: Arc<dyn CoverGenerator>,
}

impl Adapters {
    /// Built-in readers, converters and the text cover card.
    pub fn native(config: &LibraryConfig) -> Result<Self> {
        let generator = TextCoverGenerator::new(config.cover_font.as_deref())?;
        Ok(Adapters {
            extractor: Arc::new(FormatExtractor),
            converter: Arc::new(DefaultConverter::from_config(config)),
            cover_generator: Arc::new(generator),
        })
    }
}

/// The book store: one catalog connection, its configuration and adapters.
pub struct Library {
    conn: Connection,
    config: LibraryConfig,
    adapters: Adapters,
    observer: Arc<dyn ImportObserver>,
}

impl Library {
    /// Open (or create) the catalog at `config.database_path` with the
    /// built-in adapters.
    pub fn open(config: LibraryConfig) -> Result<Self> {
        let adapters = Adapters::native(&config)?;
        Self::with_adapters(config, adapters)
    }

    pub fn with_adapters(config: LibraryConfig, adapters: Adapters) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.storage_root)
            .map_err(|err| IngestError::filesystem(&config.storage_root, err))?;
        let conn = db::open_db(&config.database_path)?;
        let swept = sweep_stale_staging(&config.staging_root(), config.adapter_timeout() * 2);
        if swept > 0 {
            log::info!("removed {} stale staging directories", swept);
        }
        log::info!("library opened at {}", config.storage_root.display());
        Ok(Library {
            conn,
            config,
            adapters,
            observer: Arc::new(LogObserver),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn ImportObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.config
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn orchestrator(&self) -> ImportOrchestrator<'_> {
        ImportOrchestrator::new(&self.conn, &self.config, &self.adapters, self.observer.as_ref())
    }

    pub fn import_file(&self, request: &ImportRequest) -> ImportOutcome {
        self.orchestrator().import_file(request)
    }

    pub fn import_batch(&self, requests: &[ImportRequest]) -> ImportManifest {
        self.orchestrator().import_batch(requests)
    }

    pub fn scan_directory(&self, root: &Path, template: &ScanTemplate) -> Result<ImportManifest> {
        scanner::scan_directory(&self.orchestrator(), root, template)
    }

    pub fn book(&self, id: &str) -> Result<Book> {
        db::get_book(&self.conn, id)?.ok_or_else(|| IngestError::NotFound(id.to_string()))
    }

    pub fn books(&self) -> Result<Vec<Book>> {
        Ok(db::list_books(&self.conn)?)
    }

    pub fn update_book(&self, id: &str, update: &BookUpdate) -> Result<Book> {
        let planner = PathPlanner::new(&self.config.storage_root);
        catalog::update_book(&self.conn, &planner, id, update)
    }

    pub fn delete_book(&self, id: &str, policy: DeletePolicy) -> Result<DeleteReport> {
        catalog::delete_book(&self.conn, &self.config.storage_root, id, policy)
    }

    pub fn record_progress(&self, user_id: &str, book_id: &str, position: Option<&str>, progress: f64) -> Result<()> {
        catalog::record_progress(&self.conn, user_id, book_id, position, progress)
    }

    pub fn shelf(&self, user_id: &str) -> Result<Vec<String>> {
        Ok(db::shelf_book_ids(&self.conn, user_id)?)
    }

    pub fn history(&self, user_id: Option<&str>, limit: usize) -> Result<Vec<ImportHistory>> {
        Ok(ImportHistoryLedger::new(&self.conn).recent(user_id, limit)?)
    }

    pub fn history_stats(&self) -> Result<HistoryStats> {
        Ok(ImportHistoryLedger::new(&self.conn).stats()?)
    }

    pub fn purge_history(&self, before_millis: i64) -> Result<usize> {
        Ok(ImportHistoryLedger::new(&self.conn).purge_before(before_millis)?)
    }
}
