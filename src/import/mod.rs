//! The per-file ingestion pipeline.
//!
//! `Validate -> Hash -> DedupByHash -> ExtractMetadata -> DedupBySameFormat ->
//! Convert -> LinkSiblings -> PlanPath -> Place -> Persist -> ResolveCover ->
//! BestEffortConvert -> AutoShelf -> LogHistory`
//!
//! Each stage yields a [`StageOutcome`]. Recoverable stages continue with a
//! fallback; a fatal stage unwinds everything the attempt wrote through
//! [`AttemptLog::rollback`] before the error is written to the ledger.

pub mod attempt;
pub mod stage;

use rusqlite::Connection;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::LibraryConfig;
use crate::convert::{plan_conversion, ConversionHints, ConversionPlan, ConversionPolicy, FormatConverter};
use crate::cover::{CoverInput, CoverResolver};
use crate::db::{self, insert_book, is_unique_violation};
use crate::dedup::{normalize_key, root_of, DedupIndex, Scope};
use crate::error::{ExtractionError, IngestError};
use crate::events::{ImportEvent, ImportObserver};
use crate::hasher::hash_file;
use crate::history::{HistoryEntry, ImportHistoryLedger};
use crate::library::Adapters;
use crate::models::{Book, BookFormat, ImportStatus, NewBook};
use crate::parser::{CoverImage, Metadata, MetadataExtractor};
use crate::paths::{place_file, remove_file_if_exists, PathPlanner, PlaceMode};
use crate::timeout::run_with_timeout;

pub use attempt::{sweep_stale_staging, AttemptLog, RollbackReport};
pub use stage::{Stage, StageOutcome};

pub const SAME_HASH_REASON: &str = "already exists (same hash)";
pub const SAME_FORMAT_REASON: &str = "already exists (same title, author and format)";

/// One source file to ingest.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub source: PathBuf,
    /// Name shown in the ledger and used for the extension check. Uploads
    /// often sit in temp files, so this defaults to the source file name.
    pub original_name: Option<String>,
    pub user_id: String,
    /// Required for private imports; names the `private/<owner>` directory.
    pub owner_name: Option<String>,
    pub is_public: bool,
    pub category: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub tags: Vec<String>,
    pub cover: Option<CoverInput>,
    /// Move the source into the library instead of copying it.
    pub delete_source: bool,
    /// Part number for multi-file collections (`NNNN_` prefix).
    pub sequence: Option<u32>,
}

impl ImportRequest {
    pub fn new(source: impl Into<PathBuf>, user_id: impl Into<String>) -> Self {
        ImportRequest {
            source: source.into(),
            original_name: None,
            user_id: user_id.into(),
            owner_name: None,
            is_public: true,
            category: None,
            title: None,
            author: None,
            tags: Vec::new(),
            cover: None,
            delete_source: false,
            sequence: None,
        }
    }

    pub fn file_name(&self) -> String {
        self.original_name.clone().unwrap_or_else(|| {
            self.source
                .file_name()
                .map(|value| value.to_string_lossy().to_string())
                .unwrap_or_default()
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ImportOutcome {
    #[serde(rename_all = "camelCase")]
    Imported { book: Book, derived: Vec<Book> },
    #[serde(rename_all = "camelCase")]
    Skipped { existing_id: String, reason: String },
    #[serde(rename_all = "camelCase")]
    Failed { stage: Stage, message: String },
    /// Refused before any I/O; not written to the ledger.
    #[serde(rename_all = "camelCase")]
    Rejected { reason: String },
}

impl ImportOutcome {
    pub fn book_id(&self) -> Option<&str> {
        match self {
            ImportOutcome::Imported { book, .. } => Some(&book.id),
            ImportOutcome::Skipped { existing_id, .. } if !existing_id.is_empty() => Some(existing_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub file_name: String,
    pub message: String,
    pub book_id: Option<String>,
}

/// What a batch did, file by file. Partial success is the normal case.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ImportManifest {
    pub imported: Vec<ManifestEntry>,
    pub skipped: Vec<ManifestEntry>,
    pub errors: Vec<ManifestEntry>,
}

impl ImportManifest {
    pub fn record(&mut self, file_name: &str, outcome: &ImportOutcome) {
        let book_id = outcome.book_id().map(str::to_string);
        let (bucket, message) = match outcome {
            ImportOutcome::Imported { book, derived } => {
                (&mut self.imported, success_message(book, derived))
            }
            ImportOutcome::Skipped { reason, .. } => (&mut self.skipped, reason.clone()),
            ImportOutcome::Failed { stage, message } => {
                (&mut self.errors, format!("{:?}: {}", stage, message))
            }
            ImportOutcome::Rejected { reason } => (&mut self.errors, reason.clone()),
        };
        bucket.push(ManifestEntry {
            file_name: file_name.to_string(),
            message,
            book_id,
        });
    }

    pub fn total(&self) -> usize {
        self.imported.len() + self.skipped.len() + self.errors.len()
    }
}

fn success_message(book: &Book, derived: &[Book]) -> String {
    if derived.is_empty() {
        format!("imported as {}", book.file_type)
    } else {
        let extra: Vec<&str> = derived.iter().map(|item| item.file_type.as_str()).collect();
        format!("imported as {} (+ {})", book.file_type, extra.join(", "))
    }
}

/// Why a pipeline run stopped early.
enum Halt {
    Skipped { existing_id: String, reason: String },
    Fatal { stage: Stage, error: IngestError },
}

/// Descriptive fields settled after extraction.
struct BookDetails {
    title: String,
    author: String,
    category: String,
    language: String,
    isbn: Option<String>,
    publisher: Option<String>,
    publish_date: Option<String>,
    description: Option<String>,
    tags: Vec<String>,
    cover: Option<CoverImage>,
}

impl BookDetails {
    /// Request overrides win over extracted values, which win over defaults.
    fn settle(request: &ImportRequest, extracted: Metadata, file_name: &str, config: &LibraryConfig) -> Self {
        let fallback = Metadata::fallback(file_name);
        let pick = |requested: &Option<String>, found: Option<String>, default: Option<String>| {
            requested
                .as_deref()
                .map(normalize_key)
                .filter(|value| !value.is_empty())
                .or_else(|| found.map(|value| normalize_key(&value)).filter(|value| !value.is_empty()))
                .or(default)
                .unwrap_or_default()
        };
        BookDetails {
            title: pick(&request.title, extracted.title, fallback.title),
            author: pick(&request.author, extracted.author, fallback.author),
            category: pick(&request.category, None, Some(config.default_category.clone())),
            language: extracted
                .language
                .unwrap_or_else(|| config.default_language.clone()),
            isbn: extracted.isbn,
            publisher: extracted.publisher,
            publish_date: extracted.publish_date,
            description: extracted.description,
            tags: request.tags.clone(),
            cover: extracted.cover,
        }
    }

    fn new_book(
        &self,
        request: &ImportRequest,
        path: &Path,
        format: BookFormat,
        hash: &str,
        parent_book_id: Option<String>,
    ) -> Result<NewBook, IngestError> {
        let size = std::fs::metadata(path)
            .map_err(|err| IngestError::filesystem(path, err))?
            .len();
        Ok(NewBook {
            title: self.title.clone(),
            author: self.author.clone(),
            isbn: self.isbn.clone(),
            publisher: self.publisher.clone(),
            publish_date: self.publish_date.clone(),
            description: self.description.clone(),
            category: self.category.clone(),
            language: self.language.clone(),
            tags: self.tags.clone(),
            file_path: path.to_string_lossy().to_string(),
            file_name: path
                .file_name()
                .map(|value| value.to_string_lossy().to_string())
                .unwrap_or_default(),
            file_size: size as i64,
            file_type: format.extension().to_string(),
            file_hash: hash.to_string(),
            uploader_id: request.user_id.clone(),
            is_public: request.is_public,
            parent_book_id,
        })
    }
}

/// Runs import requests against one catalog connection.
pub struct ImportOrchestrator<'a> {
    conn: &'a Connection,
    config: &'a LibraryConfig,
    planner: PathPlanner,
    extractor: Arc<dyn MetadataExtractor>,
    converter: Arc<dyn FormatConverter>,
    covers: CoverResolver,
    observer: &'a dyn ImportObserver,
}

impl<'a> ImportOrchestrator<'a> {
    pub fn new(
        conn: &'a Connection,
        config: &'a LibraryConfig,
        adapters: &Adapters,
        observer: &'a dyn ImportObserver,
    ) -> Self {
        ImportOrchestrator {
            conn,
            config,
            planner: PathPlanner::new(&config.storage_root),
            extractor: Arc::clone(&adapters.extractor),
            converter: Arc::clone(&adapters.converter),
            covers: CoverResolver::new(
                Arc::clone(&adapters.cover_generator),
                config.adapter_timeout(),
                config.cover_download_timeout(),
            ),
            observer,
        }
    }

    pub fn import_file(&self, request: &ImportRequest) -> ImportOutcome {
        self.import_one(request, 1, 1)
    }

    /// Sequential on purpose: one file at a time bounds disk and hashing load.
    pub fn import_batch(&self, requests: &[ImportRequest]) -> ImportManifest {
        let total = requests.len();
        let mut manifest = ImportManifest::default();
        for (index, request) in requests.iter().enumerate() {
            let outcome = self.import_one(request, index + 1, total);
            manifest.record(&request.file_name(), &outcome);
        }
        log::info!(
            "batch finished: {} imported, {} skipped, {} errors",
            manifest.imported.len(),
            manifest.skipped.len(),
            manifest.errors.len()
        );
        manifest
    }

    fn import_one(&self, request: &ImportRequest, current: usize, total: usize) -> ImportOutcome {
        let file_name = request.file_name();
        self.observer.emit(&ImportEvent::Started {
            file_name: file_name.clone(),
            current,
            total,
        });

        self.enter(&file_name, Stage::Validate);
        let format = match self.validate(request, &file_name) {
            Ok(format) => format,
            Err(reason) => {
                self.observer.emit(&ImportEvent::Failed {
                    file_name: file_name.clone(),
                    stage: Stage::Validate,
                    message: reason.clone(),
                });
                return ImportOutcome::Rejected { reason };
            }
        };

        let mut attempt = AttemptLog::new(&self.config.storage_root);
        let staging = self
            .config
            .staging_root()
            .join(uuid::Uuid::new_v4().to_string());
        attempt.staging(staging.clone());

        let outcome = match self.run(request, &file_name, format, &staging, &mut attempt) {
            Ok((book, derived)) => {
                attempt.clear_staging();
                self.observer.emit(&ImportEvent::Imported {
                    file_name: file_name.clone(),
                    book_id: book.id.clone(),
                });
                ImportOutcome::Imported { book, derived }
            }
            Err(halt) => {
                let outcome = match halt {
                    Halt::Skipped { existing_id, reason } => {
                        self.observer.emit(&ImportEvent::Skipped {
                            file_name: file_name.clone(),
                            book_id: existing_id.clone(),
                            reason: reason.clone(),
                        });
                        ImportOutcome::Skipped { existing_id, reason }
                    }
                    Halt::Fatal { stage, error } => {
                        self.observer.emit(&ImportEvent::Failed {
                            file_name: file_name.clone(),
                            stage,
                            message: error.to_string(),
                        });
                        ImportOutcome::Failed {
                            stage,
                            message: error.to_string(),
                        }
                    }
                };
                if attempt.is_empty() {
                    attempt.clear_staging();
                } else {
                    let report = attempt.rollback(self.conn);
                    self.observer.emit(&ImportEvent::RolledBack {
                        file_name: file_name.clone(),
                        removed_rows: report.removed_rows,
                        removed_files: report.removed_files,
                    });
                }
                outcome
            }
        };

        self.log_history(request, &file_name, &outcome);
        outcome
    }

    fn validate(&self, request: &ImportRequest, file_name: &str) -> Result<BookFormat, String> {
        let format = BookFormat::from_path(Path::new(file_name))
            .ok_or_else(|| format!("unsupported file type: {}", file_name))?;
        if request.user_id.trim().is_empty() {
            return Err("missing uploader id".to_string());
        }
        let has_owner = request
            .owner_name
            .as_deref()
            .map(|value| !value.trim().is_empty())
            .unwrap_or(false);
        if !request.is_public && !has_owner {
            return Err("private imports need an owner name".to_string());
        }
        Ok(format)
    }

    fn run(
        &self,
        request: &ImportRequest,
        file_name: &str,
        format: BookFormat,
        staging: &Path,
        attempt: &mut AttemptLog,
    ) -> Result<(Book, Vec<Book>), Halt> {
        let index = DedupIndex::new(self.conn);

        self.enter(file_name, Stage::Hash);
        let hash = self.required(
            Stage::Hash,
            hash_file(&request.source).map_err(|err| IngestError::filesystem(&request.source, err)),
        )?;

        self.enter(file_name, Stage::DedupByHash);
        if let Some(existing) = self.required(Stage::DedupByHash, index.find_by_hash(&hash))? {
            return Err(Halt::Skipped {
                existing_id: existing.id,
                reason: SAME_HASH_REASON.to_string(),
            });
        }

        self.enter(file_name, Stage::ExtractMetadata);
        let extracted = self.recover(
            file_name,
            Stage::ExtractMetadata,
            self.extract(&request.source, format),
            || Metadata::fallback(file_name),
        )?;
        let details = BookDetails::settle(request, extracted, file_name, self.config);
        let scope = Scope {
            is_public: request.is_public,
            uploader_id: &request.user_id,
        };

        let plan = plan_conversion(format, self.config);
        let stored_format = match plan {
            Some(plan) if plan.policy == ConversionPolicy::Replace => plan.to,
            _ => format,
        };

        self.enter(file_name, Stage::DedupBySameFormat);
        let same_format = index.find_same_format(
            &details.title,
            &details.author,
            stored_format.extension(),
            scope,
        );
        if let Some(existing) = self.required(Stage::DedupBySameFormat, same_format)? {
            return Err(Halt::Skipped {
                existing_id: existing.id,
                reason: SAME_FORMAT_REASON.to_string(),
            });
        }

        let mut payload = request.source.clone();
        let mut payload_staged = false;
        let mut derived_output: Option<(PathBuf, BookFormat)> = None;
        if let Some(plan) = plan.filter(|plan| plan.policy != ConversionPolicy::BestEffort) {
            self.enter(file_name, Stage::Convert);
            let group_has_target = plan.policy == ConversionPolicy::Mandatory
                && self
                    .required(
                        Stage::Convert,
                        index.find_same_format(&details.title, &details.author, plan.to.extension(), scope),
                    )?
                    .is_some();
            if group_has_target {
                log::info!("{}: group already holds {}, not converting", file_name, plan.to);
            } else {
                let output = self.required(
                    Stage::Convert,
                    self.convert(&request.source, plan, &details, staging),
                )?;
                if plan.policy == ConversionPolicy::Replace {
                    payload = output;
                    payload_staged = true;
                } else {
                    derived_output = Some((output, plan.to));
                }
            }
        }

        self.enter(file_name, Stage::LinkSiblings);
        let siblings = self.required(
            Stage::LinkSiblings,
            index.find_siblings(&details.title, &details.author, scope),
        )?;
        let root = root_of(&siblings).cloned();
        let parent_book_id = root.as_ref().map(|book| book.root_id().to_string());

        self.enter(file_name, Stage::PlanPath);
        let dir = match root.as_ref().and_then(|book| book.directory()) {
            Some(dir) => dir.to_path_buf(),
            None => self.required(
                Stage::PlanPath,
                self.planner.plan(
                    &details.category,
                    &details.author,
                    &details.title,
                    request.is_public,
                    request.owner_name.as_deref(),
                ),
            )?,
        };

        self.enter(file_name, Stage::Place);
        let mode = if payload_staged || request.delete_source {
            PlaceMode::Move
        } else {
            PlaceMode::Copy
        };
        let stored_name = stored_file_name(request.sequence, &details.title, stored_format);
        let placed = self.required(
            Stage::Place,
            place_file(&payload, &dir, &stored_name, &hash, mode),
        )?;
        if mode == PlaceMode::Move && !payload_staged {
            attempt.moved(placed.clone(), payload.clone());
        } else {
            attempt.placed(placed.clone());
        }

        self.enter(file_name, Stage::Persist);
        let new_book = self.required(
            Stage::Persist,
            details.new_book(request, &placed, stored_format, &hash, parent_book_id),
        )?;
        let mut book = match insert_book(self.conn, &new_book) {
            Ok(book) => book,
            Err(err) if is_unique_violation(&err, "file_hash") => {
                // lost a race with a concurrent import of the same bytes
                let existing_id = index
                    .find_by_hash(&hash)
                    .ok()
                    .flatten()
                    .map(|book| book.id)
                    .unwrap_or_default();
                return Err(Halt::Skipped {
                    existing_id,
                    reason: SAME_HASH_REASON.to_string(),
                });
            }
            Err(err) => {
                return Err(Halt::Fatal {
                    stage: Stage::Persist,
                    error: err.into(),
                })
            }
        };
        attempt.inserted(book.id.clone());
        let group_root_id = book.root_id().to_string();

        let mut derived = Vec::new();
        if let Some((output, target)) = derived_output {
            let sibling = self.required(
                Stage::Persist,
                self.store_derived(&output, &dir, &details, target, &group_root_id, request, attempt),
            )?;
            derived.extend(sibling);
        }

        self.enter(file_name, Stage::ResolveCover);
        let cover_url = self.resolve_cover(file_name, request, &details, &dir, root.as_ref(), attempt);
        if let Some(url) = cover_url.as_deref() {
            for row in std::iter::once(&mut book).chain(derived.iter_mut()) {
                let updated = db::set_cover_url(self.conn, &row.id, Some(url));
                if self.recover(file_name, Stage::ResolveCover, updated.map(|_| true), || false)? {
                    row.cover_url = Some(url.to_string());
                }
            }
        }

        if let Some(plan) = plan.filter(|plan| plan.policy == ConversionPolicy::BestEffort) {
            self.enter(file_name, Stage::BestEffortConvert);
            let extra = self.best_effort_convert(
                request,
                &placed,
                plan,
                &details,
                &dir,
                &group_root_id,
                cover_url.as_deref(),
                staging,
            );
            if let Some(extra) = self.recover(file_name, Stage::BestEffortConvert, extra, || None)? {
                derived.push(extra);
            }
        }

        if !request.is_public {
            self.enter(file_name, Stage::AutoShelf);
            let shelved = db::add_to_shelf(self.conn, &request.user_id, &book.id);
            self.recover(file_name, Stage::AutoShelf, shelved, || ())?;
        }

        // the converted file was stored in place of the source
        if payload_staged && request.delete_source {
            if let Err(err) = remove_file_if_exists(&request.source) {
                log::warn!("could not remove source {}: {}", request.source.display(), err);
            }
        }

        Ok((book, derived))
    }

    fn extract(&self, source: &Path, format: BookFormat) -> Result<Metadata, ExtractionError> {
        let extractor = Arc::clone(&self.extractor);
        let path = source.to_path_buf();
        run_with_timeout("extract", self.config.adapter_timeout(), move || {
            extractor.extract(&path, format)
        })?
    }

    fn convert(
        &self,
        source: &Path,
        plan: ConversionPlan,
        details: &BookDetails,
        staging: &Path,
    ) -> Result<PathBuf, IngestError> {
        let converter = Arc::clone(&self.converter);
        let source = source.to_path_buf();
        let hints = ConversionHints {
            title: details.title.clone(),
            author: details.author.clone(),
            language: details.language.clone(),
            output_dir: staging.join(plan.to.extension()),
        };
        let output = run_with_timeout("convert", self.config.adapter_timeout(), move || {
            converter.convert(&source, plan.from, plan.to, &hints)
        })??;
        Ok(output)
    }

    /// Store a converter output as an alternate format of `root_id`. Returns
    /// `None` when the same bytes are already catalogued.
    #[allow(clippy::too_many_arguments)]
    fn store_derived(
        &self,
        output: &Path,
        dir: &Path,
        details: &BookDetails,
        format: BookFormat,
        root_id: &str,
        request: &ImportRequest,
        attempt: &mut AttemptLog,
    ) -> Result<Option<Book>, IngestError> {
        let hash = hash_file(output).map_err(|err| IngestError::filesystem(output, err))?;
        if let Some(existing) = DedupIndex::new(self.conn).find_by_hash(&hash)? {
            log::info!("derived {} matches existing book {}", format, existing.id);
            return Ok(None);
        }
        let name = stored_file_name(request.sequence, &details.title, format);
        let placed = place_file(output, dir, &name, &hash, PlaceMode::Move)?;
        attempt.placed(placed.clone());
        let new_book = details.new_book(request, &placed, format, &hash, Some(root_id.to_string()))?;
        match insert_book(self.conn, &new_book) {
            Ok(book) => {
                attempt.inserted(book.id.clone());
                Ok(Some(book))
            }
            Err(err) if is_unique_violation(&err, "file_hash") => {
                remove_file_if_exists(&placed).map_err(|err| IngestError::filesystem(&placed, err))?;
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Office -> PDF from the copy already in the library, since a moved
    /// source is gone by now. Its writes are unwound on failure without
    /// touching the rest of the attempt.
    #[allow(clippy::too_many_arguments)]
    fn best_effort_convert(
        &self,
        request: &ImportRequest,
        original: &Path,
        plan: ConversionPlan,
        details: &BookDetails,
        dir: &Path,
        root_id: &str,
        cover_url: Option<&str>,
        staging: &Path,
    ) -> Result<Option<Book>, IngestError> {
        let scope = Scope {
            is_public: request.is_public,
            uploader_id: &request.user_id,
        };
        let present = DedupIndex::new(self.conn).find_same_format(
            &details.title,
            &details.author,
            plan.to.extension(),
            scope,
        )?;
        if present.is_some() {
            return Ok(None);
        }

        let mut side = AttemptLog::new(&self.config.storage_root);
        let result: Result<Option<Book>, IngestError> = (|| {
            let output = self.convert(original, plan, details, staging)?;
            let stored = self.store_derived(&output, dir, details, plan.to, root_id, request, &mut side)?;
            match stored {
                Some(mut book) => {
                    if let Some(url) = cover_url {
                        db::set_cover_url(self.conn, &book.id, Some(url))?;
                        book.cover_url = Some(url.to_string());
                    }
                    Ok(Some(book))
                }
                None => Ok(None),
            }
        })();
        if result.is_err() {
            side.rollback(self.conn);
        }
        result
    }

    /// Cover chain for the new row. Alternate formats reuse the group's cover
    /// unless the caller supplied one.
    fn resolve_cover(
        &self,
        file_name: &str,
        request: &ImportRequest,
        details: &BookDetails,
        dir: &Path,
        root: Option<&Book>,
        attempt: &mut AttemptLog,
    ) -> Option<String> {
        if request.cover.is_none() {
            let inherited = root
                .and_then(|book| book.cover_url.clone())
                .filter(|url| Path::new(url).is_file());
            if inherited.is_some() {
                return inherited;
            }
        }

        let resolved = self.covers.resolve(
            dir,
            &details.title,
            &details.author,
            details.cover.as_ref(),
            request.cover.as_ref(),
        );
        match resolved {
            Some(cover) => {
                for reason in &cover.fell_through {
                    self.observer.emit(&ImportEvent::Recovered {
                        file_name: file_name.to_string(),
                        stage: Stage::ResolveCover,
                        reason: reason.clone(),
                    });
                }
                attempt.cover(cover.path.clone());
                Some(cover.path.to_string_lossy().to_string())
            }
            None => {
                self.observer.emit(&ImportEvent::Recovered {
                    file_name: file_name.to_string(),
                    stage: Stage::ResolveCover,
                    reason: "no cover available".to_string(),
                });
                None
            }
        }
    }

    fn log_history(&self, request: &ImportRequest, file_name: &str, outcome: &ImportOutcome) {
        let (status, message) = match outcome {
            ImportOutcome::Imported { book, derived } => {
                (ImportStatus::Success, success_message(book, derived))
            }
            ImportOutcome::Skipped { reason, .. } => (ImportStatus::Skipped, reason.clone()),
            ImportOutcome::Failed { message, .. } => (ImportStatus::Error, message.clone()),
            ImportOutcome::Rejected { .. } => return,
        };
        self.enter(file_name, Stage::LogHistory);
        let entry = HistoryEntry {
            user_id: request.user_id.clone(),
            file_name: file_name.to_string(),
            file_path: Some(request.source.to_string_lossy().to_string()),
            status,
            message,
            book_id: outcome.book_id().map(str::to_string),
        };
        if let Err(err) = ImportHistoryLedger::new(self.conn).append(&entry) {
            self.observer.emit(&ImportEvent::Recovered {
                file_name: file_name.to_string(),
                stage: Stage::LogHistory,
                reason: err.to_string(),
            });
        }
    }

    fn enter(&self, file_name: &str, stage: Stage) {
        self.observer.emit(&ImportEvent::Entered {
            file_name: file_name.to_string(),
            stage,
        });
    }

    fn required<T, E>(&self, stage: Stage, result: Result<T, E>) -> Result<T, Halt>
    where
        E: Into<IngestError>,
    {
        match StageOutcome::required(result) {
            StageOutcome::Ok(value) | StageOutcome::Recovered { value, .. } => Ok(value),
            StageOutcome::Fatal(error) => Err(Halt::Fatal { stage, error }),
        }
    }

    fn recover<T, E>(
        &self,
        file_name: &str,
        stage: Stage,
        result: Result<T, E>,
        fallback: impl FnOnce() -> T,
    ) -> Result<T, Halt>
    where
        E: Into<IngestError>,
    {
        match StageOutcome::from_result(stage, result, fallback) {
            StageOutcome::Ok(value) => Ok(value),
            StageOutcome::Recovered { value, reason } => {
                self.observer.emit(&ImportEvent::Recovered {
                    file_name: file_name.to_string(),
                    stage,
                    reason,
                });
                Ok(value)
            }
            StageOutcome::Fatal(error) => Err(Halt::Fatal { stage, error }),
        }
    }
}

fn stored_file_name(sequence: Option<u32>, title: &str, format: BookFormat) -> String {
    match sequence {
        Some(sequence) => PathPlanner::sequenced_file_name(sequence, title, format.extension()),
        None => PathPlanner::file_name(title, format.extension()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(file_type: &str) -> Book {
        Book {
            id: "b1".to_string(),
            title: "Foo".to_string(),
            author: "Bar".to_string(),
            isbn: None,
            publisher: None,
            publish_date: None,
            description: None,
            category: "General".to_string(),
            language: "en".to_string(),
            rating: None,
            tags: vec![],
            file_path: format!("/lib/Foo.{}", file_type),
            file_name: format!("Foo.{}", file_type),
            file_size: 1,
            file_type: file_type.to_string(),
            file_hash: "h".to_string(),
            cover_url: None,
            uploader_id: "u1".to_string(),
            is_public: true,
            parent_book_id: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn request_name_defaults_to_source_file_name() {
        let mut request = ImportRequest::new("/inbox/tmp123/foo.txt", "u1");
        assert_eq!(request.file_name(), "foo.txt");
        request.original_name = Some("Foo Upload.txt".to_string());
        assert_eq!(request.file_name(), "Foo Upload.txt");
    }

    #[test]
    fn settle_prefers_request_then_extracted_then_fallback() {
        let config = LibraryConfig::default();
        let mut request = ImportRequest::new("/inbox/dune.epub", "u1");
        request.author = Some("  Frank Herbert ".to_string());
        let extracted = Metadata {
            title: Some("Dune".to_string()),
            author: Some("F. Herbert".to_string()),
            ..Metadata::default()
        };
        let details = BookDetails::settle(&request, extracted, "dune.epub", &config);
        assert_eq!(details.title, "Dune");
        assert_eq!(details.author, "Frank Herbert");
        assert_eq!(details.category, "Uncategorized");
        assert_eq!(details.language, "en");

        let details = BookDetails::settle(&request, Metadata::default(), "dune.epub", &config);
        assert_eq!(details.title, "dune");
    }

    #[test]
    fn manifest_sorts_outcomes_into_buckets() {
        let mut manifest = ImportManifest::default();
        manifest.record(
            "a.mobi",
            &ImportOutcome::Imported {
                book: book("mobi"),
                derived: vec![book("epub")],
            },
        );
        manifest.record(
            "b.epub",
            &ImportOutcome::Skipped {
                existing_id: "b1".to_string(),
                reason: SAME_HASH_REASON.to_string(),
            },
        );
        manifest.record(
            "c.mp3",
            &ImportOutcome::Rejected {
                reason: "unsupported file type: c.mp3".to_string(),
            },
        );
        assert_eq!(manifest.total(), 3);
        assert_eq!(manifest.imported[0].message, "imported as mobi (+ epub)");
        assert_eq!(manifest.skipped[0].book_id.as_deref(), Some("b1"));
        assert_eq!(manifest.errors[0].book_id, None);
    }

    #[test]
    fn sequence_prefixes_file_names() {
        assert_eq!(stored_file_name(Some(7), "Dune", BookFormat::Pdf), "0007_Dune.pdf");
        assert_eq!(stored_file_name(None, "Dune", BookFormat::Pdf), "Dune.pdf");
    }
}
