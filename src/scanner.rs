use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::error::{IngestError, Result};
use crate::import::{ImportManifest, ImportOrchestrator, ImportRequest};
use crate::models::BookFormat;

/// Request fields shared by every file found in one scan.
#[derive(Debug, Clone)]
pub struct ScanTemplate {
    pub user_id: String,
    pub owner_name: Option<String>,
    pub is_public: bool,
    pub category: Option<String>,
    /// Watched directories are copied from by default.
    pub delete_source: bool,
}

impl ScanTemplate {
    pub fn new(user_id: impl Into<String>) -> Self {
        ScanTemplate {
            user_id: user_id.into(),
            owner_name: None,
            is_public: true,
            category: None,
            delete_source: false,
        }
    }

    pub fn request_for(&self, path: &Path) -> ImportRequest {
        let mut request = ImportRequest::new(path, self.user_id.clone());
        request.owner_name = self.owner_name.clone();
        request.is_public = self.is_public;
        request.category = self.category.clone();
        request.delete_source = self.delete_source;
        request
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false)
}

/// Supported files below `root`, sorted by path. Hidden files and
/// directories (including the staging area) are skipped.
pub fn discover(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(IngestError::Validation(format!(
            "scan root is not a directory: {}",
            root.display()
        )));
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| !is_hidden(entry));
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                log::warn!("scan: skipping unreadable entry: {}", err);
                continue;
            }
        };
        if entry.file_type().is_file() && BookFormat::from_path(entry.path()).is_some() {
            files.push(entry.into_path());
        }
    }
    files.sort();
    log::info!("scan of {} found {} candidate files", root.display(), files.len());
    Ok(files)
}

/// Import everything [`discover`] finds, one file at a time.
pub fn scan_directory(
    orchestrator: &ImportOrchestrator<'_>,
    root: &Path,
    template: &ScanTemplate,
) -> Result<ImportManifest> {
    let requests: Vec<ImportRequest> = discover(root)?
        .iter()
        .map(|path| template.request_for(path))
        .collect();
    Ok(orchestrator.import_batch(&requests))
}
