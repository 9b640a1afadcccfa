use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{IngestError, Result};

/// Settings for the ingestion engine.
///
/// Built once (usually from a TOML file) and handed to [`crate::Library`];
/// nothing in the pipeline re-reads settings mid-import.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct LibraryConfig {
    /// Root of the canonical tree (`public/` and `private/` live below it).
    pub storage_root: PathBuf,
    pub database_path: PathBuf,
    pub auto_convert_txt: bool,
    pub auto_convert_mobi: bool,
    pub auto_convert_office: bool,
    pub adapter_timeout_secs: u64,
    pub cover_download_timeout_secs: u64,
    pub default_category: String,
    pub default_language: String,
    /// TTF used to letter generated covers. Without one the card is left blank.
    pub cover_font: Option<PathBuf>,
    pub ebook_convert_bin: String,
    pub office_convert_bin: String,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        LibraryConfig {
            storage_root: PathBuf::from("library"),
            database_path: PathBuf::from("folio.db"),
            auto_convert_txt: true,
            auto_convert_mobi: true,
            auto_convert_office: false,
            adapter_timeout_secs: 120,
            cover_download_timeout_secs: 15,
            default_category: "Uncategorized".to_string(),
            default_language: "en".to_string(),
            cover_font: None,
            ebook_convert_bin: "ebook-convert".to_string(),
            office_convert_bin: "soffice".to_string(),
        }
    }
}

impl LibraryConfig {
    /// Config rooted at `storage_root` with the database stored inside it.
    pub fn with_storage_root(storage_root: impl Into<PathBuf>) -> Self {
        let storage_root = storage_root.into();
        LibraryConfig {
            database_path: storage_root.join("folio.db"),
            storage_root,
            ..LibraryConfig::default()
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: LibraryConfig =
            toml::from_str(raw).map_err(|err| IngestError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| IngestError::filesystem(path, err))?;
        let config = Self::from_toml_str(&raw)?;
        log::info!("config loaded from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage_root.as_os_str().is_empty() {
            return Err(IngestError::Config("storage_root must not be empty".to_string()));
        }
        if self.adapter_timeout_secs == 0 || self.cover_download_timeout_secs == 0 {
            return Err(IngestError::Config("timeouts must be greater than zero".to_string()));
        }
        if self.default_category.trim().is_empty() {
            return Err(IngestError::Config("default_category must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_secs)
    }

    pub fn cover_download_timeout(&self) -> Duration {
        Duration::from_secs(self.cover_download_timeout_secs)
    }

    /// Scratch space for converter output, kept inside the storage root so the
    /// final rename stays on one filesystem.
    pub fn staging_root(&self) -> PathBuf {
        self.storage_root.join(".staging")
    }
}
