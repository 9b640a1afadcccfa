use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),
    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),
    #[error("Cover error: {0}")]
    Cover(#[from] CoverError),
    #[error("{0}")]
    Timeout(#[from] TimeoutError),
    #[error("Book not found: {0}")]
    NotFound(String),
    #[error("Config error: {0}")]
    Config(String),
}

impl IngestError {
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IngestError::Filesystem {
            path: path.into(),
            source,
        }
    }
}

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("no metadata reader for .{0}")]
    Unsupported(String),
    #[error("unreadable file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed container: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("malformed document: {0}")]
    Malformed(String),
    #[error("{0}")]
    Timeout(#[from] TimeoutError),
}

#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("no converter for {from} -> {to}")]
    Unsupported { from: String, to: String },
    #[error("converter io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to write container: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("converter exited with {status}: {stderr}")]
    Tool { status: String, stderr: String },
    #[error("converter produced no output at {0}")]
    MissingOutput(PathBuf),
    #[error("{0}")]
    Timeout(#[from] TimeoutError),
    #[error("{0}")]
    Failed(String),
}

#[derive(Error, Debug)]
pub enum CoverError {
    #[error("cover io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("cover download failed: {0}")]
    Download(#[from] reqwest::Error),
    #[error("cover rejected: {0}")]
    Rejected(String),
    #[error("cover render failed: {0}")]
    Render(String),
    #[error("{0}")]
    Timeout(#[from] TimeoutError),
}

#[derive(Error, Debug, Clone)]
#[error("{operation} timed out after {secs}s", secs = .after.as_secs())]
pub struct TimeoutError {
    pub operation: String,
    pub after: Duration,
}

pub type Result<T> = std::result::Result<T, IngestError>;
