use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Source formats accepted by the ingestion pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookFormat {
    Epub,
    Pdf,
    Txt,
    Mobi,
    Docx,
    Doc,
    Xlsx,
    Xls,
    Pptx,
    Md,
}

pub const SUPPORTED_FORMATS: [BookFormat; 10] = [
    BookFormat::Epub,
    BookFormat::Pdf,
    BookFormat::Txt,
    BookFormat::Mobi,
    BookFormat::Docx,
    BookFormat::Doc,
    BookFormat::Xlsx,
    BookFormat::Xls,
    BookFormat::Pptx,
    BookFormat::Md,
];

impl BookFormat {
    /// Parse an extension with or without the leading dot, case-insensitive.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.trim().trim_start_matches('.').to_lowercase();
        SUPPORTED_FORMATS
            .iter()
            .copied()
            .find(|format| format.extension() == ext)
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|value| value.to_str())
            .and_then(Self::from_extension)
    }

    pub fn extension(&self) -> &'static str {
        match self {
            BookFormat::Epub => "epub",
            BookFormat::Pdf => "pdf",
            BookFormat::Txt => "txt",
            BookFormat::Mobi => "mobi",
            BookFormat::Docx => "docx",
            BookFormat::Doc => "doc",
            BookFormat::Xlsx => "xlsx",
            BookFormat::Xls => "xls",
            BookFormat::Pptx => "pptx",
            BookFormat::Md => "md",
        }
    }

    pub fn is_office(&self) -> bool {
        matches!(
            self,
            BookFormat::Docx | BookFormat::Doc | BookFormat::Xlsx | BookFormat::Xls | BookFormat::Pptx
        )
    }
}

impl fmt::Display for BookFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// One catalog row: a single physical file.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Book {
    pub id: String, // UUID
    pub title: String,
    pub author: String,
    pub isbn: Option<String>,
    pub publisher: Option<String>,
    pub publish_date: Option<String>,
    pub description: Option<String>,
    pub category: String,
    pub language: String,
    pub rating: Option<f64>,
    pub tags: Vec<String>,
    pub file_path: String,
    pub file_name: String,
    pub file_size: i64,
    pub file_type: String, // extension without dot
    pub file_hash: String,
    pub cover_url: Option<String>,
    pub uploader_id: String,
    pub is_public: bool,
    /// Set when this row is an alternate format of another book.
    pub parent_book_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Book {
    pub fn is_root(&self) -> bool {
        self.parent_book_id.is_none()
    }

    /// Id of the group root this row belongs to.
    pub fn root_id(&self) -> &str {
        self.parent_book_id.as_deref().unwrap_or(&self.id)
    }

    pub fn directory(&self) -> Option<&Path> {
        Path::new(&self.file_path).parent()
    }
}

/// Values for a row about to be inserted; ids and timestamps are assigned on insert.
#[derive(Debug, Clone, Default)]
pub struct NewBook {
    pub title: String,
    pub author: String,
    pub isbn: Option<String>,
    pub publisher: Option<String>,
    pub publish_date: Option<String>,
    pub description: Option<String>,
    pub category: String,
    pub language: String,
    pub tags: Vec<String>,
    pub file_path: String,
    pub file_name: String,
    pub file_size: i64,
    pub file_type: String,
    pub file_hash: String,
    pub uploader_id: String,
    pub is_public: bool,
    pub parent_book_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Success,
    Skipped,
    Error,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Success => "success",
            ImportStatus::Skipped => "skipped",
            ImportStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(ImportStatus::Success),
            "skipped" => Some(ImportStatus::Skipped),
            "error" => Some(ImportStatus::Error),
            _ => None,
        }
    }
}

/// Audit record for one import attempt.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ImportHistory {
    pub id: String,
    pub user_id: String,
    pub file_name: String,
    pub file_path: Option<String>,
    pub status: ImportStatus,
    pub message: String,
    pub book_id: Option<String>,
    pub created_at: i64,
}
