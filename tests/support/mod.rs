#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use folio_store::convert::{ConversionHints, FormatConverter};
use folio_store::cover::{CoverGenerator, TextCoverGenerator};
use folio_store::db::{insert_book, open_db};
use folio_store::error::{ConversionError, ExtractionError};
use folio_store::hasher::hash_file;
use folio_store::history::ImportHistoryLedger;
use folio_store::models::NewBook;
use folio_store::parser::{Metadata, MetadataExtractor};
use folio_store::paths::PathPlanner;
use folio_store::{
    Adapters, BookFormat, ImportEvent, ImportHistory, ImportRequest, Library, LibraryConfig,
    RecordingObserver,
};
use simplelog::{Config, LevelFilter, TestLogger};
use tempfile::TempDir;
use walkdir::WalkDir;

pub fn logging_init() {
    let _ = TestLogger::init(LevelFilter::Debug, Config::default());
}

/// A library in a temp dir with an inbox for source files. The database
/// lives outside the storage root so file counts only see library files.
pub struct Harness {
    pub dir: TempDir,
    pub inbox: PathBuf,
    pub library: Library,
    pub observer: Arc<RecordingObserver>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(|_, _| {})
    }

    pub fn with(setup: impl FnOnce(&mut LibraryConfig, &mut Adapters)) -> Self {
        logging_init();
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = LibraryConfig::with_storage_root(dir.path().join("library"));
        config.database_path = dir.path().join("db").join("folio.db");
        let mut adapters = Adapters::native(&config).expect("native adapters");
        setup(&mut config, &mut adapters);

        let observer = Arc::new(RecordingObserver::default());
        let library = Library::with_adapters(config, adapters)
            .expect("open library")
            .with_observer(observer.clone());
        let inbox = dir.path().join("inbox");
        std::fs::create_dir_all(&inbox).expect("inbox");
        Harness {
            dir,
            inbox,
            library,
            observer,
        }
    }

    pub fn storage(&self) -> PathBuf {
        self.library.config().storage_root.clone()
    }

    pub fn database_path(&self) -> PathBuf {
        self.library.config().database_path.clone()
    }

    pub fn write(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.inbox.join(name);
        std::fs::write(&path, bytes).expect("write source");
        path
    }

    /// Public request for `name` with explicit title and author.
    pub fn request(&self, name: &str, bytes: &[u8], title: &str, author: &str) -> ImportRequest {
        let path = self.write(name, bytes);
        let mut request = ImportRequest::new(path, "u1");
        request.title = Some(title.to_string());
        request.author = Some(author.to_string());
        request
    }

    /// Regular files below the storage root, sorted.
    pub fn stored_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(self.storage())
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect();
        files.sort();
        files
    }

    pub fn history_for(&self, file_name: &str) -> Vec<ImportHistory> {
        ImportHistoryLedger::new(self.library.connection())
            .for_file(file_name)
            .expect("history")
    }

    pub fn events(&self) -> Vec<ImportEvent> {
        self.observer.events()
    }
}

/// Always fails, like a converter whose external tool crashed.
pub struct FailingConverter;

impl FormatConverter for FailingConverter {
    fn convert(
        &self,
        _source: &Path,
        from: BookFormat,
        to: BookFormat,
        _hints: &ConversionHints,
    ) -> Result<PathBuf, ConversionError> {
        Err(ConversionError::Failed(format!("forced failure {} -> {}", from, to)))
    }
}

/// Writes `<title>.<target>` holding the source bytes behind a marker.
pub struct FakeConverter;

impl FormatConverter for FakeConverter {
    fn convert(
        &self,
        source: &Path,
        _from: BookFormat,
        to: BookFormat,
        hints: &ConversionHints,
    ) -> Result<PathBuf, ConversionError> {
        std::fs::create_dir_all(&hints.output_dir)?;
        let output = hints
            .output_dir
            .join(PathPlanner::file_name(&hints.title, to.extension()));
        let mut bytes = format!("converted to {}:", to).into_bytes();
        bytes.extend(std::fs::read(source)?);
        std::fs::write(&output, bytes)?;
        Ok(output)
    }
}

/// Reports success but never writes its output.
pub struct VanishingConverter;

impl FormatConverter for VanishingConverter {
    fn convert(
        &self,
        _source: &Path,
        _from: BookFormat,
        to: BookFormat,
        hints: &ConversionHints,
    ) -> Result<PathBuf, ConversionError> {
        Ok(hints.output_dir.join(format!("ghost.{}", to)))
    }
}

pub struct SlowExtractor {
    pub delay: Duration,
}

impl MetadataExtractor for SlowExtractor {
    fn extract(&self, _path: &Path, _format: BookFormat) -> Result<Metadata, ExtractionError> {
        std::thread::sleep(self.delay);
        Ok(Metadata::default())
    }
}

/// Commits a row with the source's hash from a second connection while the
/// pipeline is still extracting, like a concurrent upload of the same bytes.
pub struct RacingExtractor {
    pub database_path: PathBuf,
}

impl MetadataExtractor for RacingExtractor {
    fn extract(&self, path: &Path, _format: BookFormat) -> Result<Metadata, ExtractionError> {
        let conn = open_db(&self.database_path).expect("second connection");
        let hash = hash_file(path)?;
        insert_book(
            &conn,
            &NewBook {
                title: "Winner".to_string(),
                author: "Racer".to_string(),
                category: "Uncategorized".to_string(),
                language: "en".to_string(),
                file_path: format!("/elsewhere/{}", hash),
                file_name: "winner.pdf".to_string(),
                file_type: "pdf".to_string(),
                file_hash: hash,
                uploader_id: "u2".to_string(),
                is_public: true,
                ..NewBook::default()
            },
        )
        .expect("racing insert");
        Ok(Metadata::default())
    }
}

/// Minimal EPUB with Dublin Core title/creator and optionally a PNG cover.
pub fn write_epub(path: &Path, title: &str, creator: &str, cover: Option<&[u8]>) {
    let file = std::fs::File::create(path).expect("create epub");
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    zip.start_file("mimetype", options).expect("mimetype");
    zip.write_all(b"application/epub+zip").expect("write");
    zip.start_file("META-INF/container.xml", options).expect("container");
    zip.write_all(
        br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles><rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles>
</container>"#,
    )
    .expect("write");
    let cover_item = if cover.is_some() {
        r#"<item id="cover-img" href="cover.png" media-type="image/png" properties="cover-image"/>"#
    } else {
        ""
    };
    let opf = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>{}</dc:title>
    <dc:creator>{}</dc:creator>
    <dc:language>en</dc:language>
  </metadata>
  <manifest>{}</manifest>
</package>"#,
        title, creator, cover_item
    );
    zip.start_file("OEBPS/content.opf", options).expect("opf");
    zip.write_all(opf.as_bytes()).expect("write");
    if let Some(bytes) = cover {
        zip.start_file("OEBPS/cover.png", options).expect("cover");
        zip.write_all(bytes).expect("write");
    }
    zip.finish().expect("finish");
}

/// A real PNG, enough for the image sniffing in the cover chain.
pub fn png_bytes() -> Vec<u8> {
    TextCoverGenerator::without_font()
        .generate("Sample", "Cover")
        .expect("render")
        .bytes
}
