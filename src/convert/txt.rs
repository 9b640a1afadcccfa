use quick_xml::escape::escape;
use regex::Regex;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::ConversionHints;
use crate::error::ConversionError;
use crate::paths::PathPlanner;

const LINES_PER_SECTION: usize = 400;

static CHAPTER_RE: OnceLock<Regex> = OnceLock::new();

struct Chapter {
    heading: String,
    paragraphs: Vec<String>,
}

/// Plain text -> EPUB 3. Chapters are split on common heading patterns
/// (`Chapter 12`, `第十二章`, ...) and fall back to fixed-size sections.
pub fn txt_to_epub(source: &Path, hints: &ConversionHints) -> Result<PathBuf, ConversionError> {
    let raw = std::fs::read(source)?;
    let text = decode_text(&raw);
    let chapters = split_chapters(&text, &hints.title);

    std::fs::create_dir_all(&hints.output_dir)?;
    let output = hints
        .output_dir
        .join(PathPlanner::file_name(&hints.title, "epub"));
    let file = std::fs::File::create(&output)?;
    let mut zip = ZipWriter::new(file);

    // mimetype must be the first entry and stored uncompressed
    zip.start_file(
        "mimetype",
        SimpleFileOptions::default().compression_method(CompressionMethod::Stored),
    )?;
    zip.write_all(b"application/epub+zip")?;

    let options = SimpleFileOptions::default();
    zip.start_file("META-INF/container.xml", options)?;
    zip.write_all(CONTAINER_XML.as_bytes())?;

    zip.start_file("OEBPS/content.opf", options)?;
    zip.write_all(package_document(hints, chapters.len()).as_bytes())?;

    zip.start_file("OEBPS/nav.xhtml", options)?;
    zip.write_all(navigation_document(hints, &chapters).as_bytes())?;

    for (index, chapter) in chapters.iter().enumerate() {
        zip.start_file(format!("OEBPS/{}", chapter_file(index)), options)?;
        zip.write_all(chapter_document(hints, chapter).as_bytes())?;
    }
    zip.finish()?;

    log::info!(
        "converted {} to epub with {} chapters",
        source.display(),
        chapters.len()
    );
    Ok(output)
}

/// UTF-8 with or without BOM; anything else is decoded lossily.
fn decode_text(raw: &[u8]) -> String {
    let raw = raw.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(raw);
    String::from_utf8_lossy(raw).replace("\r\n", "\n").replace('\r', "\n")
}

fn split_chapters(text: &str, title: &str) -> Vec<Chapter> {
    let heading_re = CHAPTER_RE.get_or_init(|| {
        Regex::new(r"(?i)^(第[0-9零一二三四五六七八九十百千两]+[章节回卷]|chapter\s+[0-9ivxlc]+|prologue|epilogue)(\s.{0,40})?$")
            .expect("valid chapter regex")
    });

    let mut chapters: Vec<Chapter> = Vec::new();
    let mut current = Chapter {
        heading: title.to_string(),
        paragraphs: vec![],
    };
    let mut saw_heading = false;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if heading_re.is_match(trimmed) {
            saw_heading = true;
            if !current.paragraphs.is_empty() {
                chapters.push(current);
            }
            current = Chapter {
                heading: trimmed.to_string(),
                paragraphs: vec![],
            };
            continue;
        }
        current.paragraphs.push(trimmed.to_string());
        if !saw_heading && current.paragraphs.len() >= LINES_PER_SECTION {
            // no headings so far: keep sections bounded
            chapters.push(current);
            current = Chapter {
                heading: format!("{} ({})", title, chapters.len() + 1),
                paragraphs: vec![],
            };
        }
    }
    if !current.paragraphs.is_empty() || chapters.is_empty() {
        chapters.push(current);
    }
    chapters
}

fn chapter_file(index: usize) -> String {
    format!("chapter_{:04}.xhtml", index + 1)
}

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

fn package_document(hints: &ConversionHints, chapter_count: usize) -> String {
    let mut manifest = String::new();
    let mut spine = String::new();
    for index in 0..chapter_count {
        manifest.push_str(&format!(
            "    <item id=\"c{0}\" href=\"{1}\" media-type=\"application/xhtml+xml\"/>\n",
            index + 1,
            chapter_file(index)
        ));
        spine.push_str(&format!("    <itemref idref=\"c{}\"/>\n", index + 1));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="book-id">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="book-id">urn:uuid:{id}</dc:identifier>
    <dc:title>{title}</dc:title>
    <dc:creator>{author}</dc:creator>
    <dc:language>{language}</dc:language>
    <meta property="dcterms:modified">{modified}</meta>
  </metadata>
  <manifest>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
{manifest}  </manifest>
  <spine>
{spine}  </spine>
</package>
"#,
        id = uuid::Uuid::new_v4(),
        title = escape(hints.title.as_str()),
        author = escape(hints.author.as_str()),
        language = escape(hints.language.as_str()),
        modified = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
        manifest = manifest,
        spine = spine,
    )
}

fn navigation_document(hints: &ConversionHints, chapters: &[Chapter]) -> String {
    let entries: String = chapters
        .iter()
        .enumerate()
        .map(|(index, chapter)| {
            format!(
                "      <li><a href=\"{}\">{}</a></li>\n",
                chapter_file(index),
                escape(chapter.heading.as_str())
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head><title>{title}</title></head>
<body>
  <nav epub:type="toc">
    <ol>
{entries}    </ol>
  </nav>
</body>
</html>
"#,
        title = escape(hints.title.as_str()),
        entries = entries,
    )
}

fn chapter_document(hints: &ConversionHints, chapter: &Chapter) -> String {
    let body: String = chapter
        .paragraphs
        .iter()
        .map(|paragraph| format!("  <p>{}</p>\n", escape(paragraph.as_str())))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xml:lang="{language}">
<head><title>{heading}</title></head>
<body>
  <h2>{heading}</h2>
{body}</body>
</html>
"#,
        language = escape(hints.language.as_str()),
        heading = escape(chapter.heading.as_str()),
        body = body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::epub::read_epub;

    fn hints(dir: &Path) -> ConversionHints {
        ConversionHints {
            title: "Foo".to_string(),
            author: "Bar".to_string(),
            language: "en".to_string(),
            output_dir: dir.to_path_buf(),
        }
    }

    #[test]
    fn splits_on_chapter_headings() {
        let text = "Preface line\nChapter 1\nIt begins.\n\nChapter 2\nIt ends.\n";
        let chapters = split_chapters(text, "Foo");
        let headings: Vec<&str> = chapters.iter().map(|c| c.heading.as_str()).collect();
        assert_eq!(headings, vec!["Foo", "Chapter 1", "Chapter 2"]);
        assert_eq!(chapters[2].paragraphs, vec!["It ends.".to_string()]);
    }

    #[test]
    fn recognizes_cjk_headings() {
        let chapters = split_chapters("第一章 开始\n正文\n第二章\n更多", "书");
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].heading, "第一章 开始");
    }

    #[test]
    fn long_text_without_headings_is_sectioned() {
        let text: String = (0..LINES_PER_SECTION + 5).map(|i| format!("line {}\n", i)).collect();
        let chapters = split_chapters(&text, "Foo");
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[1].heading, "Foo (2)");
        assert_eq!(chapters[1].paragraphs.len(), 5);
    }

    #[test]
    fn empty_text_still_yields_one_chapter() {
        let chapters = split_chapters("", "Foo");
        assert_eq!(chapters.len(), 1);
    }

    #[test]
    fn output_is_a_readable_epub() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("foo.txt");
        std::fs::write(&source, "\u{feff}Chapter 1\nHello <world> & friends\n").expect("write");
        let out_dir = dir.path().join("out");

        let epub = txt_to_epub(&source, &hints(&out_dir)).expect("convert");

        assert_eq!(epub, out_dir.join("Foo.epub"));
        let meta = read_epub(&epub).expect("parse generated epub");
        assert_eq!(meta.title.as_deref(), Some("Foo"));
        assert_eq!(meta.author.as_deref(), Some("Bar"));
    }
}
