use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use super::ConversionHints;
use crate::error::ConversionError;
use crate::paths::PathPlanner;

/// MOBI -> EPUB through Calibre's `ebook-convert`.
pub fn ebook_convert(bin: &str, source: &Path, hints: &ConversionHints) -> Result<PathBuf, ConversionError> {
    std::fs::create_dir_all(&hints.output_dir)?;
    let output = hints
        .output_dir
        .join(PathPlanner::file_name(&hints.title, "epub"));
    log::info!("ebook-convert {} -> {}", source.display(), output.display());
    let result = Command::new(bin)
        .arg(source)
        .arg(&output)
        .arg("--title")
        .arg(&hints.title)
        .arg("--authors")
        .arg(&hints.author)
        .output()?;
    check_status(&result)?;
    expect_output(output)
}

/// Office document -> PDF through `soffice --headless --convert-to pdf`.
/// LibreOffice names the output after the source stem.
pub fn office_to_pdf(bin: &str, source: &Path, output_dir: &Path) -> Result<PathBuf, ConversionError> {
    std::fs::create_dir_all(output_dir)?;
    log::info!("office convert {} -> {}", source.display(), output_dir.display());
    let result = Command::new(bin)
        .arg("--headless")
        .arg("--convert-to")
        .arg("pdf")
        .arg("--outdir")
        .arg(output_dir)
        .arg(source)
        .output()?;
    check_status(&result)?;
    let stem = source
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or("document");
    expect_output(output_dir.join(format!("{}.pdf", stem)))
}

fn check_status(result: &Output) -> Result<(), ConversionError> {
    if result.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&result.stderr);
    Err(ConversionError::Tool {
        status: result.status.to_string(),
        stderr: stderr.chars().take(500).collect(),
    })
}

fn expect_output(path: PathBuf) -> Result<PathBuf, ConversionError> {
    match std::fs::metadata(&path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(path),
        _ => Err(ConversionError::MissingOutput(path)),
    }
}
