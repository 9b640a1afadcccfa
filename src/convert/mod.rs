pub mod command;
pub mod txt;

use std::path::{Path, PathBuf};

use crate::config::LibraryConfig;
use crate::error::ConversionError;
use crate::models::BookFormat;

/// Extra information a converter may use for the generated document.
#[derive(Debug, Clone)]
pub struct ConversionHints {
    pub title: String,
    pub author: String,
    pub language: String,
    /// Directory the converter must write its output into.
    pub output_dir: PathBuf,
}

pub trait FormatConverter: Send + Sync {
    /// Convert `source` and return the path of the produced file.
    fn convert(
        &self,
        source: &Path,
        from: BookFormat,
        to: BookFormat,
        hints: &ConversionHints,
    ) -> Result<PathBuf, ConversionError>;
}

/// How a conversion failure affects the import of the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionPolicy {
    /// The output replaces the source; failure aborts this file.
    Replace,
    /// Source and output are both stored; failure rolls back the whole attempt.
    Mandatory,
    /// Output is stored as an extra format when it works; failure is ignored.
    BestEffort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionPlan {
    pub from: BookFormat,
    pub to: BookFormat,
    pub policy: ConversionPolicy,
}

pub fn plan_conversion(format: BookFormat, config: &LibraryConfig) -> Option<ConversionPlan> {
    let (to, policy) = match format {
        BookFormat::Txt if config.auto_convert_txt => (BookFormat::Epub, ConversionPolicy::Replace),
        BookFormat::Mobi if config.auto_convert_mobi => (BookFormat::Epub, ConversionPolicy::Mandatory),
        office if office.is_office() && config.auto_convert_office => {
            (BookFormat::Pdf, ConversionPolicy::BestEffort)
        }
        _ => return None,
    };
    Some(ConversionPlan {
        from: format,
        to,
        policy,
    })
}

/// Native TXT -> EPUB plus external tools for MOBI -> EPUB (Calibre) and
/// Office -> PDF (LibreOffice).
#[derive(Debug, Clone)]
pub struct DefaultConverter {
    pub ebook_convert_bin: String,
    pub office_convert_bin: String,
}

impl DefaultConverter {
    pub fn from_config(config: &LibraryConfig) -> Self {
        DefaultConverter {
            ebook_convert_bin: config.ebook_convert_bin.clone(),
            office_convert_bin: config.office_convert_bin.clone(),
        }
    }
}

impl FormatConverter for DefaultConverter {
    fn convert(
        &self,
        source: &Path,
        from: BookFormat,
        to: BookFormat,
        hints: &ConversionHints,
    ) -> Result<PathBuf, ConversionError> {
        match (from, to) {
            (BookFormat::Txt, BookFormat::Epub) => txt::txt_to_epub(source, hints),
            (BookFormat::Mobi, BookFormat::Epub) => {
                command::ebook_convert(&self.ebook_convert_bin, source, hints)
            }
            (office, BookFormat::Pdf) if office.is_office() => {
                command::office_to_pdf(&self.office_convert_bin, source, &hints.output_dir)
            }
            _ => Err(ConversionError::Unsupported {
                from: from.to_string(),
                to: to.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_table_follows_config_flags() {
        let mut config = LibraryConfig::default();
        config.auto_convert_office = true;

        let txt = plan_conversion(BookFormat::Txt, &config).expect("txt plan");
        assert_eq!((txt.to, txt.policy), (BookFormat::Epub, ConversionPolicy::Replace));
        let mobi = plan_conversion(BookFormat::Mobi, &config).expect("mobi plan");
        assert_eq!(mobi.policy, ConversionPolicy::Mandatory);
        let docx = plan_conversion(BookFormat::Docx, &config).expect("docx plan");
        assert_eq!((docx.to, docx.policy), (BookFormat::Pdf, ConversionPolicy::BestEffort));
        assert!(plan_conversion(BookFormat::Epub, &config).is_none());
        assert!(plan_conversion(BookFormat::Md, &config).is_none());

        config.auto_convert_mobi = false;
        config.auto_convert_txt = false;
        assert!(plan_conversion(BookFormat::Mobi, &config).is_none());
        assert!(plan_conversion(BookFormat::Txt, &config).is_none());
    }

    #[test]
    fn unknown_pairs_are_unsupported() {
        let converter = DefaultConverter::from_config(&LibraryConfig::default());
        let hints = ConversionHints {
            title: "t".to_string(),
            author: "a".to_string(),
            language: "en".to_string(),
            output_dir: std::env::temp_dir(),
        };
        let result = converter.convert(Path::new("x.pdf"), BookFormat::Pdf, BookFormat::Epub, &hints);
        assert!(matches!(result, Err(ConversionError::Unsupported { .. })));
    }
}
