//! Turns an uploaded file into plain text by its extension

use conclave_core::{ConclaveError, Result};
use tracing::debug;

/// Extensions accepted for upload, lowercase and without the dot
pub const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "md", "csv", "html", "pdf"];

/// Column width used when rendering HTML to text
const HTML_WIDTH: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Text,
    Markdown,
    Csv,
    Html,
    Pdf,
}

impl DocumentFormat {
    pub fn from_file_name(file_name: &str) -> Result<Self> {
        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "txt" => Ok(Self::Text),
            "md" => Ok(Self::Markdown),
            "csv" => Ok(Self::Csv),
            "html" => Ok(Self::Html),
            "pdf" => Ok(Self::Pdf),
            _ => Err(ConclaveError::validation(format!(
                "unsupported file format '{}'; supported formats: {}",
                file_name,
                SUPPORTED_EXTENSIONS
                    .iter()
                    .map(|e| format!(".{}", e))
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

/// Extract the text of `bytes` according to the extension of `file_name`.
///
/// PDF extraction is CPU bound; call this from `spawn_blocking`.
pub fn load_document(file_name: &str, bytes: &[u8]) -> Result<String> {
    let format = DocumentFormat::from_file_name(file_name)?;
    debug!("Loading '{}' as {:?} ({} bytes)", file_name, format, bytes.len());

    let text = match format {
        DocumentFormat::Text | DocumentFormat::Markdown | DocumentFormat::Csv => {
            String::from_utf8(bytes.to_vec()).map_err(|_| {
                ConclaveError::validation(format!("'{}' is not valid UTF-8 text", file_name))
            })?
        }
        DocumentFormat::Html => html2text::from_read(bytes, HTML_WIDTH),
        DocumentFormat::Pdf => pdf_extract::extract_text_from_mem(bytes).map_err(|e| {
            ConclaveError::validation(format!("could not read PDF '{}': {}", file_name, e))
        })?,
    };

    if text.trim().is_empty() {
        return Err(ConclaveError::validation(format!(
            "'{}' contains no text",
            file_name
        )));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_by_extension() {
        assert_eq!(DocumentFormat::from_file_name("notes.md").unwrap(), DocumentFormat::Markdown);
        assert_eq!(DocumentFormat::from_file_name("Report.PDF").unwrap(), DocumentFormat::Pdf);
        assert_eq!(DocumentFormat::from_file_name("a.b.csv").unwrap(), DocumentFormat::Csv);
        assert!(matches!(
            DocumentFormat::from_file_name("slides.pptx"),
            Err(ConclaveError::Validation(m)) if m.contains(".pdf")
        ));
        assert!(DocumentFormat::from_file_name("README").is_err());
    }

    #[test]
    fn test_plain_formats_pass_through() {
        let text = load_document("data.csv", b"name,days\nalice,20\n").unwrap();
        assert_eq!(text, "name,days\nalice,20\n");
        assert!(load_document("notes.txt", &[0xff, 0xfe, 0x00]).is_err());
        assert!(load_document("empty.md", b"  \n").is_err());
    }

    #[test]
    fn test_html_is_rendered_to_text() {
        let text = load_document(
            "page.html",
            b"<html><body><h1>Leave</h1><p>Vacation is twenty days.</p></body></html>",
        )
        .unwrap();
        assert!(text.contains("Vacation is twenty days."));
        assert!(!text.contains("<p>"));
    }

    #[test]
    fn test_broken_pdf_is_rejected() {
        assert!(matches!(
            load_document("scan.pdf", b"not a pdf"),
            Err(ConclaveError::Validation(_))
        ));
    }
}
