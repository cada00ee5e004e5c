use crate::chunking::normalize_whitespace;
use crate::error::IngestError;
use crate::models::{ExtractedText, ExtractionMetadata};
use lopdf::{Dictionary, Document, Object};

/// Turns raw PDF bytes into normalized text.
pub trait PdfExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Result<ExtractedText, IngestError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<ExtractedText, IngestError> {
        let document =
            Document::load_mem(bytes).map_err(|error| IngestError::Extraction(error.to_string()))?;

        let pages = document.get_pages();
        let mut page_texts = Vec::new();
        for page_no in pages.keys() {
            let text = document
                .extract_text(&[*page_no])
                .map_err(|error| IngestError::Extraction(format!("page {page_no}: {error}")))?;

            let normalized = normalize_whitespace(&text);
            if !normalized.is_empty() {
                page_texts.push(normalized);
            }
        }

        if page_texts.is_empty() {
            return Err(IngestError::Extraction(
                "pdf had no readable page text".to_string(),
            ));
        }

        Ok(ExtractedText {
            text: page_texts.join("\n\n"),
            metadata: ExtractionMetadata {
                page_count: pages.len() as u32,
                title: document_title(&document),
            },
        })
    }
}

fn document_title(document: &Document) -> Option<String> {
    let info = match document.trailer.get(b"Info").ok()? {
        Object::Reference(id) => document.get_dictionary(*id).ok()?,
        Object::Dictionary(dictionary) => dictionary,
        _ => return None,
    };
    title_from_info(info)
}

fn title_from_info(info: &Dictionary) -> Option<String> {
    let raw = info.get(b"Title").ok()?.as_str().ok()?;
    let title = decode_pdf_text(raw);
    let title = title.trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

/// PDF text strings are UTF-16BE when they carry a byte order mark.
fn decode_pdf_text(raw: &[u8]) -> String {
    match raw {
        [0xFE, 0xFF, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => String::from_utf8_lossy(raw).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_bytes_are_an_extraction_error() {
        let result = LopdfExtractor.extract(b"%PDF-1.4\n%broken");
        assert!(matches!(result, Err(IngestError::Extraction(_))));
    }

    #[test]
    fn utf16_titles_are_decoded() {
        let raw = [0xFE, 0xFF, 0x00, 0x50, 0x00, 0x75, 0x00, 0x6D, 0x00, 0x70];
        assert_eq!(decode_pdf_text(&raw), "Pump");
        assert_eq!(decode_pdf_text(b"Plain title"), "Plain title");
    }

    #[test]
    fn blank_titles_are_dropped() {
        let mut info = Dictionary::new();
        info.set("Title", Object::string_literal("   "));
        assert_eq!(title_from_info(&info), None);

        info.set("Title", Object::string_literal("Service Manual"));
        assert_eq!(title_from_info(&info).as_deref(), Some("Service Manual"));
    }
}
