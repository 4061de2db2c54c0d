//! Plain-text extraction for binary document formats pulled from Drive.
//!
//! Both extractors are CPU-bound and run on the blocking pool.

use std::io::{Cursor, Read};

use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::debug;
use zip::ZipArchive;

use super::SourceError;

const DOCX_BODY: &str = "word/document.xml";

/// Text of every page of a PDF, in page order.
pub async fn pdf_text(bytes: Vec<u8>) -> Result<String, SourceError> {
    let len = bytes.len();
    let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
        .await
        .map_err(|e| SourceError::Extract(format!("pdf extraction aborted: {e}")))?
        .map_err(|e| SourceError::Extract(format!("unreadable pdf: {e}")))?;
    debug!(bytes = len, chars = text.len(), "pdf text extracted");
    Ok(text)
}

/// Paragraph text of a Word document, one paragraph per line.
pub async fn docx_text(bytes: Vec<u8>) -> Result<String, SourceError> {
    tokio::task::spawn_blocking(move || docx_body_text(&bytes))
        .await
        .map_err(|e| SourceError::Extract(format!("docx extraction aborted: {e}")))?
}

fn docx_body_text(bytes: &[u8]) -> Result<String, SourceError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| SourceError::Extract(format!("not a docx archive: {e}")))?;
    let mut xml = String::new();
    archive
        .by_name(DOCX_BODY)
        .map_err(|e| SourceError::Extract(format!("{DOCX_BODY}: {e}")))?
        .read_to_string(&mut xml)
        .map_err(|e| SourceError::Extract(format!("{DOCX_BODY}: {e}")))?;
    document_xml_text(&xml)
}

/// Collect `<w:t>` runs; `<w:p>` ends a line, `<w:tab/>` and `<w:br/>` map
/// to a tab and a newline.
fn document_xml_text(xml: &str) -> Result<String, SourceError> {
    let mut reader = Reader::from_str(xml);
    let mut out = String::new();
    let mut in_run_text = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| SourceError::Extract(format!("bad document xml: {e}")))?;
        match event {
            Event::Start(e) if e.name().as_ref() == b"w:t" => in_run_text = true,
            Event::End(e) => match e.name().as_ref() {
                b"w:t" => in_run_text = false,
                b"w:p" => out.push('\n'),
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"w:tab" => out.push('\t'),
                b"w:br" | b"w:cr" => out.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_run_text => {
                let text = t
                    .unescape()
                    .map_err(|e| SourceError::Extract(format!("bad document text: {e}")))?;
                out.push_str(&text);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_DOCX: &[u8] = include_bytes!("../../tests/fixtures/apollo_plan.docx");
    const SAMPLE_PDF: &[u8] = include_bytes!("../../tests/fixtures/apollo_status.pdf");

    #[test]
    fn document_xml_paragraphs_and_runs() {
        let xml = r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>Launch </w:t></w:r><w:r><w:t xml:space="preserve">moved &amp; confirmed</w:t></w:r></w:p>
    <w:p><w:r><w:t>Owner:</w:t><w:tab/><w:t>Dana</w:t></w:r></w:p>
  </w:body>
</w:document>"#;
        let text = document_xml_text(xml).unwrap();
        assert_eq!(text, "Launch moved & confirmed\nOwner:\tDana\n");
    }

    #[tokio::test]
    async fn docx_fixture_extracts() {
        let text = docx_text(SAMPLE_DOCX.to_vec()).await.unwrap();
        assert!(text.contains("Apollo launch plan"), "{text}");
        assert!(text.contains("Launch moved to March 3."), "{text}");
    }

    #[tokio::test]
    async fn docx_rejects_non_zip() {
        let err = docx_text(b"plain text".to_vec()).await.unwrap_err();
        assert!(matches!(err, SourceError::Extract(_)));
    }

    #[tokio::test]
    async fn pdf_fixture_extracts() {
        let text = pdf_text(SAMPLE_PDF.to_vec()).await.unwrap();
        let words = text.split_whitespace().collect::<Vec<_>>().join(" ");
        assert!(words.contains("Apollo status green"), "{words}");
    }
}
