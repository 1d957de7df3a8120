//! Page-aware text extraction for uploaded documents (plain text, PDF, DOCX).
//!
//! Every extractor returns an ordered list of [`Page`]s numbered from 1.
//! Failures are reported as [`Error::Extraction`] and never panic; the
//! indexer records them against the one file and moves on.

use std::io::Read;

use documind_core::models::{FileKind, Page, SourceDocument};
use documind_core::{Error, Result};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extract the pages of an uploaded document.
///
/// Runs on a blocking thread: PDF parsing is CPU-bound and can take a while
/// on large files.
pub async fn extract(doc: &SourceDocument) -> Result<Vec<Page>> {
    let kind = doc
        .kind
        .ok_or_else(|| Error::UnsupportedFormat(doc.filename.clone()))?;
    let bytes = doc.bytes.clone();
    tokio::task::spawn_blocking(move || extract_pages(&bytes, kind))
        .await
        .map_err(|e| Error::Extraction(format!("extraction task failed: {}", e)))?
}

/// Synchronous extraction for a known file kind.
pub fn extract_pages(bytes: &[u8], kind: FileKind) -> Result<Vec<Page>> {
    match kind {
        FileKind::Text => extract_text(bytes),
        FileKind::Pdf => extract_pdf(bytes),
        FileKind::Docx => extract_docx(bytes),
    }
}

fn extract_text(bytes: &[u8]) -> Result<Vec<Page>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Error::Extraction(format!("invalid UTF-8: {}", e)))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    Ok(vec![Page::new(1, text)])
}

fn extract_pdf(bytes: &[u8]) -> Result<Vec<Page>> {
    // The PDF parser panics on some malformed inputs.
    let result =
        std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
            .map_err(|_| Error::Extraction("PDF parser panicked".to_string()))?;
    let pages = result.map_err(|e| Error::Extraction(format!("PDF: {}", e)))?;

    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| Page::new(i as u32 + 1, text))
        .collect())
}

fn extract_docx(bytes: &[u8]) -> Result<Vec<Page>> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| Error::Extraction(format!("DOCX: {}", e)))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| Error::Extraction("DOCX: word/document.xml not found".to_string()))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| Error::Extraction(format!("DOCX: {}", e)))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(Error::Extraction(
            "DOCX: word/document.xml exceeds size limit".to_string(),
        ));
    }

    docx_pages(&doc_xml)
}

/// Walk `word/document.xml`: paragraphs and line breaks become lines,
/// explicit page breaks start a new page. Empty paragraphs are skipped.
fn docx_pages(xml: &[u8]) -> Result<Vec<Page>> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut pages: Vec<Vec<String>> = vec![Vec::new()];
    let mut paragraph = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"p" => paragraph.clear(),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"br" if is_page_break(&e) => {
                    flush_paragraph(&mut paragraph, &mut pages);
                    pages.push(Vec::new());
                }
                b"br" | b"cr" => paragraph.push('\n'),
                b"tab" => paragraph.push('\t'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| Error::Extraction(format!("DOCX: {}", e)))?;
                paragraph.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => flush_paragraph(&mut paragraph, &mut pages),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Extraction(format!("DOCX: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    flush_paragraph(&mut paragraph, &mut pages);

    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, paragraphs)| Page::new(i as u32 + 1, paragraphs.join("\n")))
        .collect())
}

fn is_page_break(e: &quick_xml::events::BytesStart<'_>) -> bool {
    e.attributes().flatten().any(|a| {
        a.key.local_name().as_ref() == b"type" && a.value.as_ref() == b"page"
    })
}

fn flush_paragraph(paragraph: &mut String, pages: &mut [Vec<String>]) {
    if !paragraph.trim().is_empty() {
        if let Some(page) = pages.last_mut() {
            page.push(std::mem::take(paragraph));
        }
    }
    paragraph.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_with_body(body: &str) -> Vec<u8> {
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}</w:body></w:document>"#,
            body
        );
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut cursor);
            let opts = zip::write::SimpleFileOptions::default();
            zip.start_file("word/document.xml", opts).unwrap();
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn plain_text_is_page_one() {
        let pages = extract_pages(b"The sky is blue.", FileKind::Text).unwrap();
        assert_eq!(pages, vec![Page::new(1, "The sky is blue.")]);
    }

    #[test]
    fn invalid_utf8_is_an_extraction_error() {
        let err = extract_pages(&[0xff, 0xfe, 0x41], FileKind::Text).unwrap_err();
        assert_eq!(err.kind(), "extraction");
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_pages(b"not a pdf", FileKind::Pdf).unwrap_err();
        assert_eq!(err.kind(), "extraction");
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_pages(b"not a zip", FileKind::Docx).unwrap_err();
        assert_eq!(err.kind(), "extraction");
    }

    #[test]
    fn docx_paragraphs_join_with_newlines() {
        let bytes = docx_with_body(
            "<w:p><w:r><w:t>Hello </w:t></w:r><w:r><w:t>world</w:t></w:r></w:p>\
             <w:p></w:p>\
             <w:p><w:r><w:t>Second paragraph.</w:t></w:r></w:p>",
        );
        let pages = extract_pages(&bytes, FileKind::Docx).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].text, "Hello world\nSecond paragraph.");
    }

    #[test]
    fn docx_page_breaks_start_new_pages() {
        let bytes = docx_with_body(
            "<w:p><w:r><w:t>Page one.</w:t></w:r></w:p>\
             <w:p><w:r><w:br w:type=\"page\"/></w:r></w:p>\
             <w:p><w:r><w:t>Page two &amp; more.</w:t></w:r></w:p>",
        );
        let pages = extract_pages(&bytes, FileKind::Docx).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0], Page::new(1, "Page one."));
        assert_eq!(pages[1], Page::new(2, "Page two & more."));
    }

    #[test]
    fn docx_line_break_is_not_a_page_break() {
        let bytes = docx_with_body("<w:p><w:r><w:t>a</w:t><w:br/><w:t>b</w:t></w:r></w:p>");
        let pages = extract_pages(&bytes, FileKind::Docx).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].text, "a\nb");
    }

    #[tokio::test]
    async fn unknown_extension_is_unsupported() {
        let doc = SourceDocument::new("image.png", vec![1, 2, 3]);
        let err = extract(&doc).await.unwrap_err();
        assert_eq!(err.kind(), "unsupported_format");
    }

    #[tokio::test]
    async fn extract_runs_off_thread() {
        let doc = SourceDocument::new("notes.md", b"# Notes".to_vec());
        let pages = extract(&doc).await.unwrap();
        assert_eq!(pages[0].text, "# Notes");
    }
}
