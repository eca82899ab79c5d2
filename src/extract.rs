//! Plain-text extraction for binary corpus files.
//!
//! Markdown and plain text are read as UTF-8 by the corpus scanner; this
//! module handles PDF (via `pdf-extract`) and the two OOXML formats the
//! knowledge base accepts (DOCX, PPTX) by reading their XML parts out of
//! the ZIP container.

use std::io::{Cursor, Read};
use std::path::Path;

use quick_xml::events::Event;
use thiserror::Error;

pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";

/// Upper bound on decompressed bytes read from one ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
}

/// Content type for a corpus file, by extension. Unknown extensions are
/// treated as plain text.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("md") | Some("markdown") => MIME_MARKDOWN,
        Some("pdf") => MIME_PDF,
        Some("docx") => MIME_DOCX,
        Some("pptx") => MIME_PPTX,
        _ => MIME_TEXT,
    }
}

/// Whether files of this content type need [`extract_text`] rather than a
/// UTF-8 read.
pub fn is_binary(content_type: &str) -> bool {
    matches!(content_type, MIME_PDF | MIME_DOCX | MIME_PPTX)
}

pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    match content_type {
        MIME_PDF => pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| ExtractError::Pdf(e.to_string())),
        MIME_DOCX => extract_docx(bytes),
        MIME_PPTX => extract_pptx(bytes),
        other => Err(ExtractError::UnsupportedContentType(other.to_string())),
    }
}

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_entry(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_entry(&mut archive, "word/document.xml")?;
    text_runs(&xml)
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|n| {
            let num = n
                .strip_prefix("ppt/slides/slide")?
                .strip_suffix(".xml")?
                .parse::<u32>()
                .ok()?;
            Some((num, n.to_string()))
        })
        .collect();
    slides.sort();

    let mut pages = Vec::with_capacity(slides.len());
    for (_, name) in slides {
        let text = text_runs(&read_entry(&mut archive, &name)?)?;
        if !text.trim().is_empty() {
            pages.push(text);
        }
    }
    Ok(pages.join("\n\n"))
}

/// Concatenate `<*:t>` text runs, one line per `<*:p>` paragraph.
///
/// Word uses `w:t`/`w:p` and DrawingML uses `a:t`/`a:p`; matching on the
/// local name covers both.
fn text_runs(xml: &[u8]) -> Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if !out.is_empty() && !out.ends_with('\n') {
                        out.push('\n');
                    }
                }
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let text = t
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let opts = zip::write::SimpleFileOptions::default();
            for (name, body) in entries {
                writer.start_file(*name, opts).unwrap();
                writer.write_all(body.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn content_type_by_extension() {
        assert_eq!(content_type_for(Path::new("a/b.md")), MIME_MARKDOWN);
        assert_eq!(content_type_for(Path::new("notes.TXT")), MIME_TEXT);
        assert_eq!(content_type_for(Path::new("deck.PPTX")), MIME_PPTX);
        assert!(is_binary(content_type_for(Path::new("x.pdf"))));
        assert!(!is_binary(content_type_for(Path::new("x.md"))));
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let doc = r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>For tree planting, </w:t></w:r><w:r><w:t>contact the Parks Department.</w:t></w:r></w:p>
    <w:p><w:r><w:t>Fish &amp; chips on Fridays.</w:t></w:r></w:p>
  </w:body>
</w:document>"#;
        let bytes = zip_with(&[("word/document.xml", doc)]);
        let text = extract_text(&bytes, MIME_DOCX).unwrap();
        assert_eq!(
            text,
            "For tree planting, contact the Parks Department.\nFish & chips on Fridays."
        );
    }

    #[test]
    fn pptx_slides_in_numeric_order() {
        let slide = |s: &str| {
            format!(
                r#"<p:sld xmlns:p="p" xmlns:a="a"><p:cSld><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:cSld></p:sld>"#,
                s
            )
        };
        let s1 = slide("first");
        let s2 = slide("second");
        let s10 = slide("tenth");
        let bytes = zip_with(&[
            ("ppt/slides/slide10.xml", &s10),
            ("ppt/slides/slide2.xml", &s2),
            ("ppt/slides/slide1.xml", &s1),
        ]);
        let text = extract_text(&bytes, MIME_PPTX).unwrap();
        assert_eq!(text, "first\n\nsecond\n\ntenth");
    }

    #[test]
    fn docx_without_body_part_fails() {
        let bytes = zip_with(&[("word/styles.xml", "<x/>")]);
        assert!(matches!(
            extract_text(&bytes, MIME_DOCX),
            Err(ExtractError::Ooxml(_))
        ));
    }

    #[test]
    fn garbage_inputs_fail_cleanly() {
        assert!(matches!(
            extract_text(b"not a pdf", MIME_PDF),
            Err(ExtractError::Pdf(_))
        ));
        assert!(matches!(
            extract_text(b"not a zip", MIME_PPTX),
            Err(ExtractError::Ooxml(_))
        ));
        assert!(matches!(
            extract_text(b"x", MIME_TEXT),
            Err(ExtractError::UnsupportedContentType(_))
        ));
    }
}
