//! Text extraction for uploaded course materials (PDF, DOCX/DOC, TXT).
//!
//! Callers supply bytes plus a declared [`SourceType`];
//! this module returns UTF-8 text that has already been through
//! [`clean_text`]. Empty output is legal and yields zero chunks downstream.

use std::io::Read;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::error::ExtractError;
use crate::models::SourceType;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const DOCUMENT_XML: &str = "word/document.xml";

/// Extract and clean text from in-memory document bytes.
pub fn extract_text(bytes: &[u8], source_type: SourceType) -> Result<String, ExtractError> {
    let raw = match source_type {
        SourceType::Pdf => extract_pdf(bytes)?,
        SourceType::Docx | SourceType::Doc => extract_docx(bytes)?,
        SourceType::Txt => String::from_utf8_lossy(bytes).into_owned(),
    };
    Ok(clean_text(&raw))
}

/// Normalize extracted text before chunking and storage.
///
/// Strips NUL bytes, drops control characters other than `\n`, `\r`, `\t`,
/// and collapses every run of ASCII whitespace into a single space.
/// Applying it twice gives the same result as applying it once.
pub fn clean_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_whitespace = false;
    for c in input.chars() {
        if (c as u32) < 32 && !matches!(c, '\n' | '\r' | '\t') {
            continue;
        }
        if c.is_ascii_whitespace() {
            if !in_whitespace {
                out.push(' ');
                in_whitespace = true;
            }
            continue;
        }
        in_whitespace = false;
        out.push(c);
    }
    out
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    // pdf-extract panics on some malformed inputs instead of returning an error.
    let pages = catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(bytes)
    }))
    .map_err(|_| ExtractError::decode("pdf", "parser panicked on malformed input"))?
    .map_err(|e| ExtractError::decode("pdf", e))?;

    let mut out = String::new();
    for page in pages {
        out.push_str(&page);
        out.push('\n');
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::decode("docx", e))?;
    let xml = read_zip_entry_bounded(&mut archive, DOCUMENT_XML, MAX_XML_ENTRY_BYTES)?;
    extract_paragraphs(&xml)
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::decode("docx", format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::decode("docx", e))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::decode(
            "docx",
            format!("ZIP entry {} exceeds size limit ({} bytes)", name, max_bytes),
        ));
    }
    Ok(out)
}

/// Walk `word/document.xml` in order, emitting each `<w:p>` paragraph's
/// `<w:t>` runs followed by a newline.
fn extract_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"tab" => out.push('\t'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"p" => out.push('\n'),
                b"tab" => out.push('\t'),
                b"br" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::decode("docx", e))?;
                out.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::decode("docx", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}
