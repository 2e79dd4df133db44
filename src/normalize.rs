//! Multi-format document normalization.
//!
//! Converts raw fetcher output (PDF, DOCX, HTML news pages, filing text,
//! plain text) into clean plain text plus whatever structural metadata can
//! be recovered: a title, an inferable ticker, and a publish date. Pure
//! transform, no side effects.
//!
//! A parse failure confined to part of a document (a bad page, a truncated
//! XML stream) keeps the text recovered so far and sets the `degraded`
//! flag; only a document that cannot be parsed at all fails with
//! [`PipelineError::UnsupportedFormat`].

use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::Read;

use crate::error::{PipelineError, Result};
use crate::models::DocumentFormat;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb
/// protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// How far into the text metadata sniffing looks.
const METADATA_SCAN_BYTES: usize = 4000;

/// Output of normalization: clean text plus recovered metadata.
#[derive(Debug, Clone)]
pub struct NormalizedText {
    pub text: String,
    pub title: Option<String>,
    pub ticker: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub degraded: bool,
}

/// Normalize raw bytes into plain text.
///
/// `declared` is the fetcher's format claim; when absent the format is
/// sniffed from the bytes.
///
/// # Errors
///
/// - [`PipelineError::UnsupportedFormat`] when the format cannot be
///   determined or parsed at all.
/// - [`PipelineError::EmptyContent`] when normalization yields no usable
///   text.
pub fn normalize(bytes: &[u8], declared: Option<DocumentFormat>) -> Result<NormalizedText> {
    let format = match declared {
        Some(f) => f,
        None => sniff_format(bytes)?,
    };

    let (raw, mut degraded) = match format {
        DocumentFormat::Pdf => extract_pdf(bytes)?,
        DocumentFormat::Docx => extract_docx(bytes)?,
        DocumentFormat::Html => extract_html(bytes)?,
        DocumentFormat::Text => extract_text(bytes),
    };

    if raw.contains('\u{FFFD}') {
        degraded = true;
    }

    let text = clean_text(&raw);
    if text.trim().is_empty() {
        return Err(PipelineError::EmptyContent);
    }

    let head_end = floor_char_boundary(&text, METADATA_SCAN_BYTES);
    let head = &text[..head_end];

    Ok(NormalizedText {
        title: infer_title(&text),
        ticker: infer_ticker(head),
        published_at: infer_published_at(head),
        text,
        degraded,
    })
}

/// Determine the format from magic bytes and content shape.
pub fn sniff_format(bytes: &[u8]) -> Result<DocumentFormat> {
    if bytes.starts_with(b"%PDF-") {
        return Ok(DocumentFormat::Pdf);
    }
    if bytes.starts_with(b"PK\x03\x04") {
        return Ok(DocumentFormat::Docx);
    }
    match std::str::from_utf8(bytes) {
        Ok(s) => {
            let head = s.trim_start().get(..256).unwrap_or(s.trim_start());
            let lower = head.to_lowercase();
            if lower.starts_with("<!doctype html")
                || lower.starts_with("<html")
                || lower.contains("<body")
            {
                Ok(DocumentFormat::Html)
            } else {
                Ok(DocumentFormat::Text)
            }
        }
        Err(_) => Err(PipelineError::UnsupportedFormat(
            "unable to determine format from content".to_string(),
        )),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<(String, bool)> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| PipelineError::UnsupportedFormat(format!("pdf: {e}")))?;
    Ok((text, false))
}

fn extract_text(bytes: &[u8]) -> (String, bool) {
    match std::str::from_utf8(bytes) {
        Ok(s) => (s.to_string(), false),
        Err(_) => (String::from_utf8_lossy(bytes).into_owned(), true),
    }
}

fn extract_docx(bytes: &[u8]) -> Result<(String, bool)> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| PipelineError::UnsupportedFormat(format!("docx: {e}")))?;

    let mut doc_xml = Vec::new();
    {
        let entry = archive
            .by_name("word/document.xml")
            .map_err(|e| PipelineError::UnsupportedFormat(format!("docx: {e}")))?;
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut doc_xml)
            .map_err(|e| PipelineError::UnsupportedFormat(format!("docx: {e}")))?;
    }
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(PipelineError::UnsupportedFormat(
            "docx: word/document.xml exceeds size limit".to_string(),
        ));
    }

    let mut out = String::new();
    let mut degraded = false;
    let mut reader = quick_xml::Reader::from_reader(doc_xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text = true;
                }
            }
            Ok(quick_xml::events::Event::Text(te)) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                // paragraph boundary
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(_) => {
                // Keep what was recovered before the malformed region.
                degraded = true;
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    if degraded && out.trim().is_empty() {
        return Err(PipelineError::UnsupportedFormat(
            "docx: document.xml is malformed".to_string(),
        ));
    }
    Ok((out, degraded))
}

/// Strip markup from an HTML page, skipping script/style bodies and
/// decoding common entities. Block-level closers become line breaks.
fn extract_html(bytes: &[u8]) -> Result<(String, bool)> {
    let (source, degraded) = extract_text(bytes);
    let mut out = String::with_capacity(source.len() / 2);
    let mut chars = source.char_indices().peekable();
    let mut skip_until: Option<&'static str> = None;

    while let Some((i, c)) = chars.next() {
        if c != '<' {
            if skip_until.is_none() {
                push_decoded(&mut out, &source, i, c, &mut chars);
            }
            continue;
        }
        // Collect the tag name and find the closing '>'.
        let rest = &source[i + 1..];
        let close = match rest.find('>') {
            Some(p) => p,
            None => break, // truncated tag at EOF
        };
        let tag_body = &rest[..close];
        let tag_name: String = tag_body
            .trim_start_matches('/')
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        let is_closing = tag_body.starts_with('/');

        if let Some(want) = skip_until {
            if is_closing && tag_name == want {
                skip_until = None;
            }
        } else {
            match tag_name.as_str() {
                "script" if !is_closing => skip_until = Some("script"),
                "style" if !is_closing => skip_until = Some("style"),
                "br" | "p" | "div" | "li" | "tr" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                    if is_closing || tag_name == "br" {
                        out.push('\n');
                    }
                }
                _ => {}
            }
        }
        // Consume up to and including '>'.
        while let Some(&(j, _)) = chars.peek() {
            if j > i + 1 + close {
                break;
            }
            chars.next();
        }
    }

    Ok((out, degraded))
}

/// Decode an entity starting at `&`, or push the char through unchanged.
fn push_decoded(
    out: &mut String,
    source: &str,
    i: usize,
    c: char,
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
) {
    if c != '&' {
        out.push(c);
        return;
    }
    let rest = &source[i + 1..];
    let semi = match rest.find(';') {
        Some(p) if p <= 10 => p,
        _ => {
            out.push('&');
            return;
        }
    };
    let name = &rest[..semi];
    let decoded = match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => name
            .strip_prefix('#')
            .and_then(|n| n.parse::<u32>().ok())
            .and_then(char::from_u32),
    };
    match decoded {
        Some(d) => {
            out.push(d);
            // consume through ';'
            while let Some(&(j, _)) = chars.peek() {
                if j > i + 1 + semi {
                    break;
                }
                chars.next();
            }
        }
        None => out.push('&'),
    }
}

static EDGAR_TAG_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*</?(?:DOCUMENT|TYPE|SEQUENCE|FILENAME|TEXT|SEC-HEADER)[^\n]*\n?").unwrap()
});

/// Normalize whitespace and strip SEC EDGAR wrapper markup.
pub fn clean_text(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text = EDGAR_TAG_LINE.replace_all(&text, "");

    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in text.lines() {
        let mut compact = String::with_capacity(line.len());
        let mut prev_space = false;
        for c in line.chars() {
            if c.is_whitespace() {
                if !prev_space {
                    compact.push(' ');
                }
                prev_space = true;
            } else {
                compact.push(c);
                prev_space = false;
            }
        }
        let trimmed = compact.trim();
        if trimmed.is_empty() {
            blank_run += 1;
            // collapse blank runs to a single paragraph break
            if blank_run == 1 && !out.is_empty() {
                out.push('\n');
            }
        } else {
            blank_run = 0;
            out.push_str(trimmed);
            out.push('\n');
        }
    }
    out.trim().to_string()
}

/// First non-empty line, minus heading markers, capped at 120 chars.
fn infer_title(text: &str) -> Option<String> {
    let line = text
        .lines()
        .map(|l| l.trim_start_matches('#').trim())
        .find(|l| !l.is_empty())?;
    let end = floor_char_boundary(line, 120);
    Some(line[..end].to_string())
}

static TICKER_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:NASDAQ|NYSE|Nasdaq|Ticker|TICKER|ticker)\s*:\s*([A-Z]{1,5})\b").unwrap()
});

/// Pull a ticker out of exchange-style hints like `(NASDAQ: AAPL)`.
pub fn infer_ticker(text: &str) -> Option<String> {
    TICKER_HINT
        .captures(text)
        .map(|c| c.get(1).unwrap().as_str().to_string())
}

static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b((?:19|20)\d{2})-(\d{2})-(\d{2})\b").unwrap());

static LONG_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(January|February|March|April|May|June|July|August|September|October|November|December)\s+(\d{1,2}),\s+((?:19|20)\d{2})\b",
    )
    .unwrap()
});

/// Find a publish date near the top of the document, preferring ISO form.
pub fn infer_published_at(text: &str) -> Option<DateTime<Utc>> {
    if let Some(c) = ISO_DATE.captures(text) {
        let date = NaiveDate::from_ymd_opt(
            c[1].parse().ok()?,
            c[2].parse().ok()?,
            c[3].parse().ok()?,
        )?;
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    if let Some(c) = LONG_DATE.captures(text) {
        let month = match &c[1] {
            "January" => 1,
            "February" => 2,
            "March" => 3,
            "April" => 4,
            "May" => 5,
            "June" => 6,
            "July" => 7,
            "August" => 8,
            "September" => 9,
            "October" => 10,
            "November" => 11,
            _ => 12,
        };
        let date = NaiveDate::from_ymd_opt(c[3].parse().ok()?, month, c[2].parse().ok()?)?;
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}

/// Largest byte index `<= max` that falls on a char boundary.
fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut i = max;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_pdf_magic() {
        assert_eq!(
            sniff_format(b"%PDF-1.7 rest").unwrap(),
            DocumentFormat::Pdf
        );
    }

    #[test]
    fn sniffs_html() {
        assert_eq!(
            sniff_format(b"  <!DOCTYPE html><html><body>x</body></html>").unwrap(),
            DocumentFormat::Html
        );
    }

    #[test]
    fn binary_garbage_is_unsupported() {
        let err = sniff_format(&[0xFF, 0xFE, 0x00, 0x9C]).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedFormat(_)));
    }

    #[test]
    fn invalid_pdf_is_unsupported() {
        let err = normalize(b"not really a pdf", Some(DocumentFormat::Pdf)).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedFormat(_)));
    }

    #[test]
    fn whitespace_only_is_empty_content() {
        let err = normalize(b"   \n\t\n  ", Some(DocumentFormat::Text)).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyContent));
    }

    #[test]
    fn html_strips_tags_and_decodes_entities() {
        let html = b"<html><head><style>p{color:red}</style></head>\
                     <body><h1>Apple Q1 Results</h1><p>Revenue &amp; profit rose.</p>\
                     <script>var x = 1;</script></body></html>";
        let n = normalize(html.as_slice(), None).unwrap();
        assert!(n.text.contains("Apple Q1 Results"));
        assert!(n.text.contains("Revenue & profit rose."));
        assert!(!n.text.contains("color:red"));
        assert!(!n.text.contains("var x"));
    }

    #[test]
    fn clean_text_collapses_whitespace() {
        let cleaned = clean_text("a   b\t\tc\n\n\n\nnext   para");
        assert_eq!(cleaned, "a b c\n\nnext para");
    }

    #[test]
    fn clean_text_strips_edgar_markers() {
        let cleaned = clean_text("<DOCUMENT>\n<TYPE>10-K\nActual filing body here.\n</DOCUMENT>");
        assert_eq!(cleaned, "Actual filing body here.");
    }

    #[test]
    fn infers_title_from_first_line() {
        let n = normalize(
            b"# Apple Reports First Quarter Results\n\nBody text.",
            Some(DocumentFormat::Text),
        )
        .unwrap();
        assert_eq!(
            n.title.as_deref(),
            Some("Apple Reports First Quarter Results")
        );
    }

    #[test]
    fn infers_ticker_from_exchange_hint() {
        assert_eq!(
            infer_ticker("Apple Inc. (NASDAQ: AAPL) today announced").as_deref(),
            Some("AAPL")
        );
        assert_eq!(infer_ticker("no hint here"), None);
    }

    #[test]
    fn infers_iso_and_long_dates() {
        let d = infer_published_at("Filed 2024-02-01 with the SEC").unwrap();
        assert_eq!(d.format("%Y-%m-%d").to_string(), "2024-02-01");

        let d = infer_published_at("CUPERTINO, February 1, 2024 -- Apple").unwrap();
        assert_eq!(d.format("%Y-%m-%d").to_string(), "2024-02-01");
    }

    #[test]
    fn lossy_text_is_degraded() {
        let mut bytes = b"Quarterly report ".to_vec();
        bytes.push(0xFF);
        bytes.extend_from_slice(b" with solid growth.");
        let n = normalize(&bytes, Some(DocumentFormat::Text)).unwrap();
        assert!(n.degraded);
        assert!(n.text.contains("Quarterly report"));
    }
}
