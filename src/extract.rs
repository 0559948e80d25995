//! Text extraction from files on disk.
//!
//! [`TextExtractor`] is the seam the ingestion pipeline pulls text through.
//! [`FileExtractor`] handles the supported extensions:
//!
//! | Extension | Strategy |
//! |-----------|----------|
//! | `txt`, `md`, `csv`, `json` | UTF-8 (lossy) |
//! | `html`, `htm` | tags, `<script>` and `<style>` stripped, entities decoded |
//! | `pdf` | `pdf-extract` |
//! | `docx` | `word/document.xml` via `zip` + `quick-xml` |
//!
//! A document that cannot be decoded yields an empty string and a
//! warning, never an error. Only I/O failures and oversized files are
//! errors.

use std::io::Read;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Pulls plain text out of a file.
///
/// Implementations run on a blocking thread and must be cheap to share.
pub trait TextExtractor: Send + Sync {
    /// Return the text of `path`, or an empty string when the format is
    /// unsupported or the content cannot be decoded.
    fn extract(&self, path: &Path) -> SyncResult<String>;
}

/// Format-level failure, reported as a warning by [`FileExtractor`].
#[derive(Debug)]
pub enum ExtractError {
    Pdf(String),
    Docx(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Docx(e) => write!(f, "DOCX extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extension-dispatching extractor used by the engine.
#[derive(Debug, Clone)]
pub struct FileExtractor {
    max_bytes: u64,
}

impl FileExtractor {
    /// Files larger than `max_bytes` are refused with [`SyncError::TooLarge`].
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }
}

impl TextExtractor for FileExtractor {
    fn extract(&self, path: &Path) -> SyncResult<String> {
        let size = std::fs::metadata(path)
            .map_err(|e| SyncError::io(path, e))?
            .len();
        if size > self.max_bytes {
            return Err(SyncError::TooLarge {
                path: path.to_path_buf(),
                size,
                limit: self.max_bytes,
            });
        }

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let bytes = std::fs::read(path).map_err(|e| SyncError::io(path, e))?;
        let result = match ext.as_str() {
            "txt" | "md" | "csv" | "json" => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            "html" | "htm" => Ok(strip_html(&String::from_utf8_lossy(&bytes))),
            "pdf" => extract_pdf(&bytes),
            "docx" => extract_docx(&bytes),
            other => {
                debug!(path = %path.display(), extension = other, "no extractor for extension");
                Ok(String::new())
            }
        };

        match result {
            Ok(text) => Ok(text),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not extract text");
                Ok(String::new())
            }
        }
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    extract_paragraph_text(&doc_xml)
}

/// Collect `<w:t>` runs, separating `<w:p>` paragraphs with blank lines so
/// the splitter can cut on them.
fn extract_paragraph_text(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if !out.is_empty() && !out.ends_with("\n\n") {
                        out.push_str("\n\n");
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

/// Tags that end a line of visible text.
const BLOCK_TAGS: [&str; 14] = [
    "p", "br", "div", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "section", "article",
    "table",
];

/// Reduce an HTML document to its visible text.
pub fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len() / 2);
    let mut rest = html;

    while let Some(lt) = rest.find('<') {
        text.push_str(&decode_entities(&rest[..lt]));
        let after = &rest[lt + 1..];
        let Some(gt) = after.find('>') else {
            rest = "";
            break;
        };
        let tag = &after[..gt];
        rest = &after[gt + 1..];

        let name: String = tag
            .trim_start_matches('/')
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        if !tag.starts_with('/') && (name == "script" || name == "style") {
            let closing = format!("</{}", name);
            rest = match rest.to_ascii_lowercase().find(&closing) {
                Some(pos) => rest[pos..].find('>').map_or("", |end| &rest[pos + end + 1..]),
                None => "",
            };
            continue;
        }
        if BLOCK_TAGS.contains(&name.as_str()) {
            text.push('\n');
        }
    }
    text.push_str(&decode_entities(rest));

    let lines: Vec<String> = text
        .lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect();
    let mut out = String::new();
    let mut blank_run = 0;
    for line in lines {
        if line.is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
        }
        out.push_str(&line);
        blank_run = 0;
    }
    out
}

fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn plain_formats_read_as_text() {
        let dir = TempDir::new().unwrap();
        let ex = FileExtractor::new(1024);
        for name in ["a.txt", "b.md", "c.csv", "d.json"] {
            let path = write(&dir, name, b"hello there");
            assert_eq!(ex.extract(&path).unwrap(), "hello there");
        }
    }

    #[test]
    fn invalid_pdf_yields_empty_text() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "bad.pdf", b"not a pdf");
        assert_eq!(FileExtractor::new(1024).extract(&path).unwrap(), "");
    }

    #[test]
    fn invalid_docx_yields_empty_text() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "bad.docx", b"not a zip");
        assert_eq!(FileExtractor::new(1024).extract(&path).unwrap(), "");
    }

    #[test]
    fn oversized_file_is_refused() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "big.txt", &[b'a'; 64]);
        let err = FileExtractor::new(10).extract(&path).unwrap_err();
        assert!(matches!(err, SyncError::TooLarge { size: 64, .. }));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = FileExtractor::new(10)
            .extract(&dir.path().join("nope.txt"))
            .unwrap_err();
        assert!(matches!(err, SyncError::Io { .. }));
    }

    #[test]
    fn html_is_stripped() {
        let html = r#"<html><head><title>T</title><style>p { color: red; }</style>
            <script>var x = "<p>";</script></head>
            <body><h1>Heading</h1><p>Fish &amp; chips</p><p>Second   para</p></body></html>"#;
        let text = strip_html(html);
        assert!(text.contains("Heading"));
        assert!(text.contains("Fish & chips"));
        assert!(text.contains("Second para"));
        assert!(!text.contains("color"));
        assert!(!text.contains("var x"));
        assert!(!text.contains('<'));
    }

    #[test]
    fn docx_paragraphs_are_separated() {
        let xml = br#"<w:document xmlns:w="x"><w:body>
            <w:p><w:r><w:t>First</w:t></w:r><w:r><w:t> line</w:t></w:r></w:p>
            <w:p><w:r><w:t>Second</w:t></w:r></w:p>
        </w:body></w:document>"#;
        assert_eq!(extract_paragraph_text(xml).unwrap(), "First line\n\nSecond");
    }
}
