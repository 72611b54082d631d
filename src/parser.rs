//! Turns source files into clean text before chunking.
//!
//! HTML loses its markup (scripts and styles included), Markdown is reduced
//! to its text, JSON is pretty-printed, and everything goes through the same
//! whitespace cleanup.

use regex::{Captures, Regex};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

use crate::error::{Error, Result};
use crate::rag::Document;

static BLANK_RUNS: OnceLock<Regex> = OnceLock::new();
static SPACE_RUNS: OnceLock<Regex> = OnceLock::new();
static TRAILING_SPACES: OnceLock<Regex> = OnceLock::new();
static LEADING_SPACES: OnceLock<Regex> = OnceLock::new();

static HTML_COMMENT: OnceLock<Regex> = OnceLock::new();
static HTML_SCRIPT: OnceLock<Regex> = OnceLock::new();
static HTML_STYLE: OnceLock<Regex> = OnceLock::new();
static HTML_TAG: OnceLock<Regex> = OnceLock::new();
static NUMERIC_ENTITY: OnceLock<Regex> = OnceLock::new();

static MD_HEADING: OnceLock<Regex> = OnceLock::new();
static MD_QUOTE: OnceLock<Regex> = OnceLock::new();
static MD_LIST: OnceLock<Regex> = OnceLock::new();
static MD_LINK: OnceLock<Regex> = OnceLock::new();
static MD_BOLD: OnceLock<Regex> = OnceLock::new();
static MD_ITALIC: OnceLock<Regex> = OnceLock::new();
static MD_CODE: OnceLock<Regex> = OnceLock::new();

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static pattern compiles"))
}

/// Document type recorded in chunk metadata, from the file extension.
/// Unknown extensions are read as plain text.
pub fn doc_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("html") | Some("htm") => "html",
        Some("json") => "json",
        Some("md") | Some("markdown") => "md",
        Some("pdf") => "pdf",
        _ => "txt",
    }
}

/// Collapses runs of blank lines to one empty line and runs of spaces or
/// tabs to one space, drops spaces around line breaks, and trims.
pub fn clean_text(text: &str) -> String {
    let text = regex(&BLANK_RUNS, r"\n\s*\n\s*\n+").replace_all(text, "\n\n");
    let text = regex(&SPACE_RUNS, r"[ \t]+").replace_all(&text, " ");
    let text = regex(&TRAILING_SPACES, r" +\n").replace_all(&text, "\n");
    let text = regex(&LEADING_SPACES, r"\n +").replace_all(&text, "\n");
    text.trim().to_string()
}

fn decode_entities(text: &str) -> String {
    let text = regex(&NUMERIC_ENTITY, r"&#(\d+);").replace_all(text, |caps: &Captures| {
        caps[1]
            .parse::<u32>()
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Trimmed non-empty lines joined with single newlines.
fn text_lines<'a>(lines: impl Iterator<Item = &'a str>) -> String {
    lines
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Visible text of an HTML document, one text node per line.
pub fn html_to_text(html: &str) -> String {
    let html = regex(&HTML_COMMENT, r"(?s)<!--.*?-->").replace_all(html, "");
    let html = regex(&HTML_SCRIPT, r"(?is)<script\b[^>]*>.*?</script\s*>").replace_all(&html, "");
    let html = regex(&HTML_STYLE, r"(?is)<style\b[^>]*>.*?</style\s*>").replace_all(&html, "");
    let text = regex(&HTML_TAG, r"(?s)<[^>]*>").replace_all(&html, "\n");
    let text = decode_entities(&text);
    clean_text(&text_lines(text.lines()))
}

fn is_rule(line: &str) -> bool {
    let compact: String = line.chars().filter(|c| !c.is_whitespace()).collect();
    compact.len() >= 3
        && (compact.chars().all(|c| c == '-')
            || compact.chars().all(|c| c == '*')
            || compact.chars().all(|c| c == '_'))
}

fn markdown_line(line: &str) -> String {
    let line = regex(&MD_HEADING, r"^#{1,6}\s+").replace(line, "");
    let line = regex(&MD_QUOTE, r"^(?:>\s?)+").replace(&line, "");
    let line = regex(&MD_LIST, r"^(?:[-*+]|\d+[.)])\s+").replace(&line, "");
    let line = regex(&MD_LINK, r"!?\[([^\]]*)\]\([^)]*\)").replace_all(&line, "$1");
    let line = regex(&MD_BOLD, r"\*\*([^*]+)\*\*|__([^_]+)__").replace_all(&line, "$1$2");
    let line = regex(&MD_ITALIC, r"\*([^*\s][^*]*)\*|\b_([^_]+)_\b").replace_all(&line, "$1$2");
    let line = regex(&MD_CODE, r"`([^`]*)`").replace_all(&line, "$1");
    let line = regex(&HTML_TAG, r"(?s)<[^>]*>").replace_all(&line, "");
    decode_entities(&line)
}

/// Text of a Markdown document with markup removed: headings, quotes, list
/// markers, emphasis, links and code fences.
pub fn markdown_to_text(markdown: &str) -> String {
    let lines: Vec<String> = markdown
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with("```") && !line.starts_with("~~~") && !is_rule(line))
        .map(markdown_line)
        .collect();
    clean_text(&text_lines(lines.iter().map(String::as_str)))
}

/// Pretty-printed JSON, so keys and values read as text.
pub fn json_to_text(raw: &str) -> std::result::Result<String, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    Ok(clean_text(&serde_json::to_string_pretty(&value)?))
}

/// Extracts clean text from `raw` according to `doc_type`.
pub fn parse_document(raw: &str, source: &str, doc_type: &str) -> Result<Document> {
    let text = match doc_type {
        "html" => html_to_text(raw),
        "md" => markdown_to_text(raw),
        "json" => json_to_text(raw).map_err(|err| Error::Parse {
            name: source.to_string(),
            reason: err.to_string(),
        })?,
        "pdf" => {
            return Err(Error::Parse {
                name: source.to_string(),
                reason: "PDF documents are not supported; convert to text first".to_string(),
            })
        }
        _ => clean_text(raw),
    };

    debug!(source, doc_type, chars = text.chars().count(), "parsed document");
    Ok(Document {
        text,
        source: source.to_string(),
        doc_type: doc_type.to_string(),
    })
}

/// Reads and parses one file. The source name is the file name.
pub fn parse_file(path: &Path) -> Result<Document> {
    let source = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let doc_type = doc_type(path);
    if doc_type == "pdf" {
        return parse_document("", &source, doc_type);
    }

    let raw = fs::read_to_string(path)?;
    parse_document(&raw, &source, doc_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn clean_text_normalizes_whitespace() {
        let raw = "  Line one   with\t\tspaces  \n   Line two\n\n\n\nLine three  ";
        assert_eq!(clean_text(raw), "Line one with spaces\nLine two\n\nLine three");
    }

    #[test]
    fn html_drops_markup_scripts_and_styles() {
        let html = "<html><head><style>body { color: red }</style>\
                    <script>var x = '<b>';</script></head>\
                    <body><h1>Checkout</h1><p>Pay   with <b>PayPal</b> &amp; card.</p>\
                    <!-- hidden note --></body></html>";
        assert_eq!(html_to_text(html), "Checkout\nPay with\nPayPal\n& card.");
    }

    #[test]
    fn html_decodes_numeric_entities() {
        assert_eq!(html_to_text("<p>caf&#233; &lt;ok&gt;</p>"), "café <ok>");
    }

    #[test]
    fn markdown_is_reduced_to_text() {
        let md = "\
# Shipping Rules

Express shipping is **free** above $100.

- Standard: $10
- See [the guide](http://example.com/guide)

```
code line
```
---
1. Step _one_ uses `Test_ID`";
        assert_eq!(
            markdown_to_text(md),
            "Shipping Rules\nExpress shipping is free above $100.\nStandard: $10\nSee the guide\ncode line\nStep one uses Test_ID"
        );
    }

    #[test]
    fn json_is_pretty_printed_and_cleaned() {
        let text = json_to_text(r#"{"feature":"cart","rules":["a","b"]}"#).unwrap();
        assert!(text.starts_with("{\n\"feature\": \"cart\","));
        assert!(!text.contains("  "));
        assert!(text.ends_with("]\n}"));
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        let err = parse_document("{not json", "broken.json", "json").unwrap_err();
        assert!(matches!(err, Error::Parse { ref name, .. } if name == "broken.json"));
    }

    #[test]
    fn doc_type_from_extension() {
        assert_eq!(doc_type(&PathBuf::from("a/ui.HTM")), "html");
        assert_eq!(doc_type(&PathBuf::from("specs.markdown")), "md");
        assert_eq!(doc_type(&PathBuf::from("data.json")), "json");
        assert_eq!(doc_type(&PathBuf::from("notes")), "txt");
        assert_eq!(doc_type(&PathBuf::from("notes.rst")), "txt");
    }

    #[test]
    fn parse_file_uses_file_name_and_type() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ui_guide.html");
        fs::write(&path, "<div>Errors   show in <em>red</em>.</div>").unwrap();

        let document = parse_file(&path).unwrap();
        assert_eq!(document.source, "ui_guide.html");
        assert_eq!(document.doc_type, "html");
        assert_eq!(document.text, "Errors show in\nred\n.");

        let pdf = dir.path().join("specs.pdf");
        fs::write(&pdf, b"%PDF-1.4").unwrap();
        assert!(matches!(parse_file(&pdf), Err(Error::Parse { .. })));
    }
}
