//! Stylesheet shared by every fragment of one assembly run.

use crate::llm::DataContent;
use regex::Regex;
use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};

static COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("valid comment pattern"));
static RULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([^{]+)\{([^}]+)\}").expect("valid rule pattern"));
static PROPERTY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([a-z\-]+)\s*:\s*([^;]+);?").expect("valid property pattern")
});
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));

/// Properties that matter for layout and look. Anything starting with one of
/// these (`margin-top`, `border-radius`, ...) is kept too.
const RELEVANT_PROPERTIES: &[&str] = &[
    "display",
    "position",
    "flex",
    "grid",
    "width",
    "height",
    "margin",
    "padding",
    "background",
    "color",
    "border",
    "font-size",
    "font-weight",
    "text-align",
    "gap",
    "justify-content",
    "align-items",
    "flex-direction",
    "overflow",
    "opacity",
];

/// Shrink a stylesheet for use as model context: comments go, whitespace
/// collapses, and only layout and visual properties survive. Rules left with
/// no properties are dropped.
pub fn compress_css(css: &str) -> String {
    let without_comments = COMMENT.replace_all(css, "");
    let mut out = String::new();

    for rule in RULE.captures_iter(&without_comments) {
        let selector = WHITESPACE.replace_all(rule[1].trim(), " ");
        let body = WHITESPACE.replace_all(rule[2].trim(), " ");

        let properties: Vec<String> = PROPERTY
            .captures_iter(&body)
            .filter(|p| {
                let name = &p[1];
                RELEVANT_PROPERTIES.iter().any(|r| name.starts_with(r))
            })
            .map(|p| format!("{}: {}", &p[1], p[2].trim()))
            .collect();

        if !properties.is_empty() {
            out.push_str(&format!("{} {{ {} }}\n", selector, properties.join("; ")));
        }
    }
    out
}

#[derive(Debug, Default)]
struct Sheets {
    full: String,
    compressed: String,
}

/// Append-only CSS buffer with a compressed view kept in step.
#[derive(Debug, Default)]
pub struct SharedStyleSheet {
    sheets: Mutex<Sheets>,
}

impl SharedStyleSheet {
    pub fn new() -> Self {
        Self::default()
    }

    fn sheets(&self) -> MutexGuard<'_, Sheets> {
        self.sheets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a block of CSS. Blank input is ignored.
    pub fn append(&self, css: &str) {
        let css = css.trim();
        if css.is_empty() {
            return;
        }
        let mut sheets = self.sheets();
        if !sheets.full.is_empty() {
            sheets.full.push('\n');
        }
        sheets.full.push_str(css);
        sheets.compressed = compress_css(&sheets.full);
    }

    pub fn full(&self) -> String {
        self.sheets().full.clone()
    }

    pub fn compressed(&self) -> String {
        self.sheets().compressed.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.sheets().full.is_empty()
    }

    /// The compressed view as an `index.css` attachment, if there is any CSS.
    pub fn as_attachment(&self) -> Option<DataContent> {
        let compressed = self.compressed();
        if compressed.is_empty() {
            return None;
        }
        Some(DataContent::new(compressed.into_bytes(), "text/css").named("index.css"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_compress_css() {
        let css = "/* header\n styles */\n.header {\n  display: flex;\n  transition: all 1s;\n  margin-top: 4px;\n}\n\
                   .fade { transition: opacity 1s }\n\
                   h1,\n  h2 { font-size: 2em; font-family: serif }";
        let compressed = compress_css(css);
        assert_eq!(
            compressed,
            ".header { display: flex; margin-top: 4px }\nh1, h2 { font-size: 2em }\n"
        );
    }

    #[test]
    fn test_append_skips_blank_css() {
        let sheet = SharedStyleSheet::new();
        sheet.append("   ");
        assert!(sheet.is_empty());
        assert!(sheet.as_attachment().is_none());

        sheet.append("p { color: red; }");
        let attachment = sheet.as_attachment().unwrap();
        assert_eq!(attachment.name.as_deref(), Some("index.css"));
        assert_eq!(attachment.media_type, "text/css");
    }

    #[test]
    fn test_concurrent_appends_are_all_kept() {
        let sheet = Arc::new(SharedStyleSheet::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let sheet = sheet.clone();
                std::thread::spawn(move || sheet.append(&format!(".c{i} {{ width: {i}px; }}")))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let full = sheet.full();
        for i in 0..16 {
            assert!(full.contains(&format!(".c{i} {{ width: {i}px; }}")));
        }
        assert_eq!(full.lines().count(), 16);
        assert_eq!(sheet.compressed(), compress_css(&full));
    }
}
