//! Section tree and HTML composition.
//!
//! Branches of the assembler attach their sections to a shared tree while
//! they run. Once every branch is done, [`compose`] walks the tree depth
//! first, concatenating fragments and building the table of contents.

use crate::models::HtmlSnippet;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Anchor of the root section.
pub const ROOT_ANCHOR: &str = "top";

/// One heading of the report with its rendered fragment.
#[derive(Debug)]
pub struct SectionNode {
    level: u8,
    name: String,
    fragment: Mutex<Option<HtmlSnippet>>,
    children: Mutex<Vec<Arc<SectionNode>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SectionNode {
    pub fn new(level: u8, name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            level,
            name: name.into(),
            fragment: Mutex::new(None),
            children: Mutex::new(Vec::new()),
        })
    }

    pub fn with_fragment(level: u8, name: impl Into<String>, fragment: HtmlSnippet) -> Arc<Self> {
        let node = Self::new(level, name);
        node.set_fragment(fragment);
        node
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_fragment(&self, fragment: HtmlSnippet) {
        *lock(&self.fragment) = Some(fragment);
    }

    pub fn fragment(&self) -> Option<HtmlSnippet> {
        lock(&self.fragment).clone()
    }

    pub fn add_child(&self, child: Arc<SectionNode>) {
        lock(&self.children).push(child);
    }

    /// Create a child section and append it.
    pub fn child(&self, level: u8, name: impl Into<String>) -> Arc<SectionNode> {
        let child = Self::new(level, name);
        self.add_child(child.clone());
        child
    }

    pub fn children(&self) -> Vec<Arc<SectionNode>> {
        lock(&self.children).clone()
    }
}

/// A table of contents line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub level: u8,
    pub name: String,
    pub anchor: String,
}

/// Output of [`compose`].
#[derive(Debug, Clone, Default)]
pub struct ComposedDocument {
    /// Fragments in document order, each preceded by its anchor.
    pub body: String,
    /// CSS of all fragments in document order.
    pub css: String,
    pub toc: Vec<TocEntry>,
    pub toc_html: String,
}

impl ComposedDocument {
    /// The complete page: TOC placed, document closed.
    pub fn to_html(&self) -> String {
        place_toc(&self.body, &self.toc_html)
    }
}

fn slug(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

struct Composer {
    used: HashSet<String>,
    doc: ComposedDocument,
}

impl Composer {
    fn unique(&mut self, candidate: String) -> String {
        let mut anchor = candidate.clone();
        let mut n = 2;
        while !self.used.insert(anchor.clone()) {
            anchor = format!("{}-{}", candidate, n);
            n += 1;
        }
        anchor
    }

    fn visit(&mut self, node: &SectionNode, anchor: String) {
        self.doc.toc_html.push_str(&format!(
            "<li class='toc-item'><a href='#{}'>{}</a>",
            anchor,
            escape_html(&node.name)
        ));
        self.doc.toc.push(TocEntry {
            level: node.level,
            name: node.name.clone(),
            anchor: anchor.clone(),
        });

        self.doc.body.push_str(&format!("<div id='{}'>&nbsp;</div>\n", anchor));
        if let Some(fragment) = node.fragment() {
            self.doc.body.push_str(&fragment.html);
            self.doc.body.push('\n');
            if !fragment.new_css.trim().is_empty() {
                self.doc.css.push_str(fragment.new_css.trim());
                self.doc.css.push('\n');
            }
        }

        let children = node.children();
        if !children.is_empty() {
            self.doc.toc_html.push_str("<ul>");
            for child in children {
                let child_anchor = self.unique(format!("{}_{}", anchor, slug(&child.name)));
                self.visit(&child, child_anchor);
            }
            self.doc.toc_html.push_str("</ul>");
        }
        self.doc.toc_html.push_str("</li>");
    }
}

/// Walk the tree depth first and build the document parts.
///
/// The root is anchored at [`ROOT_ANCHOR`]; every other anchor is its
/// parent's anchor joined to its own name, with a numeric suffix if that is
/// already taken.
pub fn compose(root: &SectionNode) -> ComposedDocument {
    let mut composer = Composer {
        used: HashSet::from([ROOT_ANCHOR.to_string()]),
        doc: ComposedDocument::default(),
    };
    composer
        .doc
        .toc_html
        .push_str("<section class='toc'><ul class='toc-list'>");
    composer.visit(root, ROOT_ANCHOR.to_string());
    composer.doc.toc_html.push_str("</ul></section>");
    composer.doc
}

/// Put the TOC where the page asks for it (`<toc/>`), else right after the
/// opening `<body>` tag, else at the top; then close the document.
pub fn place_toc(body: &str, toc_html: &str) -> String {
    let mut html = if body.contains("<toc/>") {
        body.replacen("<toc/>", toc_html, 1)
    } else if let Some(open) = body.find("<body") {
        match body[open..].find('>') {
            Some(end) => {
                let at = open + end + 1;
                format!("{}{}{}", &body[..at], toc_html, &body[at..])
            }
            None => format!("{}{}", toc_html, body),
        }
    } else {
        format!("{}{}", toc_html, body)
    };
    html.push_str("</body></html>");
    html
}
