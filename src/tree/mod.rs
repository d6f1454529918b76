//! Component tree – the typed document description handed to the pipeline,
//! and the server-side renderer that turns it into markup.
//!
//! Nodes are either server-renderable (elements, text, page references) or
//! explicitly tagged as client-only. Client nodes never reach the renderer
//! untouched: the detection pass in [`crate::client`] swaps each one for a
//! [`Node::Placeholder`] first.

pub mod parse;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use parse::parse_html;

/// Attribute marking a client component's mount container.
pub const CLIENT_ATTR: &str = "data-docpress-client";
/// Attribute marking a "total pages" reference.
pub const TOTAL_PAGES_ATTR: &str = "data-docpress-total-pages";
/// Attribute marking a "current page number" reference.
pub const PAGE_NUMBER_ATTR: &str = "data-docpress-page-number";
/// Text left inside total-page references until pagination resolves them.
pub const TOTAL_PAGES_TOKEN: &str = "{{docpress:total-pages}}";

/// Elements that never have children or a closing tag.
const VOID_ELEMENTS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

pub fn is_void_element(tag: &str) -> bool {
    VOID_ELEMENTS.iter().any(|v| v.eq_ignore_ascii_case(tag))
}

/// A node in the component tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Node {
    Element(Element),
    Text { text: String },
    /// A subtree that only renders correctly inside a real DOM.
    Client(ClientNode),
    /// Mount container left behind by client detection.
    Placeholder { id: String, source: String },
    /// Resolves to the document's final page count.
    TotalPages,
    /// Resolves to the number of the page the node lands on.
    PageNumber,
}

impl Node {
    pub fn text(text: impl Into<String>) -> Self {
        Node::Text { text: text.into() }
    }

    pub fn element(tag: impl Into<String>) -> Element {
        Element::new(tag)
    }

    pub fn client(source: impl Into<String>, props: serde_json::Value) -> Self {
        Node::Client(ClientNode {
            source: source.into(),
            props,
            key: None,
            fallback: Vec::new(),
        })
    }
}

impl From<Element> for Node {
    fn from(e: Element) -> Self {
        Node::Element(e)
    }
}

/// An element node carrying tag, attributes, and children.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Element {
    pub tag: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    #[serde(default)]
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attrs: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    pub fn class(self, classes: impl Into<String>) -> Self {
        self.attr("class", classes)
    }

    pub fn child(mut self, node: impl Into<Node>) -> Self {
        self.children.push(node.into());
        self
    }

    pub fn text(self, text: impl Into<String>) -> Self {
        self.child(Node::text(text))
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attrs
            .get("class")
            .map(|c| c.split_whitespace())
            .into_iter()
            .flatten()
    }
}

/// A client-only component reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientNode {
    /// Module specifier the component is loaded from (e.g. `charts/bar.js`).
    pub source: String,
    /// Props handed to the component's mount function.
    #[serde(default)]
    pub props: serde_json::Value,
    /// Optional author-supplied identity, folded into the client id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Nested nodes. They belong to the client subtree and are not rendered
    /// on the server.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallback: Vec<Node>,
}

impl ClientNode {
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// Walk every node depth-first, handing each one its tree path.
///
/// The path is the list of child indices from the root list, so `[0, 2]` is
/// the third child of the first root node.
pub fn walk<'a>(nodes: &'a [Node], visit: &mut dyn FnMut(&'a Node, &[usize]) -> bool) {
    fn go<'a>(
        nodes: &'a [Node],
        path: &mut Vec<usize>,
        visit: &mut dyn FnMut(&'a Node, &[usize]) -> bool,
    ) {
        for (i, node) in nodes.iter().enumerate() {
            path.push(i);
            let descend = visit(node, path.as_slice());
            if descend {
                if let Node::Element(e) = node {
                    go(&e.children, path, visit);
                }
            }
            path.pop();
        }
    }
    let mut path = Vec::new();
    go(nodes, &mut path, visit);
}

// ---------------------------------------------------------------------------
// Server rendering
// ---------------------------------------------------------------------------

/// The rendering framework seam: turns a tree into server markup.
pub trait MarkupRenderer: Send + Sync {
    fn render(&self, nodes: &[Node]) -> String;
}

/// Default renderer for the typed tree.
#[derive(Debug, Default, Clone)]
pub struct HtmlRenderer;

impl MarkupRenderer for HtmlRenderer {
    fn render(&self, nodes: &[Node]) -> String {
        let mut out = String::new();
        for node in nodes {
            render_node(node, &mut out);
        }
        out
    }
}

fn render_node(node: &Node, out: &mut String) {
    match node {
        Node::Element(e) => {
            out.push('<');
            out.push_str(&e.tag);
            for (k, v) in &e.attrs {
                out.push(' ');
                out.push_str(k);
                out.push_str("=\"");
                out.push_str(&escape_attr(v));
                out.push('"');
            }
            out.push('>');
            if is_void_element(&e.tag) {
                return;
            }
            for child in &e.children {
                render_node(child, out);
            }
            out.push_str("</");
            out.push_str(&e.tag);
            out.push('>');
        }
        Node::Text { text } => out.push_str(&escape_text(text)),
        Node::Placeholder { id, source } => {
            out.push_str(&format!(
                "<div id=\"{}\" {CLIENT_ATTR}=\"{}\"></div>",
                escape_attr(id),
                escape_attr(source)
            ));
        }
        Node::Client(client) => {
            // Only reachable when detection was skipped.
            log::warn!(
                "client component {:?} reached the server renderer; rendering nothing",
                client.source
            );
        }
        Node::TotalPages => {
            out.push_str(&format!("<span {TOTAL_PAGES_ATTR}>{TOTAL_PAGES_TOKEN}</span>"));
        }
        Node::PageNumber => {
            out.push_str(&format!("<span {PAGE_NUMBER_ATTR}></span>"));
        }
    }
}

pub fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn escape_attr(s: &str) -> String {
    escape_text(s).replace('"', "&quot;")
}
