//! HTML template parser – converts template markup into a component tree.
//!
//! Three custom elements map to typed nodes:
//! - `<client-component src="..." props='{...}' key="...">` → [`Node::Client`]
//! - `<total-pages>` → [`Node::TotalPages`]
//! - `<page-number>` → [`Node::PageNumber`]
//!
//! Everything else becomes an element or text node. The parser is lenient:
//! unclosed tags are closed at end of input and stray closing tags end the
//! current element.

use std::collections::BTreeMap;

use super::{is_void_element, ClientNode, Element, Node};

/// Parse a template string into a list of tree nodes.
///
/// A surrounding `<html>`/`<body>` shell is stripped so the result is the
/// document content only.
pub fn parse_html(html: &str) -> Vec<Node> {
    let mut parser = Parser::new(html);
    let nodes = parser.parse_nodes();
    body_children(nodes)
}

/// Find the `<body>` element and return its children, or return all nodes if
/// no `<body>` is present. `<head>` content is dropped.
fn body_children(nodes: Vec<Node>) -> Vec<Node> {
    for node in &nodes {
        if let Node::Element(e) = node {
            if e.tag.eq_ignore_ascii_case("body") {
                return e.children.clone();
            }
            if e.tag.eq_ignore_ascii_case("html") {
                let inner: Vec<Node> = e
                    .children
                    .iter()
                    .filter(|n| !matches!(n, Node::Element(h) if h.tag.eq_ignore_ascii_case("head")))
                    .cloned()
                    .collect();
                return body_children(inner);
            }
        }
    }
    nodes
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn parse_nodes(&mut self) -> Vec<Node> {
        let mut nodes = Vec::new();
        loop {
            self.skip_whitespace_between_tags();
            if self.eof() || self.starts_with("</") {
                break;
            }
            if let Some(node) = self.parse_node() {
                nodes.push(node);
            }
        }
        nodes
    }

    fn parse_node(&mut self) -> Option<Node> {
        if self.starts_with("<!--") {
            self.skip_past("-->");
            return None;
        }
        if self.starts_with("<!") || self.starts_with("<?") {
            // doctype / processing instruction
            self.skip_past(">");
            return None;
        }
        if self.starts_with("<") && self.peek_is_tag_start() {
            Some(self.parse_element())
        } else {
            Some(self.parse_text())
        }
    }

    fn parse_text(&mut self) -> Node {
        let start = self.pos;
        // A lone '<' that doesn't open a tag is text.
        if self.starts_with("<") {
            self.advance(1);
        }
        while !self.eof() && !self.starts_with("<") {
            self.advance(1);
        }
        Node::text(decode_entities(&self.input[start..self.pos]))
    }

    fn parse_element(&mut self) -> Node {
        self.advance(1); // '<'
        let tag = self.parse_name().to_ascii_lowercase();

        let mut attrs = BTreeMap::new();
        loop {
            self.skip_whitespace();
            if self.eof() || self.starts_with(">") || self.starts_with("/>") {
                break;
            }
            let (key, value) = self.parse_attribute();
            if key.is_empty() {
                // Garbage inside the tag; skip one char to guarantee progress.
                self.advance(1);
                continue;
            }
            attrs.insert(key.to_ascii_lowercase(), value);
        }

        let self_closed = if self.starts_with("/>") {
            self.advance(2);
            true
        } else {
            if self.starts_with(">") {
                self.advance(1);
            }
            false
        };

        let children = if self_closed || is_void_element(&tag) {
            Vec::new()
        } else if tag == "script" || tag == "style" {
            let raw = self.take_raw_text(&tag);
            vec![Node::text(raw)]
        } else {
            let children = self.parse_nodes();
            self.consume_closing_tag();
            children
        };

        typed_node(tag, attrs, children)
    }

    /// Consume `</name>` if present.
    fn consume_closing_tag(&mut self) {
        if self.starts_with("</") {
            self.advance(2);
            self.parse_name();
            self.skip_whitespace();
            if self.starts_with(">") {
                self.advance(1);
            }
        }
    }

    fn take_raw_text(&mut self, tag: &str) -> String {
        let close = format!("</{tag}");
        let start = self.pos;
        let rest = &self.input[self.pos..];
        let end = rest
            .to_ascii_lowercase()
            .find(&close)
            .map(|i| start + i)
            .unwrap_or(self.input.len());
        self.pos = end;
        let raw = self.input[start..end].to_string();
        self.consume_closing_tag();
        raw
    }

    fn parse_name(&mut self) -> String {
        let start = self.pos;
        while !self.eof() {
            let c = self.current_char();
            if c.is_alphanumeric() || c == '-' || c == '_' || c == ':' {
                self.advance(1);
            } else {
                break;
            }
        }
        self.input[start..self.pos].to_string()
    }

    fn parse_attribute(&mut self) -> (String, String) {
        let key = self.parse_name();
        self.skip_whitespace();
        if !self.starts_with("=") {
            return (key, String::new());
        }
        self.advance(1);
        self.skip_whitespace();
        let value = self.parse_attr_value();
        (key, value)
    }

    fn parse_attr_value(&mut self) -> String {
        for quote in ["\"", "'"] {
            if self.starts_with(quote) {
                self.advance(1);
                let start = self.pos;
                while !self.eof() && !self.starts_with(quote) {
                    self.advance(1);
                }
                let val = decode_entities(&self.input[start..self.pos]);
                if !self.eof() {
                    self.advance(1);
                }
                return val;
            }
        }
        let start = self.pos;
        while !self.eof() {
            let c = self.current_char();
            if c.is_whitespace() || c == '>' || c == '/' {
                break;
            }
            self.advance(1);
        }
        self.input[start..self.pos].to_string()
    }

    fn skip_whitespace(&mut self) {
        while !self.eof() && self.current_char().is_whitespace() {
            self.advance(1);
        }
    }

    /// Skip runs of pure whitespace between tags; whitespace that leads into
    /// text is kept.
    fn skip_whitespace_between_tags(&mut self) {
        let saved = self.pos;
        self.skip_whitespace();
        if !self.eof() && !self.starts_with("<") {
            self.pos = saved;
        }
    }

    fn skip_past(&mut self, needle: &str) {
        match self.input[self.pos..].find(needle) {
            Some(i) => self.pos += i + needle.len(),
            None => self.pos = self.input.len(),
        }
    }

    fn peek_is_tag_start(&self) -> bool {
        self.input[self.pos..]
            .chars()
            .nth(1)
            .is_some_and(|c| c.is_ascii_alphabetic())
    }

    fn starts_with(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }

    fn eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn current_char(&self) -> char {
        self.input[self.pos..].chars().next().unwrap_or('\0')
    }

    fn advance(&mut self, n: usize) {
        // Advance by `n` characters (not bytes).
        for _ in 0..n {
            if let Some(c) = self.input[self.pos..].chars().next() {
                self.pos += c.len_utf8();
            }
        }
    }
}

/// Map parsed tags onto typed nodes.
fn typed_node(tag: String, mut attrs: BTreeMap<String, String>, children: Vec<Node>) -> Node {
    match tag.as_str() {
        "client-component" => {
            let source = attrs.remove("src").unwrap_or_default();
            let props = match attrs.remove("props") {
                Some(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw)
                    .unwrap_or_else(|e| {
                        log::warn!("client component {source:?}: props are not valid JSON ({e}); using null");
                        serde_json::Value::Null
                    }),
                _ => serde_json::Value::Null,
            };
            Node::Client(ClientNode {
                source,
                props,
                key: attrs.remove("key"),
                fallback: children,
            })
        }
        "total-pages" => Node::TotalPages,
        "page-number" => Node::PageNumber,
        _ => Node::Element(Element {
            tag,
            attrs,
            children,
        }),
    }
}

fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", "\u{00A0}")
        .replace("&amp;", "&")
}
