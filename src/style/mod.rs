//! Style resolver – turns a document's styling mode into one CSS blob that
//! covers every rule the final markup needs.
//!
//! In utility mode the resolver statically scans everything that can carry a
//! class name (element `class` attributes, client props, and the source of
//! every client module reachable from the tree), compiles exactly that set,
//! and caches the result by fingerprint. The compiled set is a superset of
//! what the final markup uses; a class it missed renders unstyled.

pub mod cache;
pub mod utility;

use std::collections::BTreeSet;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::client::modules::load_graph;
use crate::client::ModuleResolver;
use crate::document::{DocumentSpec, Stylesheet, StylingMode};
use crate::error::StyleResolutionError;
use crate::tree::{walk, Node};

pub use cache::{CacheStats, StyleCache};
pub use utility::{BuiltinUtilities, Theme, UtilityCompiler};

/// Attribute naming the active styling mode, set on `<html>`.
pub const STYLE_MODE_ATTR: &str = "data-docpress-style-mode";
/// Attribute carrying the class-set fingerprint (utility mode only).
pub const STYLE_FINGERPRINT_ATTR: &str = "data-docpress-style-fingerprint";

/// String literals in module source: `"..."`, `'...'` and backtick strings
/// without interpolation.
static STRING_LITERAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""((?:[^"\\\n]|\\.)*)"|'((?:[^'\\\n]|\\.)*)'|`([^`$]*)`"#).unwrap());

/// Shape of a plausible utility class token.
static CLASS_TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^-?[a-z][a-z0-9]*(?::[a-z][a-z0-9-]*)*(?:-(?:[a-z0-9./%#]+|\[[^\]\s]+\]))*$").unwrap()
});

/// Resolved CSS for one document.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleBundle {
    pub precompiled_css: String,
    /// Attributes for the `<html>` element.
    pub marker_attributes: Vec<(String, String)>,
    /// Class-set fingerprint (utility mode only).
    pub fingerprint: Option<String>,
    /// Whether the utility CSS came from the cache.
    pub cache_hit: bool,
}

pub struct StyleResolver {
    compiler: Arc<dyn UtilityCompiler>,
    cache: Arc<StyleCache>,
    theme: Option<Theme>,
}

impl StyleResolver {
    pub fn new(compiler: Arc<dyn UtilityCompiler>, cache: Arc<StyleCache>) -> Self {
        Self {
            compiler,
            cache,
            theme: None,
        }
    }

    /// Built-in utilities backed by the process-wide cache.
    pub fn builtin() -> Self {
        Self::new(Arc::new(BuiltinUtilities), StyleCache::global())
    }

    pub fn with_theme(mut self, theme: Option<Theme>) -> Self {
        self.theme = theme;
        self
    }

    pub fn cache(&self) -> &Arc<StyleCache> {
        &self.cache
    }

    /// Resolve the document's styles.
    ///
    /// `modules` is used to read client module sources for class scanning;
    /// modules it can't resolve are skipped here (the bundler reports them).
    pub fn resolve(
        &self,
        doc: &DocumentSpec,
        modules: &dyn ModuleResolver,
    ) -> Result<StyleBundle, StyleResolutionError> {
        let mut markers = vec![(STYLE_MODE_ATTR.to_string(), doc.styling.label().to_string())];
        let mut fingerprint = None;
        let mut cache_hit = false;

        let mut css = match &doc.styling {
            StylingMode::Utility => {
                let classes = collect_classes(&doc.tree, modules);
                let key = fingerprint_of(&classes, self.theme.as_ref());
                let (compiled, hit) = self
                    .cache
                    .get_or_compile(&key, || self.compiler.compile(&classes, self.theme.as_ref()));
                log::debug!(
                    "utility styles: {} candidate class(es), fingerprint {}",
                    classes.len(),
                    &key[..12]
                );
                markers.push((STYLE_FINGERPRINT_ATTR.to_string(), key.clone()));
                fingerprint = Some(key);
                cache_hit = hit;
                compiled.to_string()
            }
            StylingMode::Inline => String::new(),
            StylingMode::Embedded { css } => non_empty(css, "embedded stylesheet")?.to_string(),
            StylingMode::External { path } => read_sheet(path)?,
        };

        for sheet in &doc.stylesheets {
            let extra = match sheet {
                Stylesheet::Embedded { css } => non_empty(css, "embedded stylesheet")?.to_string(),
                Stylesheet::External { path } => read_sheet(path)?,
            };
            if !css.is_empty() && !css.ends_with('\n') {
                css.push('\n');
            }
            css.push_str(&extra);
        }

        Ok(StyleBundle {
            precompiled_css: css,
            marker_attributes: markers,
            fingerprint,
            cache_hit,
        })
    }
}

fn non_empty<'a>(css: &'a str, origin: &str) -> Result<&'a str, StyleResolutionError> {
    if css.trim().is_empty() {
        return Err(StyleResolutionError::EmptyStylesheet {
            origin: origin.to_string(),
        });
    }
    Ok(css)
}

fn read_sheet(path: &std::path::Path) -> Result<String, StyleResolutionError> {
    let css = std::fs::read_to_string(path).map_err(|source| {
        StyleResolutionError::MissingStylesheet {
            path: path.to_path_buf(),
            source,
        }
    })?;
    non_empty(&css, &path.display().to_string())?;
    Ok(css)
}

/// SHA-256 over the sorted class set and the theme.
pub fn fingerprint_of(classes: &BTreeSet<String>, theme: Option<&Theme>) -> String {
    let mut hasher = Sha256::new();
    for class in classes {
        hasher.update(class.as_bytes());
        hasher.update(b"\n");
    }
    hasher.update(b"\0theme:");
    if let Some(theme) = theme {
        hasher.update(serde_json::to_vec(theme).unwrap_or_default());
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Every class-name candidate reachable from the tree.
pub fn collect_classes(tree: &[Node], modules: &dyn ModuleResolver) -> BTreeSet<String> {
    let mut classes = BTreeSet::new();
    let mut sources = BTreeSet::new();
    scan_nodes(tree, &mut classes, &mut sources);

    let mut scanned = BTreeSet::new();
    for source in &sources {
        match load_graph(modules, source) {
            Ok(graph) => {
                for linked in graph {
                    if scanned.insert(linked.module.id.clone()) {
                        scan_source(&linked.module.code, &mut classes);
                    }
                }
            }
            Err(unresolved) => log::debug!(
                "style scan skipped {source}: {} ({})",
                unresolved.specifier,
                unresolved.reason
            ),
        }
    }
    classes
}

fn scan_nodes(nodes: &[Node], classes: &mut BTreeSet<String>, sources: &mut BTreeSet<String>) {
    walk(nodes, &mut |node, _| {
        match node {
            Node::Element(e) => {
                for class in e.classes() {
                    classes.insert(class.to_string());
                }
            }
            Node::Client(client) => {
                sources.insert(client.source.clone());
                scan_value(&client.props, classes);
                scan_nodes(&client.fallback, classes, sources);
            }
            _ => {}
        }
        true
    });
}

fn scan_value(value: &serde_json::Value, classes: &mut BTreeSet<String>) {
    match value {
        serde_json::Value::String(s) => insert_candidates(s, classes),
        serde_json::Value::Array(items) => items.iter().for_each(|v| scan_value(v, classes)),
        serde_json::Value::Object(map) => map.values().for_each(|v| scan_value(v, classes)),
        _ => {}
    }
}

fn scan_source(code: &str, classes: &mut BTreeSet<String>) {
    for caps in STRING_LITERAL_RE.captures_iter(code) {
        if let Some(m) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) {
            insert_candidates(m.as_str(), classes);
        }
    }
}

fn insert_candidates(text: &str, classes: &mut BTreeSet<String>) {
    for token in text.split_whitespace() {
        if token.len() <= 64 && CLASS_TOKEN_RE.is_match(token) {
            classes.insert(token.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryModuleResolver;
    use crate::tree::Element;
    use serde_json::json;

    fn doc() -> DocumentSpec {
        DocumentSpec::new(vec![
            Node::from(Element::new("h1").class("text-2xl font-bold").text("Invoice")),
            Node::client("charts/bar.js", json!({"className": "p-2 bg-gray-100"})),
        ])
    }

    fn modules() -> MemoryModuleResolver {
        MemoryModuleResolver::new()
            .with_module(
                "charts/bar.js",
                r#"const legend = require("./legend.js");
module.exports = function (el) { el.className = "flex gap-2"; };"#,
            )
            .with_module("charts/legend.js", "module.exports = { cls: 'text-xs italic' };")
    }

    fn resolver() -> StyleResolver {
        StyleResolver::new(Arc::new(BuiltinUtilities), Arc::new(StyleCache::new(8)))
    }

    #[test]
    fn classes_from_markup_props_and_modules() {
        let classes = collect_classes(&doc().tree, &modules());
        for expected in [
            "text-2xl", "font-bold", "p-2", "bg-gray-100", "flex", "gap-2", "text-xs", "italic",
        ] {
            assert!(classes.contains(expected), "missing {expected}");
        }
    }

    #[test]
    fn resolving_twice_is_identical_and_cached() {
        let resolver = resolver();
        let first = resolver.resolve(&doc(), &modules()).unwrap();
        let second = resolver.resolve(&doc(), &modules()).unwrap();
        assert_eq!(first.precompiled_css, second.precompiled_css);
        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(resolver.cache().stats().hits, 1);
        assert!(first.precompiled_css.contains(".gap-2 { gap: 8px; }"));
    }

    #[test]
    fn theme_changes_the_fingerprint() {
        let classes: BTreeSet<String> = ["p-2".to_string()].into_iter().collect();
        let theme = Theme {
            spacing_unit_px: 5.0,
            ..Theme::default()
        };
        assert_ne!(fingerprint_of(&classes, None), fingerprint_of(&classes, Some(&theme)));
    }

    #[test]
    fn markers_name_the_mode() {
        let bundle = resolver().resolve(&doc(), &modules()).unwrap();
        assert_eq!(bundle.marker_attributes[0], (STYLE_MODE_ATTR.into(), "utility".into()));
        assert_eq!(bundle.marker_attributes[1].0, STYLE_FINGERPRINT_ATTR);

        let inline = DocumentSpec::new(vec![]).with_styling(StylingMode::Inline);
        let bundle = resolver().resolve(&inline, &modules()).unwrap();
        assert!(bundle.precompiled_css.is_empty());
        assert!(bundle.fingerprint.is_none());
    }

    #[test]
    fn additional_sheets_append_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("print.css");
        std::fs::write(&path, "footer { color: gray; }").unwrap();
        let doc = DocumentSpec::new(vec![])
            .with_styling(StylingMode::Embedded {
                css: "h1 { color: red; }".into(),
            })
            .with_stylesheet(Stylesheet::Embedded {
                css: "h2 { color: blue; }".into(),
            })
            .with_stylesheet(Stylesheet::External { path });
        let css = resolver().resolve(&doc, &modules()).unwrap().precompiled_css;
        let red = css.find("color: red").unwrap();
        let blue = css.find("color: blue").unwrap();
        let gray = css.find("color: gray").unwrap();
        assert!(red < blue && blue < gray);
    }

    #[test]
    fn missing_and_empty_sheets_fail() {
        let missing = DocumentSpec::new(vec![]).with_styling(StylingMode::External {
            path: "/nonexistent/docpress.css".into(),
        });
        assert!(matches!(
            resolver().resolve(&missing, &modules()),
            Err(StyleResolutionError::MissingStylesheet { .. })
        ));

        let empty = DocumentSpec::new(vec![]).with_styling(StylingMode::Embedded { css: "  \n".into() });
        assert!(matches!(
            resolver().resolve(&empty, &modules()),
            Err(StyleResolutionError::EmptyStylesheet { .. })
        ));
    }
}
