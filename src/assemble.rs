//! Document assembler – pure string composition of the HTML document handed
//! to the rendering engine.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::client::BundleManifest;
use crate::geometry::{page_css, PageGeometry};
use crate::style::StyleBundle;
use crate::tree::{escape_attr, escape_text, TOTAL_PAGES_ATTR, TOTAL_PAGES_TOKEN};

/// Attribute on the container the pagination polyfill re-flows.
pub const FLOW_ATTR: &str = "data-docpress-flow";
/// `name` of the page-count marker `<meta>`.
pub const PAGE_COUNT_META: &str = "docpress:page-count";
/// Attribute carrying the resolved page count on the marker `<meta>`.
pub const PAGE_COUNT_ATTR: &str = "data-docpress-page-count";

const DEBUG_CSS: &str = "[data-docpress-client] { outline: 1px dashed #e11d48; min-height: 8px; }\n\
[data-docpress-page] { outline: 1px solid #3b82f6; }\n\
[data-docpress-total-pages] { background: #fef08a; }\n";

static PAGE_COUNT_META_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<meta\b[^>]*\bname\s*=\s*["']docpress:page-count["'][^>]*>"#).unwrap()
});

/// Inputs to [`assemble`].
#[derive(Debug, Clone)]
pub struct AssemblyInput<'a> {
    pub title: &'a str,
    /// Server-rendered markup with client placeholders.
    pub markup: &'a str,
    pub styles: &'a StyleBundle,
    pub geometry: PageGeometry,
    pub margin_pt: f32,
    pub bundles: BundleManifest,
    /// Outline placeholders and page boxes.
    pub debug: bool,
}

/// The document before pagination: placeholders unfilled, total-page
/// references unresolved.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledDocument {
    pub html: String,
    pub page_geometry_css: String,
    pub total_pages_placeholders: usize,
    pub bundles: BundleManifest,
    pub geometry: PageGeometry,
}

pub fn assemble(input: AssemblyInput<'_>) -> AssembledDocument {
    let geometry_css = page_css(&input.geometry, input.margin_pt);
    let placeholders = input
        .markup
        .matches(&format!("<span {TOTAL_PAGES_ATTR}"))
        .count();

    let mut html = String::with_capacity(
        input.markup.len() + input.styles.precompiled_css.len() + geometry_css.len() + 512,
    );
    html.push_str("<!DOCTYPE html>\n<html");
    for (name, value) in &input.styles.marker_attributes {
        html.push_str(&format!(" {}=\"{}\"", name, escape_attr(value)));
    }
    html.push_str(">\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str(&format!("<title>{}</title>\n", escape_text(input.title)));
    html.push_str(&format!(
        "<style data-docpress-geometry>\n{geometry_css}</style>\n"
    ));
    if !input.styles.precompiled_css.is_empty() {
        html.push_str(&format!(
            "<style data-docpress-styles>\n{}\n</style>\n",
            input.styles.precompiled_css.trim_end()
        ));
    }
    if input.debug {
        html.push_str(&format!("<style data-docpress-debug>\n{DEBUG_CSS}</style>\n"));
    }
    html.push_str("</head>\n<body>\n");
    html.push_str(&format!("<main {FLOW_ATTR}>"));
    html.push_str(input.markup);
    html.push_str("</main>\n</body>\n</html>\n");

    log::debug!(
        "assembled {} bytes: {} bundle(s), {} total-page reference(s)",
        html.len(),
        input.bundles.len(),
        placeholders
    );

    AssembledDocument {
        html,
        page_geometry_css: geometry_css,
        total_pages_placeholders: placeholders,
        bundles: input.bundles,
        geometry: input.geometry,
    }
}

/// The page-count marker element.
pub fn page_count_meta(page_count: u32) -> String {
    format!("<meta name=\"{PAGE_COUNT_META}\" {PAGE_COUNT_ATTR}=\"{page_count}\">")
}

/// String-level final pass over captured markup: substitute any total-page
/// token the DOM pass missed and make sure exactly one page-count marker
/// with the right value exists.
pub fn finalize_markup(html: &str, page_count: u32) -> String {
    let count = page_count.to_string();
    let html = html.replace(TOTAL_PAGES_TOKEN, &count);
    let meta = page_count_meta(page_count);

    let mut out = if PAGE_COUNT_META_RE.is_match(&html) {
        let mut first = true;
        PAGE_COUNT_META_RE
            .replace_all(&html, |_: &regex::Captures| {
                if std::mem::take(&mut first) {
                    meta.clone()
                } else {
                    String::new()
                }
            })
            .into_owned()
    } else if let Some(at) = find_ascii_ci(&html, "</head>") {
        let mut s = html.clone();
        s.insert_str(at, &format!("{meta}\n"));
        s
    } else {
        format!("{meta}\n{html}")
    };

    if !out.trim_start().to_ascii_lowercase().starts_with("<!doctype") {
        out.insert_str(0, "<!DOCTYPE html>\n");
    }
    out
}

fn find_ascii_ci(haystack: &str, needle: &str) -> Option<usize> {
    haystack.to_ascii_lowercase().find(&needle.to_ascii_lowercase())
}
