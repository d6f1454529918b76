//! Page geometry – maps a page size and orientation to point dimensions and
//! emits the page CSS injected ahead of every author stylesheet.
//!
//! Resolution never fails: an unrecognised size name falls back to A4
//! portrait, because half-typed custom sizes are common while authoring.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default page margin in points.
pub const DEFAULT_MARGIN_PT: f32 = 40.0;

/// Attribute carried by every page box the pagination polyfill creates.
pub const PAGE_BOX_ATTR: &str = "data-docpress-page";

/// Page orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    /// Portrait mode: height > width (default).
    #[default]
    Portrait,
    /// Landscape mode: width and height of the portrait size swapped.
    Landscape,
}

impl Orientation {
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("landscape") {
            Orientation::Landscape
        } else {
            Orientation::Portrait
        }
    }
}

/// Named page sizes plus a custom escape hatch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "PageSizeRepr", into = "PageSizeRepr")]
pub enum PageSize {
    A3,
    A4,
    A5,
    B5,
    Letter,
    Legal,
    Tabloid,
    Executive,
    /// Explicit portrait dimensions in points.
    Custom { width_pt: f32, height_pt: f32 },
}

impl Default for PageSize {
    fn default() -> Self {
        PageSize::A4
    }
}

impl PageSize {
    /// Every named size, in a stable order.
    pub const NAMED: [PageSize; 8] = [
        PageSize::A3,
        PageSize::A4,
        PageSize::A5,
        PageSize::B5,
        PageSize::Letter,
        PageSize::Legal,
        PageSize::Tabloid,
        PageSize::Executive,
    ];

    /// Portrait dimensions in points.
    pub fn dimensions_pt(&self) -> (f32, f32) {
        match self {
            PageSize::A3 => (841.89, 1190.55),
            PageSize::A4 => (595.28, 841.89),
            PageSize::A5 => (419.53, 595.28),
            PageSize::B5 => (498.9, 708.66),
            PageSize::Letter => (612.0, 792.0),
            PageSize::Legal => (612.0, 1008.0),
            PageSize::Tabloid => (792.0, 1224.0),
            PageSize::Executive => (522.0, 756.0),
            PageSize::Custom {
                width_pt,
                height_pt,
            } => (*width_pt, *height_pt),
        }
    }

    pub fn name(&self) -> Option<&'static str> {
        match self {
            PageSize::A3 => Some("A3"),
            PageSize::A4 => Some("A4"),
            PageSize::A5 => Some("A5"),
            PageSize::B5 => Some("B5"),
            PageSize::Letter => Some("Letter"),
            PageSize::Legal => Some("Legal"),
            PageSize::Tabloid => Some("Tabloid"),
            PageSize::Executive => Some("Executive"),
            PageSize::Custom { .. } => None,
        }
    }

    /// Parse a size name (`"a4"`, `"Letter"`) or a CSS-like pair of lengths
    /// (`"210mm 297mm"`, `"8.5in 11in"`, `"400pt 600pt"`).
    ///
    /// Anything unrecognised resolves to A4.
    pub fn parse(s: &str) -> Self {
        let trimmed = s.trim();
        if let Some(named) = Self::NAMED
            .iter()
            .find(|size| size.name().is_some_and(|n| n.eq_ignore_ascii_case(trimmed)))
        {
            return *named;
        }

        let parts: Vec<&str> = trimmed.split_whitespace().collect();
        if parts.len() == 2 {
            if let (Some(w), Some(h)) = (parse_length_pt(parts[0]), parse_length_pt(parts[1])) {
                if w > 0.0 && h > 0.0 {
                    return PageSize::Custom {
                        width_pt: w,
                        height_pt: h,
                    };
                }
            }
        }

        log::warn!("unknown page size {trimmed:?}, falling back to A4");
        PageSize::A4
    }
}

impl fmt::Display for PageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => {
                let (w, h) = self.dimensions_pt();
                write!(f, "{w}pt {h}pt")
            }
        }
    }
}

/// Serde shape: either a size string or an explicit `{width, height}` in pt.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum PageSizeRepr {
    Name(String),
    Dims { width: f32, height: f32 },
}

impl From<PageSizeRepr> for PageSize {
    fn from(repr: PageSizeRepr) -> Self {
        match repr {
            PageSizeRepr::Name(name) => PageSize::parse(&name),
            PageSizeRepr::Dims { width, height } if width > 0.0 && height > 0.0 => {
                PageSize::Custom {
                    width_pt: width,
                    height_pt: height,
                }
            }
            PageSizeRepr::Dims { .. } => PageSize::A4,
        }
    }
}

impl From<PageSize> for PageSizeRepr {
    fn from(size: PageSize) -> Self {
        match size.name() {
            Some(name) => PageSizeRepr::Name(name.to_string()),
            None => {
                let (width, height) = size.dimensions_pt();
                PageSizeRepr::Dims { width, height }
            }
        }
    }
}

/// Convert a CSS length to points. Supports pt, px, in, cm and mm.
fn parse_length_pt(s: &str) -> Option<f32> {
    let units: [(&str, f32); 5] = [
        ("pt", 1.0),
        ("px", 0.75),
        ("in", 72.0),
        ("cm", 72.0 / 2.54),
        ("mm", 72.0 / 25.4),
    ];
    for (suffix, factor) in units {
        if let Some(num) = s.strip_suffix(suffix) {
            return num.trim().parse::<f32>().ok().map(|v| v * factor);
        }
    }
    None
}

/// Resolved page dimensions in points. Immutable once derived.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageGeometry {
    pub width_pt: f32,
    pub height_pt: f32,
}

impl Default for PageGeometry {
    fn default() -> Self {
        Self::resolve(&PageSize::A4, Orientation::Portrait)
    }
}

impl PageGeometry {
    pub fn resolve(size: &PageSize, orientation: Orientation) -> Self {
        let (w, h) = size.dimensions_pt();
        match orientation {
            Orientation::Portrait => Self {
                width_pt: w,
                height_pt: h,
            },
            Orientation::Landscape => Self {
                width_pt: h,
                height_pt: w,
            },
        }
    }

    pub fn width_in(&self) -> f32 {
        self.width_pt / 72.0
    }

    pub fn height_in(&self) -> f32 {
        self.height_pt / 72.0
    }
}

/// Emit the page geometry CSS.
///
/// The `@page` box carries no margin of its own; margins live on the page
/// boxes as padding driven by `--docpress-page-margin`, so author rules can
/// override either the variable or the page box directly.
pub fn page_css(geometry: &PageGeometry, margin_pt: f32) -> String {
    let w = fmt_pt(geometry.width_pt);
    let h = fmt_pt(geometry.height_pt);
    let m = fmt_pt(margin_pt);
    format!(
        "@page {{ size: {w}pt {h}pt; margin: 0; }}\n\
         :root {{ --docpress-page-width: {w}pt; --docpress-page-height: {h}pt; --docpress-page-margin: {m}pt; }}\n\
         html, body {{ margin: 0; padding: 0; }}\n\
         [{PAGE_BOX_ATTR}] {{ box-sizing: border-box; width: var(--docpress-page-width); height: var(--docpress-page-height); padding: var(--docpress-page-margin); overflow: hidden; position: relative; break-after: page; page-break-after: always; }}\n\
         [{PAGE_BOX_ATTR}]:last-child {{ break-after: auto; page-break-after: auto; }}\n\
         .page-break, .break-after {{ break-after: page; }}\n\
         .break-before {{ break-before: page; }}\n"
    )
}

/// Format a point value without trailing zeros (`595.28`, `612`).
fn fmt_pt(v: f32) -> String {
    let s = format!("{v:.2}");
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}
