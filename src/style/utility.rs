//! Utility-class compiler – turns a set of Tailwind-style class names into
//! exactly the CSS rules those classes need.
//!
//! The built-in compiler covers the utility subset documents typically use
//! (display, flex, spacing, sizing, typography, colours, borders and page
//! breaks). Classes it doesn't recognise produce no CSS and degrade to
//! unstyled, which is the same thing a missing class would do.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// The compiler seam: `(class names, theme) -> CSS text`. Must be pure.
pub trait UtilityCompiler: Send + Sync {
    fn compile(&self, classes: &BTreeSet<String>, theme: Option<&Theme>) -> String;
}

/// Theme overrides for the built-in compiler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Theme {
    /// Extra or replacement colours, e.g. `"brand-500": "#0f766e"`.
    pub colors: BTreeMap<String, String>,
    /// Size of one spacing step in px (`p-4` = 4 steps).
    pub spacing_unit_px: f32,
    pub font_family: Option<String>,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            colors: BTreeMap::new(),
            spacing_unit_px: 4.0,
            font_family: None,
        }
    }
}

/// The built-in Tailwind-compatible subset.
#[derive(Debug, Default, Clone)]
pub struct BuiltinUtilities;

impl UtilityCompiler for BuiltinUtilities {
    fn compile(&self, classes: &BTreeSet<String>, theme: Option<&Theme>) -> String {
        let default_theme = Theme::default();
        let theme = theme.unwrap_or(&default_theme);
        let mut css = String::new();
        if let Some(family) = &theme.font_family {
            let _ = writeln!(css, "body {{ font-family: {family}; }}");
        }
        let mut print_rules = String::new();
        for class in classes {
            let (print_only, base) = match class.strip_prefix("print:") {
                Some(rest) => (true, rest),
                None => (false, class.as_str()),
            };
            let Some(decls) = declarations(base, theme) else {
                continue;
            };
            let rule = format!(".{} {{ {} }}\n", escape_class(class), decls);
            if print_only {
                print_rules.push_str("  ");
                print_rules.push_str(&rule);
            } else {
                css.push_str(&rule);
            }
        }
        if !print_rules.is_empty() {
            let _ = write!(css, "@media print {{\n{print_rules}}}\n");
        }
        css
    }
}

/// Declarations for one utility class, or `None` if it isn't a utility.
fn declarations(class: &str, theme: &Theme) -> Option<String> {
    let fixed = match class {
        // Display
        "flex" => "display: flex;",
        "inline-flex" => "display: inline-flex;",
        "grid" => "display: grid;",
        "block" => "display: block;",
        "inline" => "display: inline;",
        "inline-block" => "display: inline-block;",
        "table" => "display: table;",
        "hidden" => "display: none;",

        // Flex
        "flex-row" => "flex-direction: row;",
        "flex-col" => "flex-direction: column;",
        "flex-wrap" => "flex-wrap: wrap;",
        "flex-nowrap" => "flex-wrap: nowrap;",
        "flex-grow" | "grow" => "flex-grow: 1;",
        "flex-shrink" | "shrink" => "flex-shrink: 1;",
        "shrink-0" => "flex-shrink: 0;",
        "flex-1" => "flex: 1 1 0%;",
        "flex-auto" => "flex: 1 1 auto;",
        "flex-none" => "flex: none;",
        "justify-start" => "justify-content: flex-start;",
        "justify-end" => "justify-content: flex-end;",
        "justify-center" => "justify-content: center;",
        "justify-between" => "justify-content: space-between;",
        "justify-around" => "justify-content: space-around;",
        "justify-evenly" => "justify-content: space-evenly;",
        "items-start" => "align-items: flex-start;",
        "items-end" => "align-items: flex-end;",
        "items-center" => "align-items: center;",
        "items-stretch" => "align-items: stretch;",
        "items-baseline" => "align-items: baseline;",

        // Typography
        "font-bold" => "font-weight: 700;",
        "font-semibold" => "font-weight: 600;",
        "font-medium" => "font-weight: 500;",
        "font-normal" => "font-weight: 400;",
        "font-light" => "font-weight: 300;",
        "font-mono" => "font-family: ui-monospace, SFMono-Regular, Menlo, monospace;",
        "font-serif" => "font-family: ui-serif, Georgia, serif;",
        "font-sans" => "font-family: ui-sans-serif, system-ui, sans-serif;",
        "italic" => "font-style: italic;",
        "not-italic" => "font-style: normal;",
        "underline" => "text-decoration-line: underline;",
        "line-through" => "text-decoration-line: line-through;",
        "no-underline" => "text-decoration-line: none;",
        "uppercase" => "text-transform: uppercase;",
        "lowercase" => "text-transform: lowercase;",
        "capitalize" => "text-transform: capitalize;",
        "text-left" => "text-align: left;",
        "text-center" => "text-align: center;",
        "text-right" => "text-align: right;",
        "text-justify" => "text-align: justify;",
        "text-xs" => "font-size: 12px; line-height: 16px;",
        "text-sm" => "font-size: 14px; line-height: 20px;",
        "text-base" => "font-size: 16px; line-height: 24px;",
        "text-lg" => "font-size: 18px; line-height: 28px;",
        "text-xl" => "font-size: 20px; line-height: 28px;",
        "text-2xl" => "font-size: 24px; line-height: 32px;",
        "text-3xl" => "font-size: 30px; line-height: 36px;",
        "text-4xl" => "font-size: 36px; line-height: 40px;",
        "leading-none" => "line-height: 1;",
        "leading-tight" => "line-height: 1.25;",
        "leading-normal" => "line-height: 1.5;",
        "leading-relaxed" => "line-height: 1.625;",
        "whitespace-nowrap" => "white-space: nowrap;",
        "truncate" => "overflow: hidden; text-overflow: ellipsis; white-space: nowrap;",

        // Sizing
        "w-full" => "width: 100%;",
        "w-auto" => "width: auto;",
        "w-screen" => "width: 100vw;",
        "h-full" => "height: 100%;",
        "h-auto" => "height: auto;",
        "w-1/2" => "width: 50%;",
        "w-1/3" => "width: 33.333333%;",
        "w-2/3" => "width: 66.666667%;",
        "w-1/4" => "width: 25%;",
        "w-3/4" => "width: 75%;",
        "max-w-full" => "max-width: 100%;",
        "mx-auto" => "margin-left: auto; margin-right: auto;",
        "ml-auto" => "margin-left: auto;",
        "mr-auto" => "margin-right: auto;",

        // Borders
        "border" => "border-width: 1px; border-style: solid;",
        "border-0" => "border-width: 0;",
        "border-t" => "border-top-width: 1px; border-top-style: solid;",
        "border-b" => "border-bottom-width: 1px; border-bottom-style: solid;",
        "border-l" => "border-left-width: 1px; border-left-style: solid;",
        "border-r" => "border-right-width: 1px; border-right-style: solid;",
        "border-collapse" => "border-collapse: collapse;",
        "rounded" => "border-radius: 4px;",
        "rounded-sm" => "border-radius: 2px;",
        "rounded-md" => "border-radius: 6px;",
        "rounded-lg" => "border-radius: 8px;",
        "rounded-full" => "border-radius: 9999px;",

        // Page breaks
        "break-before" | "break-before-page" => "break-before: page; page-break-before: always;",
        "break-after" | "break-after-page" | "page" | "page-break" => {
            "break-after: page; page-break-after: always;"
        }
        "break-inside-avoid" => "break-inside: avoid; page-break-inside: avoid;",

        _ => "",
    };
    if !fixed.is_empty() {
        return Some(fixed.to_string());
    }

    spacing(class, theme)
        .or_else(|| gap(class, theme))
        .or_else(|| grid_cols(class))
        .or_else(|| sized(class, theme))
        .or_else(|| color(class, theme))
        .or_else(|| border_width(class))
        .or_else(|| arbitrary(class))
}

/// `p-4`, `mx-2`, `mt-0.5` (one step = `spacing_unit_px`).
fn spacing(class: &str, theme: &Theme) -> Option<String> {
    let (prefix, value) = class.rsplit_once('-')?;
    let steps: f32 = value.parse().ok()?;
    let px = fmt_px(steps * theme.spacing_unit_px);
    let (property, sides): (&str, &[&str]) = match prefix {
        "p" => ("padding", &[""]),
        "px" => ("padding", &["-left", "-right"]),
        "py" => ("padding", &["-top", "-bottom"]),
        "pt" => ("padding", &["-top"]),
        "pr" => ("padding", &["-right"]),
        "pb" => ("padding", &["-bottom"]),
        "pl" => ("padding", &["-left"]),
        "m" => ("margin", &[""]),
        "mx" => ("margin", &["-left", "-right"]),
        "my" => ("margin", &["-top", "-bottom"]),
        "mt" => ("margin", &["-top"]),
        "mr" => ("margin", &["-right"]),
        "mb" => ("margin", &["-bottom"]),
        "ml" => ("margin", &["-left"]),
        _ => return None,
    };
    Some(
        sides
            .iter()
            .map(|side| format!("{property}{side}: {px};"))
            .collect::<Vec<_>>()
            .join(" "),
    )
}

fn gap(class: &str, theme: &Theme) -> Option<String> {
    let rest = class.strip_prefix("gap-")?;
    let steps: f32 = rest.parse().ok()?;
    Some(format!("gap: {};", fmt_px(steps * theme.spacing_unit_px)))
}

fn grid_cols(class: &str) -> Option<String> {
    let n: usize = class.strip_prefix("grid-cols-")?.parse().ok()?;
    (n > 0).then(|| format!("grid-template-columns: repeat({n}, minmax(0, 1fr));"))
}

/// `w-24`, `h-8`.
fn sized(class: &str, theme: &Theme) -> Option<String> {
    let (property, rest) = if let Some(rest) = class.strip_prefix("w-") {
        ("width", rest)
    } else if let Some(rest) = class.strip_prefix("h-") {
        ("height", rest)
    } else {
        return None;
    };
    let steps: f32 = rest.parse().ok()?;
    Some(format!("{property}: {};", fmt_px(steps * theme.spacing_unit_px)))
}

/// `text-{color}`, `bg-{color}`, `border-{color}`.
fn color(class: &str, theme: &Theme) -> Option<String> {
    let (property, name) = if let Some(name) = class.strip_prefix("text-") {
        ("color", name)
    } else if let Some(name) = class.strip_prefix("bg-") {
        ("background-color", name)
    } else if let Some(name) = class.strip_prefix("border-") {
        ("border-color", name)
    } else {
        return None;
    };
    let value = theme
        .colors
        .get(name)
        .map(String::as_str)
        .or_else(|| palette(name))?;
    Some(format!("{property}: {value};"))
}

fn border_width(class: &str) -> Option<String> {
    let n: u32 = class.strip_prefix("border-")?.parse().ok()?;
    Some(format!("border-width: {n}px; border-style: solid;"))
}

/// Arbitrary values: `w-[120px]`, `h-[3cm]`, `bg-[#fafafa]`, `text-[#333]`,
/// `text-[13px]`.
fn arbitrary(class: &str) -> Option<String> {
    let (prefix, rest) = class.split_once("-[")?;
    let value = rest.strip_suffix(']')?;
    if value.is_empty() || value.contains(|c: char| c == ';' || c == '{' || c == '}') {
        return None;
    }
    let value = value.replace('_', " ");
    let decl = match prefix {
        "w" => format!("width: {value};"),
        "h" => format!("height: {value};"),
        "p" => format!("padding: {value};"),
        "m" => format!("margin: {value};"),
        "bg" => format!("background-color: {value};"),
        "text" if value.starts_with('#') || value.starts_with("rgb") => format!("color: {value};"),
        "text" => format!("font-size: {value};"),
        _ => return None,
    };
    Some(decl)
}

/// Colour subset of the default palette.
fn palette(name: &str) -> Option<&'static str> {
    Some(match name {
        "white" => "#ffffff",
        "black" => "#000000",
        "transparent" => "transparent",
        "red-500" => "#ef4444",
        "red-700" => "#b91c1c",
        "blue-500" => "#3b82f6",
        "blue-700" => "#1d4ed8",
        "green-500" => "#22c55e",
        "green-700" => "#15803d",
        "yellow-500" => "#eab308",
        "gray-50" => "#f9fafb",
        "gray-100" => "#f3f4f6",
        "gray-200" => "#e5e7eb",
        "gray-300" => "#d1d5db",
        "gray-400" => "#9ca3af",
        "gray-500" => "#6b7280",
        "gray-600" => "#4b5563",
        "gray-700" => "#374151",
        "gray-800" => "#1f2937",
        "gray-900" => "#111827",
        _ => return None,
    })
}

fn fmt_px(v: f32) -> String {
    if v == 0.0 {
        return "0".to_string();
    }
    let s = format!("{v:.3}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    format!("{s}px")
}

/// Escape a class name for use in a selector.
pub fn escape_class(class: &str) -> String {
    let mut out = String::with_capacity(class.len() + 4);
    for (i, c) in class.chars().enumerate() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' || !c.is_ascii() {
            if i == 0 && c.is_ascii_digit() {
                let _ = write!(out, "\\{:x} ", c as u32);
            } else {
                out.push(c);
            }
        } else {
            out.push('\\');
            out.push(c);
        }
    }
    out
}
