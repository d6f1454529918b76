//! Document description – the authored unit handed to the pipeline.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::geometry::{Orientation, PageGeometry, PageSize};
use crate::tree::{parse_html, Node};

/// The primary styling mode of a document. Exactly one is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum StylingMode {
    /// Utility classes, compiled ahead of time from the classes the tree uses.
    #[default]
    Utility,
    /// Styles travel in `style` attributes; nothing to extract.
    Inline,
    /// A stylesheet supplied as a string.
    Embedded { css: String },
    /// A stylesheet read from disk at resolve time.
    External { path: PathBuf },
}

impl StylingMode {
    pub fn label(&self) -> &'static str {
        match self {
            StylingMode::Utility => "utility",
            StylingMode::Inline => "inline",
            StylingMode::Embedded { .. } => "embedded",
            StylingMode::External { .. } => "external",
        }
    }
}

/// An additional stylesheet layered on top of the primary mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Stylesheet {
    Embedded { css: String },
    External { path: PathBuf },
}

/// A printable document described as a component tree plus page metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSpec {
    #[serde(default = "DocumentSpec::default_title")]
    pub title: String,
    #[serde(default)]
    pub page_size: PageSize,
    #[serde(default)]
    pub orientation: Orientation,
    #[serde(default)]
    pub styling: StylingMode,
    /// Extra sheets appended after the primary mode's CSS, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stylesheets: Vec<Stylesheet>,
    /// Page margin override in points.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub margin_pt: Option<f32>,
    #[serde(default)]
    pub debug: bool,
    pub tree: Vec<Node>,
}

impl DocumentSpec {
    pub fn new(tree: Vec<Node>) -> Self {
        Self {
            title: Self::default_title(),
            page_size: PageSize::default(),
            orientation: Orientation::default(),
            styling: StylingMode::default(),
            stylesheets: Vec::new(),
            margin_pt: None,
            debug: false,
            tree,
        }
    }

    /// Build a utility-styled document from template markup.
    pub fn from_html(html: &str) -> Self {
        Self::new(parse_html(html))
    }

    fn default_title() -> String {
        "docpress output".to_string()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_page(mut self, size: PageSize, orientation: Orientation) -> Self {
        self.page_size = size;
        self.orientation = orientation;
        self
    }

    pub fn with_styling(mut self, styling: StylingMode) -> Self {
        self.styling = styling;
        self
    }

    pub fn with_stylesheet(mut self, sheet: Stylesheet) -> Self {
        self.stylesheets.push(sheet);
        self
    }

    pub fn geometry(&self) -> PageGeometry {
        PageGeometry::resolve(&self.page_size, self.orientation)
    }

    /// Serialise to JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Deserialise from a JSON manifest.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Load a manifest (`.json`) or an HTML template (anything else).
    ///
    /// Relative external stylesheet paths in a manifest are resolved against
    /// the manifest's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if !is_json {
            let title = path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string)
                .unwrap_or_else(Self::default_title);
            return Ok(Self::from_html(&text).with_title(title));
        }

        let mut doc = Self::from_json(&text)?;
        if let Some(base) = path.parent() {
            doc.rebase_paths(base);
        }
        Ok(doc)
    }

    fn rebase_paths(&mut self, base: &Path) {
        let rebase = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        if let StylingMode::External { path } = &mut self.styling {
            rebase(path);
        }
        for sheet in &mut self.stylesheets {
            if let Stylesheet::External { path } = sheet {
                rebase(path);
            }
        }
    }
}
