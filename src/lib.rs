//! # docpress – component tree → paginated PDF
//!
//! This crate turns a declarative component tree (with page size,
//! orientation and styling metadata) into a fully laid-out, paginated HTML
//! document driven through a headless browser, then hands it to a PDF
//! conversion backend. The pipeline stages are:
//!
//! 1. **Style** – resolve the styling mode; precompile utility classes ([`style`])
//! 2. **Detect & bundle** – isolate client-only subtrees into scripts ([`client`])
//! 3. **Assemble** – merge markup, page geometry CSS and styles ([`assemble`], [`geometry`])
//! 4. **Paginate** – run the pagination polyfill in the engine and resolve
//!    total-page references ([`paginate`], [`engine`])
//! 5. **Convert** – produce PDF bytes with retry and backoff ([`convert`])
//!
//! [`pipeline::Pipeline`] wires the stages together for one request or a
//! concurrent batch.

pub mod assemble;
pub mod cancel;
pub mod client;
pub mod config;
pub mod convert;
pub mod document;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod paginate;
pub mod pipeline;
pub mod style;
pub mod templates;
pub mod tree;

// Re-exports for convenience
pub use cancel::CancelToken;
pub use config::RenderConfig;
pub use document::{DocumentSpec, Stylesheet, StylingMode};
pub use error::RenderError;
pub use geometry::{Orientation, PageGeometry, PageSize};
pub use pipeline::{Output, OutputMode, Pipeline, RenderOutcome};
pub use tree::{Element, Node};
