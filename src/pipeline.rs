//! Pipeline – ties together style resolution, client detection and
//! bundling, assembly, pagination and conversion for one request, or a
//! concurrent batch.

use std::sync::Arc;

use futures::future::join_all;

use crate::assemble::{assemble, AssembledDocument, AssemblyInput};
use crate::cancel::CancelToken;
use crate::client::{self, ModuleResolver};
use crate::config::RenderConfig;
use crate::convert::Dispatcher;
use crate::document::DocumentSpec;
use crate::engine::EngineProvider;
use crate::error::{ClientBundleError, ConfigError};
pub use crate::error::RenderError;
use crate::paginate::Orchestrator;
use crate::style::{BuiltinUtilities, StyleCache, StyleResolver};
use crate::tree::{HtmlRenderer, MarkupRenderer};

/// What a render request produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// PDF bytes from the conversion backend (default).
    #[default]
    Pdf,
    /// The paginated HTML, without conversion.
    Preview,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Pdf(Vec<u8>),
    Html(String),
}

impl Output {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Output::Pdf(bytes) => bytes,
            Output::Html(html) => html.as_bytes(),
        }
    }
}

/// A successful render. `warnings` lists client components that could not
/// be bundled; their placeholders were left empty.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOutcome {
    pub output: Output,
    pub page_count: u32,
    pub warnings: Vec<ClientBundleError>,
}

pub struct Pipeline {
    config: RenderConfig,
    styles: StyleResolver,
    modules: Arc<dyn ModuleResolver>,
    renderer: Arc<dyn MarkupRenderer>,
    orchestrator: Orchestrator,
    dispatcher: Dispatcher,
}

impl Pipeline {
    /// Wire a pipeline from configuration: built-in utilities over the
    /// process-wide style cache, the HTML renderer, and the configured
    /// conversion backend.
    pub fn new(
        config: RenderConfig,
        engines: Arc<dyn EngineProvider>,
        modules: Arc<dyn ModuleResolver>,
    ) -> Result<Self, ConfigError> {
        let cache = StyleCache::init_global(config.style.cache_capacity)
            .unwrap_or_else(|existing| existing);
        let styles = StyleResolver::new(Arc::new(BuiltinUtilities), cache)
            .with_theme(config.style.theme.clone());
        let orchestrator = Orchestrator::new(engines.clone(), config.pagination.clone())?;
        let dispatcher = Dispatcher::from_config(&config.conversion, Some(engines))?;
        log::debug!(
            "pipeline ready: {} backend, {} retries",
            dispatcher.backend_name(),
            dispatcher.policy().max_retries
        );
        Ok(Self {
            config,
            styles,
            modules,
            renderer: Arc::new(HtmlRenderer),
            orchestrator,
            dispatcher,
        })
    }

    /// Launch headless Chromium and build a pipeline on it.
    #[cfg(feature = "chromium")]
    pub async fn launch(
        config: RenderConfig,
        modules: Arc<dyn ModuleResolver>,
    ) -> Result<Self, RenderError> {
        let provider = crate::engine::chromium::ChromiumProvider::launch(&config.chromium)
            .await
            .map_err(|e| ConfigError::Invalid(format!("cannot start the rendering engine: {e}")))?;
        Ok(Self::new(config, Arc::new(provider), modules)?)
    }

    pub fn with_style_resolver(mut self, styles: StyleResolver) -> Self {
        self.styles = styles;
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn MarkupRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn styles(&self) -> &StyleResolver {
        &self.styles
    }

    /// Run every stage up to (not including) pagination. No engine involved.
    pub fn prepare(
        &self,
        doc: &DocumentSpec,
    ) -> Result<(AssembledDocument, Vec<ClientBundleError>), RenderError> {
        let styles = self.styles.resolve(doc, self.modules.as_ref())?;
        let detection = client::detect(&doc.tree);
        let (bundles, warnings) = client::bundle(&detection.clients, self.modules.as_ref());
        let markup = self.renderer.render(&detection.tree);
        let assembled = assemble(AssemblyInput {
            title: &doc.title,
            markup: &markup,
            styles: &styles,
            geometry: doc.geometry(),
            margin_pt: doc.margin_pt.unwrap_or(self.config.default_margin_pt),
            bundles,
            debug: doc.debug,
        });
        Ok((assembled, warnings))
    }

    /// Render one document.
    pub async fn render(
        &self,
        doc: &DocumentSpec,
        mode: OutputMode,
        cancel: &CancelToken,
    ) -> Result<RenderOutcome, RenderError> {
        if cancel.is_cancelled() {
            return Err(RenderError::Cancelled);
        }
        let (assembled, warnings) = self.prepare(doc)?;
        let paginated = self.orchestrator.paginate(&assembled, cancel).await?;
        let page_count = paginated.page_count();

        let output = match mode {
            OutputMode::Preview => Output::Html(paginated.into_html()),
            OutputMode::Pdf => Output::Pdf(
                self.dispatcher
                    .convert(&paginated, &assembled.geometry, cancel)
                    .await?,
            ),
        };

        log::info!(
            "rendered {:?}: {} page(s), {} bytes, {} warning(s)",
            doc.title,
            page_count,
            output.as_bytes().len(),
            warnings.len()
        );
        Ok(RenderOutcome {
            output,
            page_count,
            warnings,
        })
    }

    /// Render documents concurrently. Each result stands alone; one
    /// failure never affects the others.
    pub async fn render_batch(
        &self,
        docs: &[DocumentSpec],
        mode: OutputMode,
        cancel: &CancelToken,
    ) -> Vec<Result<RenderOutcome, RenderError>> {
        join_all(docs.iter().map(|doc| async move {
            let result = self.render(doc, mode, cancel).await;
            if let Err(e) = &result {
                log::error!("{:?} failed: {e}", doc.title);
            }
            result
        }))
        .await
    }
}
