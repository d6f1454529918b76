//! Conversion dispatcher – hands a paginated document to a PDF backend and
//! owns the retry contract.
//!
//! Unreachable backends are retried with exponential backoff; rejections
//! are returned at once with the backend's diagnostic attached verbatim.

mod local;
mod remote;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::config::{BackendKind, ConversionConfig};
use crate::engine::EngineProvider;
use crate::error::{BackendFailure, ConfigError, ConversionError};
use crate::geometry::PageGeometry;
use crate::paginate::PaginatedDocument;

pub use local::EngineBackend;
pub use remote::RemoteBackend;

/// PDF bytes or a typed failure.
pub type ConversionResult = Result<Vec<u8>, ConversionError>;

/// Future returned by a single backend attempt.
pub type BackendFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<u8>, BackendFailure>> + Send + 'a>>;

/// Something that turns finished HTML into PDF bytes.
pub trait ConversionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// One attempt. Retrying is the dispatcher's business.
    fn convert<'a>(&'a self, html: &'a str, geometry: &'a PageGeometry) -> BackendFuture<'a>;
}

/// Exponential backoff: `initial * 2^n`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ConversionConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ConversionConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

pub struct Dispatcher {
    backend: Arc<dyn ConversionBackend>,
    policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn ConversionBackend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    /// Pick the backend named by `config`. The engine backend needs an
    /// engine provider.
    pub fn from_config(
        config: &ConversionConfig,
        engines: Option<Arc<dyn EngineProvider>>,
    ) -> Result<Self, ConfigError> {
        let backend: Arc<dyn ConversionBackend> = match config.backend {
            BackendKind::Remote => {
                let base = config.remote_url.as_deref().ok_or_else(|| {
                    ConfigError::Invalid(
                        "conversion.remote_url is required for the remote backend".to_string(),
                    )
                })?;
                Arc::new(RemoteBackend::new(
                    base,
                    &config.endpoint,
                    Duration::from_millis(config.request_timeout_ms),
                )?)
            }
            BackendKind::Engine => {
                let engines = engines.ok_or_else(|| {
                    ConfigError::Invalid("the engine backend needs a rendering engine".to_string())
                })?;
                Arc::new(EngineBackend::new(engines))
            }
        };
        Ok(Self::new(backend, RetryPolicy::from_config(config)))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Convert a paginated document, retrying while the backend is
    /// unreachable.
    pub async fn convert(
        &self,
        doc: &PaginatedDocument,
        geometry: &PageGeometry,
        cancel: &CancelToken,
    ) -> ConversionResult {
        let mut attempts = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(ConversionError::Cancelled);
            }
            attempts += 1;
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ConversionError::Cancelled),
                outcome = self.backend.convert(doc.final_html(), geometry) => outcome,
            };

            let reason = match outcome {
                Ok(pdf) => {
                    log::info!(
                        "{} backend produced {} bytes ({} page(s), attempt {attempts})",
                        self.backend.name(),
                        pdf.len(),
                        doc.page_count()
                    );
                    return Ok(pdf);
                }
                Err(BackendFailure::Rejected { status, diagnostic }) => {
                    return Err(ConversionError::Rejected { status, diagnostic });
                }
                Err(BackendFailure::Unreachable(reason)) => reason,
            };

            if attempts > self.policy.max_retries {
                return Err(ConversionError::Unavailable { attempts, reason });
            }
            let delay = self.policy.delay(attempts);
            log::warn!(
                "{} backend unreachable (attempt {attempts}): {reason}; retrying in {delay:?}",
                self.backend.name()
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ConversionError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
