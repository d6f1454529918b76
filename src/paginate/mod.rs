//! Pagination orchestrator – drives a leased rendering engine through
//! `Loaded → ScriptsAttached → PaginationRunning → Resolved`.
//!
//! Every engine round trip is raced against its state's timeout and the
//! request's [`CancelToken`]. Any failure goes straight to `Failed`; the
//! engine lease is a local of [`Orchestrator::paginate`], so it is released
//! before the call returns on every path.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::assemble::{finalize_markup, AssembledDocument, PAGE_COUNT_ATTR, PAGE_COUNT_META};
use crate::cancel::CancelToken;
use crate::client::bundle::{ERROR_ATTR, READY_ATTR};
use crate::config::{PaginationConfig, PolyfillConfig};
use crate::engine::{lease, EngineLease, EngineProvider};
use crate::error::{ConfigError, PaginationError};
use crate::tree::TOTAL_PAGES_ATTR;

/// The bundled pagination polyfill. Defines `window.__docpressPaginate`.
pub const BUILTIN_POLYFILL: &str = include_str!("polyfill.js");

/// Expression that runs the bundled polyfill; resolves to the page count.
const BUILTIN_INVOKE: &str = "/* docpress:paginate */ window.__docpressPaginate()";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaginationState {
    Loaded,
    ScriptsAttached,
    PaginationRunning,
    Resolved,
    Failed,
}

impl PaginationState {
    /// The state that follows on success. `Resolved` and `Failed` are
    /// terminal.
    pub fn next(self) -> Option<PaginationState> {
        match self {
            PaginationState::Loaded => Some(PaginationState::ScriptsAttached),
            PaginationState::ScriptsAttached => Some(PaginationState::PaginationRunning),
            PaginationState::PaginationRunning => Some(PaginationState::Resolved),
            PaginationState::Resolved | PaginationState::Failed => None,
        }
    }
}

/// Final markup with every page reference resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct PaginatedDocument {
    final_html: String,
    page_count: u32,
}

impl PaginatedDocument {
    pub fn final_html(&self) -> &str {
        &self.final_html
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn into_html(self) -> String {
        self.final_html
    }
}

/// What the readiness probe reports.
#[derive(Debug, Default, Deserialize)]
struct Readiness {
    pending: usize,
    #[serde(default)]
    errors: Vec<MountFailure>,
}

#[derive(Debug, Deserialize)]
struct MountFailure {
    id: String,
    message: String,
}

pub struct Orchestrator {
    provider: Arc<dyn EngineProvider>,
    config: PaginationConfig,
    polyfill: String,
    invoke: String,
}

impl Orchestrator {
    /// Build an orchestrator. A third-party polyfill script is read here.
    pub fn new(
        provider: Arc<dyn EngineProvider>,
        config: PaginationConfig,
    ) -> Result<Self, ConfigError> {
        let (polyfill, invoke) = match &config.polyfill {
            PolyfillConfig::Builtin => (BUILTIN_POLYFILL.to_string(), BUILTIN_INVOKE.to_string()),
            PolyfillConfig::Script { path, invoke } => {
                let script = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                (script, invoke.clone())
            }
        };
        Ok(Self {
            provider,
            config,
            polyfill,
            invoke,
        })
    }

    pub fn provider(&self) -> &Arc<dyn EngineProvider> {
        &self.provider
    }

    /// Run one document through the full pagination pass.
    pub async fn paginate(
        &self,
        doc: &AssembledDocument,
        cancel: &CancelToken,
    ) -> Result<PaginatedDocument, PaginationError> {
        let mut state = PaginationState::Loaded;
        let result = self.run(doc, cancel, &mut state).await;
        match &result {
            Ok(paginated) => log::debug!(
                "pagination resolved: {} page(s), {} bytes",
                paginated.page_count,
                paginated.final_html.len()
            ),
            Err(e) => log::debug!("pagination {:?} -> {:?}: {e}", state, PaginationState::Failed),
        }
        result
    }

    async fn run(
        &self,
        doc: &AssembledDocument,
        cancel: &CancelToken,
        state: &mut PaginationState,
    ) -> Result<PaginatedDocument, PaginationError> {
        if cancel.is_cancelled() {
            return Err(PaginationError::Cancelled { state: *state });
        }

        // Loaded: acquiring and loading share one timeout.
        let current = *state;
        let mut engine = guarded(current, self.config.load_timeout(), cancel, async {
            let mut engine = lease(self.provider.as_ref())
                .await
                .map_err(|e| PaginationError::from_engine(current, e))?;
            engine
                .load_markup(&doc.html)
                .await
                .map_err(|e| PaginationError::from_engine(current, e))?;
            Ok(engine)
        })
        .await?;
        self.advance(state);

        // ScriptsAttached
        if !doc.bundles.is_empty() {
            let current = *state;
            guarded(current, self.config.scripts_timeout(), cancel, async {
                self.attach_scripts(&mut engine, doc, current).await
            })
            .await?;
        }
        self.advance(state);

        // PaginationRunning
        let current = *state;
        guarded(current, self.config.pagination_timeout(), cancel, async {
            exec(&mut engine, &self.polyfill, current).await?;
            let reported = exec(&mut engine, &self.invoke, current).await?;
            log::debug!("polyfill reported {reported}");
            Ok(())
        })
        .await?;
        self.advance(state);

        // Resolved
        let current = *state;
        let selector = self.config.page_selector.clone();
        let (html, page_count) = guarded(current, self.config.resolve_timeout(), cancel, async {
            let count = engine
                .page_count(&selector)
                .await
                .map_err(|e| PaginationError::from_engine(current, e))?;
            let count = if count == 0 {
                log::warn!("no elements match {selector:?} after pagination; assuming one page");
                1
            } else {
                count
            };
            exec(&mut engine, &resolve_script(count), current).await?;
            let html = engine
                .serialize_markup()
                .await
                .map_err(|e| PaginationError::from_engine(current, e))?;
            Ok((html, count))
        })
        .await?;
        drop(engine);

        Ok(PaginatedDocument {
            final_html: finalize_markup(&html, page_count),
            page_count,
        })
    }

    fn advance(&self, state: &mut PaginationState) {
        if let Some(next) = state.next() {
            log::debug!("pagination {:?} -> {:?}", state, next);
            *state = next;
        }
    }

    async fn attach_scripts(
        &self,
        engine: &mut EngineLease,
        doc: &AssembledDocument,
        state: PaginationState,
    ) -> Result<(), PaginationError> {
        exec(engine, &doc.bundles.prelude, state).await?;
        for bundle in &doc.bundles.bundles {
            exec(engine, &bundle.script, state).await?;
        }
        let probe = ready_probe(doc.bundles.ids());
        let poll = self.config.ready_poll();
        loop {
            let value = exec(engine, &probe, state).await?;
            let readiness: Readiness = serde_json::from_value(value).map_err(|e| {
                PaginationError::Engine {
                    state,
                    message: format!("unexpected readiness report: {e}"),
                }
            })?;
            if let Some(failure) = readiness.errors.first() {
                return Err(PaginationError::Script {
                    state,
                    message: format!("{} failed to mount: {}", failure.id, failure.message),
                });
            }
            if readiness.pending == 0 {
                return Ok(());
            }
            tokio::time::sleep(poll).await;
        }
    }
}

async fn exec(
    engine: &mut EngineLease,
    script: &str,
    state: PaginationState,
) -> Result<serde_json::Value, PaginationError> {
    engine
        .execute_script(script)
        .await
        .map_err(|e| PaginationError::from_engine(state, e))
}

/// Race `fut` against the state timeout and the cancel token.
async fn guarded<T>(
    state: PaginationState,
    timeout: Duration,
    cancel: &CancelToken,
    fut: impl Future<Output = Result<T, PaginationError>>,
) -> Result<T, PaginationError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PaginationError::Cancelled { state }),
        result = tokio::time::timeout(timeout, fut) => match result {
            Ok(result) => result,
            Err(_) => Err(PaginationError::Timeout { state, after: timeout }),
        },
    }
}

/// Reports `{pending, errors}` over the given placeholder ids.
fn ready_probe<'a>(ids: impl Iterator<Item = &'a str>) -> String {
    let ids: Vec<&str> = ids.collect();
    let ids = serde_json::to_string(&ids).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"/* docpress:ready-probe */ (function (ids) {{
  var pending = 0, errors = [];
  ids.forEach(function (id) {{
    var el = document.getElementById(id);
    if (!el) {{ errors.push({{ id: id, message: "mount container missing" }}); return; }}
    var state = el.getAttribute("{READY_ATTR}");
    if (state === "error") errors.push({{ id: id, message: el.getAttribute("{ERROR_ATTR}") || "" }});
    else if (state !== "true") pending++;
  }});
  return {{ pending: pending, errors: errors }};
}})({ids})"#
    )
}

/// Fills every total-page reference and writes the page-count marker.
fn resolve_script(page_count: u32) -> String {
    format!(
        r#"/* docpress:resolve */ (function (n) {{
  var refs = document.querySelectorAll("[{TOTAL_PAGES_ATTR}]");
  for (var i = 0; i < refs.length; i++) refs[i].textContent = String(n);
  var meta = document.querySelector('meta[name="{PAGE_COUNT_META}"]');
  if (!meta) {{
    meta = document.createElement("meta");
    meta.setAttribute("name", "{PAGE_COUNT_META}");
    document.head.appendChild(meta);
  }}
  meta.setAttribute("{PAGE_COUNT_ATTR}", String(n));
  return refs.length;
}})({page_count})"#
    )
}

#[cfg(test)]
impl PaginatedDocument {
    pub(crate) fn for_tests(final_html: &str, page_count: u32) -> Self {
        Self {
            final_html: final_html.to_string(),
            page_count,
        }
    }
}
