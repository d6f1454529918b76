//! Headless Chromium engine over the DevTools protocol (chromiumoxide).
//!
//! One browser process per provider; every lease is a fresh tab that is
//! closed on release.

use std::sync::Arc;

use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::{EngineFuture, EngineProvider, RenderingEngine};
use crate::config::ChromiumConfig;
use crate::error::EngineError;
use crate::geometry::PageGeometry;

/// Launches Chromium once and hands out tabs.
pub struct ChromiumProvider {
    browser: Arc<Browser>,
    handler: JoinHandle<()>,
}

impl ChromiumProvider {
    pub async fn launch(config: &ChromiumConfig) -> Result<Self, EngineError> {
        let mut builder = BrowserConfig::builder();
        if let Some(exe) = &config.executable {
            builder = builder.chrome_executable(exe);
        }
        if config.no_sandbox {
            builder = builder.no_sandbox();
        }
        for arg in &config.args {
            builder = builder.arg(arg.as_str());
        }
        let browser_config = builder.build().map_err(EngineError::Unavailable)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    log::debug!("browser handler error: {e}");
                }
            }
            log::debug!("browser handler stream ended");
        });

        log::info!("chromium launched");
        Ok(Self {
            browser: Arc::new(browser),
            handler,
        })
    }
}

impl Drop for ChromiumProvider {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

impl EngineProvider for ChromiumProvider {
    fn acquire(&self) -> EngineFuture<'_, Box<dyn RenderingEngine>> {
        Box::pin(async move {
            // Detached: a tab that arrives after the caller gave up is closed
            // by the task instead of leaking.
            let browser = self.browser.clone();
            let (tx, rx) = oneshot::channel();
            tokio::spawn(async move {
                let created = browser.new_page("about:blank").await;
                if let Err(Ok(page)) = tx.send(created) {
                    log::debug!("tab created after its acquire was abandoned; closing");
                    if let Err(e) = page.close().await {
                        log::debug!("closing abandoned tab failed: {e}");
                    }
                }
            });
            let page = rx
                .await
                .map_err(|_| EngineError::Unavailable("tab creation task ended".to_string()))?
                .map_err(|e| EngineError::Unavailable(e.to_string()))?;
            Ok(Box::new(ChromiumTab { page: Some(page) }) as Box<dyn RenderingEngine>)
        })
    }
}

/// One browser tab.
struct ChromiumTab {
    page: Option<Page>,
}

impl ChromiumTab {
    fn page(&self) -> Result<&Page, EngineError> {
        self.page
            .as_ref()
            .ok_or_else(|| EngineError::Protocol("tab already closed".to_string()))
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, EngineError> {
        let params = EvaluateParams::builder()
            .expression(script)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(EngineError::Protocol)?;
        let result = self
            .page()?
            .evaluate_expression(params)
            .await
            .map_err(map_cdp)?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }
}

fn map_cdp(err: CdpError) -> EngineError {
    match err {
        CdpError::JavascriptException(details) => {
            let message = details
                .exception
                .as_ref()
                .and_then(|e| e.description.clone())
                .unwrap_or_else(|| details.text.clone());
            EngineError::Script(message)
        }
        other => EngineError::Protocol(other.to_string()),
    }
}

impl RenderingEngine for ChromiumTab {
    fn load_markup<'a>(&'a mut self, html: &'a str) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            self.page()?.set_content(html).await.map_err(map_cdp)?;
            Ok(())
        })
    }

    fn execute_script<'a>(&'a mut self, script: &'a str) -> EngineFuture<'a, serde_json::Value> {
        Box::pin(async move { self.evaluate(script).await })
    }

    fn page_count<'a>(&'a mut self, selector: &'a str) -> EngineFuture<'a, u32> {
        Box::pin(async move {
            let selector = serde_json::to_string(selector)
                .map_err(|e| EngineError::Protocol(e.to_string()))?;
            let value = self
                .evaluate(&format!("document.querySelectorAll({selector}).length"))
                .await?;
            value
                .as_u64()
                .map(|n| n as u32)
                .ok_or_else(|| EngineError::Protocol(format!("page count was {value}")))
        })
    }

    fn serialize_markup(&mut self) -> EngineFuture<'_, String> {
        Box::pin(async move { self.page()?.content().await.map_err(map_cdp) })
    }

    fn print_pdf<'a>(&'a mut self, geometry: &'a PageGeometry) -> EngineFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let params = PrintToPdfParams {
                paper_width: Some(geometry.width_in() as f64),
                paper_height: Some(geometry.height_in() as f64),
                margin_top: Some(0.0),
                margin_bottom: Some(0.0),
                margin_left: Some(0.0),
                margin_right: Some(0.0),
                print_background: Some(true),
                prefer_css_page_size: Some(true),
                ..Default::default()
            };
            self.page()?.pdf(params).await.map_err(map_cdp)
        })
    }

    fn release(&mut self) {
        let Some(page) = self.page.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = page.close().await {
                        log::debug!("closing tab failed: {e}");
                    }
                });
            }
            // No runtime left; the tab goes away with the browser.
            Err(_) => drop(page),
        }
    }
}
