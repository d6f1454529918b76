//! Remote conversion service backend (multipart HTTP).
//!
//! Wire contract: `POST {base}{endpoint}` with `files` = `index.html`,
//! paper size in inches, zero margins, `preferCssPageSize` and
//! `printBackground` set. 2xx bodies are PDF bytes.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;

use super::{BackendFuture, ConversionBackend};
use crate::error::{BackendFailure, ConfigError};
use crate::geometry::PageGeometry;

pub struct RemoteBackend {
    client: reqwest::Client,
    url: String,
}

impl RemoteBackend {
    pub fn new(base_url: &str, endpoint: &str, request_timeout: Duration) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("cannot build HTTP client: {e}")))?;
        let url = format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        );
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn form(html: &str, geometry: &PageGeometry) -> Result<Form, BackendFailure> {
        let file = Part::bytes(html.as_bytes().to_vec())
            .file_name("index.html")
            .mime_str("text/html")
            .map_err(|e| BackendFailure::Rejected {
                status: None,
                diagnostic: e.to_string(),
            })?;
        Ok(Form::new()
            .part("files", file)
            .text("paperWidth", inches(geometry.width_in()))
            .text("paperHeight", inches(geometry.height_in()))
            .text("marginTop", "0")
            .text("marginBottom", "0")
            .text("marginLeft", "0")
            .text("marginRight", "0")
            .text("preferCssPageSize", "true")
            .text("printBackground", "true"))
    }
}

/// Statuses worth another attempt.
fn is_transient(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 429 | 502 | 503 | 504)
}

fn inches(v: f32) -> String {
    let s = format!("{v:.4}");
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

impl ConversionBackend for RemoteBackend {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn convert<'a>(&'a self, html: &'a str, geometry: &'a PageGeometry) -> BackendFuture<'a> {
        Box::pin(async move {
            let form = Self::form(html, geometry)?;
            let response = self
                .client
                .post(&self.url)
                .multipart(form)
                .send()
                .await
                .map_err(|e| {
                    if e.is_builder() {
                        BackendFailure::Rejected {
                            status: None,
                            diagnostic: e.to_string(),
                        }
                    } else {
                        BackendFailure::Unreachable(e.to_string())
                    }
                })?;

            let status = response.status();
            if status.is_success() {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| BackendFailure::Unreachable(e.to_string()))?;
                return Ok(body.to_vec());
            }

            let diagnostic = match response.bytes().await {
                Ok(body) => String::from_utf8_lossy(&body).into_owned(),
                Err(e) => format!("<response body unreadable: {e}>"),
            };
            if is_transient(status) {
                Err(BackendFailure::Unreachable(format!("HTTP {status}: {diagnostic}")))
            } else {
                Err(BackendFailure::Rejected {
                    status: Some(status.as_u16()),
                    diagnostic,
                })
            }
        })
    }
}
