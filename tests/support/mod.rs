//! Shared test doubles: a layout-simulating rendering engine, a scripted
//! conversion backend and a minimal HTTP server standing in for a remote
//! conversion service.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use docpress::convert::{BackendFuture, ConversionBackend};
use docpress::engine::{EngineFuture, EngineProvider, RenderingEngine};
use docpress::error::{BackendFailure, EngineError};
use docpress::geometry::PageGeometry;
use docpress::tree::TOTAL_PAGES_TOKEN;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Documents containing this text fail inside the pagination pass.
pub const FAIL_MARKER: &str = "docpress-test-fail";

/// How the fake engine behaves when the pagination script runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginateBehaviour {
    /// Lay out `paragraphs_per_page` paragraphs per page.
    Layout,
    /// Never finish.
    Hang,
}

/// Engine provider whose instances "lay out" a document by counting its
/// paragraphs. Tracks how many instances are currently leased.
pub struct FakeEngines {
    pub live: Arc<AtomicUsize>,
    pub acquired: Arc<AtomicUsize>,
    pub scripts: Arc<Mutex<Vec<String>>>,
    pub paragraphs_per_page: usize,
    pub behaviour: PaginateBehaviour,
}

impl FakeEngines {
    pub fn new(paragraphs_per_page: usize) -> Arc<Self> {
        Arc::new(Self::build(paragraphs_per_page, PaginateBehaviour::Layout))
    }

    pub fn hanging() -> Arc<Self> {
        Arc::new(Self::build(1, PaginateBehaviour::Hang))
    }

    fn build(paragraphs_per_page: usize, behaviour: PaginateBehaviour) -> Self {
        Self {
            live: Arc::new(AtomicUsize::new(0)),
            acquired: Arc::new(AtomicUsize::new(0)),
            scripts: Arc::new(Mutex::new(Vec::new())),
            paragraphs_per_page,
            behaviour,
        }
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Tags of every executed script, in order. Untagged scripts show up
    /// as `"bundle"`.
    pub fn script_tags(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }
}

impl EngineProvider for FakeEngines {
    fn acquire(&self) -> EngineFuture<'_, Box<dyn RenderingEngine>> {
        self.live.fetch_add(1, Ordering::SeqCst);
        self.acquired.fetch_add(1, Ordering::SeqCst);
        let tab = FakeTab {
            live: self.live.clone(),
            scripts: self.scripts.clone(),
            paragraphs_per_page: self.paragraphs_per_page.max(1),
            behaviour: self.behaviour,
            html: String::new(),
            pages: 0,
        };
        Box::pin(async move { Ok(Box::new(tab) as Box<dyn RenderingEngine>) })
    }
}

struct FakeTab {
    live: Arc<AtomicUsize>,
    scripts: Arc<Mutex<Vec<String>>>,
    paragraphs_per_page: usize,
    behaviour: PaginateBehaviour,
    html: String,
    pages: u32,
}

fn tag_of(script: &str) -> String {
    let trimmed = script.trim_start();
    if !trimmed.starts_with("/*") {
        return "bundle".to_string();
    }
    trimmed
        .split("*/")
        .next()
        .unwrap_or_default()
        .trim_start_matches("/*")
        .trim()
        .trim_start_matches("docpress:")
        .to_string()
}

impl RenderingEngine for FakeTab {
    fn load_markup<'a>(&'a mut self, html: &'a str) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            self.html = html.to_string();
            Ok(())
        })
    }

    fn execute_script<'a>(&'a mut self, script: &'a str) -> EngineFuture<'a, Value> {
        Box::pin(async move {
            let tag = tag_of(script);
            self.scripts.lock().unwrap().push(tag.clone());
            match tag.as_str() {
                "paginate" => {
                    if self.html.contains(FAIL_MARKER) {
                        return Err(EngineError::Script("layout exploded".to_string()));
                    }
                    if self.behaviour == PaginateBehaviour::Hang {
                        futures::future::pending::<()>().await;
                    }
                    let paragraphs = self.html.matches("<p").count();
                    let pages = paragraphs.div_ceil(self.paragraphs_per_page).max(1);
                    self.pages = pages as u32;
                    Ok(json!(self.pages))
                }
                "ready-probe" => Ok(json!({ "pending": 0, "errors": [] })),
                "resolve" => {
                    let refs = self.html.matches(TOTAL_PAGES_TOKEN).count();
                    self.html = self
                        .html
                        .replace(TOTAL_PAGES_TOKEN, &self.pages.to_string());
                    Ok(json!(refs))
                }
                _ => Ok(Value::Null),
            }
        })
    }

    fn page_count<'a>(&'a mut self, _selector: &'a str) -> EngineFuture<'a, u32> {
        Box::pin(async move { Ok(self.pages) })
    }

    fn serialize_markup(&mut self) -> EngineFuture<'_, String> {
        Box::pin(async move { Ok(self.html.clone()) })
    }

    fn print_pdf<'a>(&'a mut self, geometry: &'a PageGeometry) -> EngineFuture<'a, Vec<u8>> {
        Box::pin(async move {
            Ok(format!("%PDF-1.7 {}x{}", geometry.width_pt, geometry.height_pt).into_bytes())
        })
    }

    fn release(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Conversion backend
// ---------------------------------------------------------------------------

/// Backend that replays a list of outcomes; the last one repeats.
pub struct ScriptedBackend {
    pub calls: AtomicU32,
    outcomes: Mutex<VecDeque<Result<Vec<u8>, BackendFailure>>>,
}

impl ScriptedBackend {
    pub fn new(outcomes: Vec<Result<Vec<u8>, BackendFailure>>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            outcomes: Mutex::new(outcomes.into()),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ConversionBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn convert<'a>(&'a self, _html: &'a str, _geometry: &'a PageGeometry) -> BackendFuture<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut outcomes = self.outcomes.lock().unwrap();
        let next = if outcomes.len() > 1 {
            outcomes.pop_front()
        } else {
            outcomes.front().cloned()
        };
        let next = next.unwrap_or_else(|| Err(BackendFailure::Unreachable("no outcome".into())));
        Box::pin(async move { next })
    }
}

// ---------------------------------------------------------------------------
// HTTP server
// ---------------------------------------------------------------------------

/// A one-connection-at-a-time HTTP server answering every request with the
/// next queued `(status, body)`; the last response repeats.
pub struct TestServer {
    pub addr: SocketAddr,
    pub requests: Arc<AtomicUsize>,
    pub bodies: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl TestServer {
    pub async fn start(responses: Vec<(u16, &'static str)>) -> Self {
        let raw = responses
            .into_iter()
            .map(|(status, body)| {
                format!(
                    "HTTP/1.1 {status} {}\r\nContent-Length: {}\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n\r\n{body}",
                    reason(status),
                    body.len()
                )
                .into_bytes()
            })
            .collect();
        Self::start_raw(raw).await
    }

    /// Serve pre-built raw responses, written as-is.
    pub async fn start_raw(responses: Vec<Vec<u8>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(AtomicUsize::new(0));
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let mut queue: VecDeque<Vec<u8>> = responses.into();

        let count = requests.clone();
        let seen = bodies.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let request = read_request(&mut socket).await;
                count.fetch_add(1, Ordering::SeqCst);
                seen.lock().unwrap().push(request);
                let response = if queue.len() > 1 {
                    queue.pop_front().unwrap_or_default()
                } else {
                    queue.front().cloned().unwrap_or_default()
                };
                let _ = socket.write_all(&response).await;
                let _ = socket.shutdown().await;
            }
        });

        Self {
            addr,
            requests,
            bodies,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        503 => "Service Unavailable",
        _ => "Status",
    }
}

/// Read one full request (headers plus body) so the client never sees a
/// reset while still sending.
async fn read_request(socket: &mut tokio::net::TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return buf,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);
        let Some(end) = find(&buf, b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
        let body = &buf[end + 4..];
        let complete = if let Some(len) = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
        {
            body.len() >= len
        } else if head.contains("transfer-encoding: chunked") {
            body.ends_with(b"0\r\n\r\n")
        } else {
            true
        };
        if complete {
            return buf;
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
