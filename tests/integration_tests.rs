//! Integration tests for the docpress pipeline.
//!
//! These tests validate:
//! - Total-page references resolve to the engine's page count
//! - Engine instances are released on success, timeout and cancellation
//! - Client detection and bundling across documents
//! - Style resolution is deterministic and cached
//! - The conversion retry contract, against a scripted backend and a real
//!   HTTP endpoint
//! - Batches isolate failures

mod support;

use std::sync::Arc;
use std::time::Duration;

use docpress::assemble::page_count_meta;
use docpress::client::{self, MemoryModuleResolver};
use docpress::config::{BackendKind, PaginationConfig};
use docpress::convert::{Dispatcher, RemoteBackend, RetryPolicy};
use docpress::error::{BackendFailure, ConversionError, PaginationError};
use docpress::paginate::{Orchestrator, PaginationState};
use docpress::style::{BuiltinUtilities, StyleCache, StyleResolver};
use docpress::templates;
use docpress::tree::{CLIENT_ATTR, TOTAL_PAGES_TOKEN};
use docpress::{
    CancelToken, DocumentSpec, Element, Node, Output, OutputMode, Pipeline, RenderConfig,
    RenderError,
};
use serde_json::json;

use support::{FakeEngines, ScriptedBackend, TestServer, FAIL_MARKER};

// =====================================================================
// Helpers
// =====================================================================

fn fast_config() -> RenderConfig {
    let mut config = RenderConfig::default();
    config.pagination = PaginationConfig {
        load_timeout_ms: 500,
        scripts_timeout_ms: 500,
        pagination_timeout_ms: 500,
        resolve_timeout_ms: 500,
        ready_poll_ms: 1,
        ..PaginationConfig::default()
    };
    config.conversion.max_retries = 3;
    config.conversion.initial_backoff_ms = 1;
    config.conversion.max_backoff_ms = 4;
    config
}

fn pipeline_with(engines: Arc<FakeEngines>, config: RenderConfig) -> Pipeline {
    Pipeline::new(config, engines, Arc::new(templates::sample_modules())).unwrap()
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
    }
}

/// Paginate a minimal document so conversion tests have real input.
async fn paginated(engines: Arc<FakeEngines>) -> docpress::paginate::PaginatedDocument {
    let pipeline = pipeline_with(engines.clone(), fast_config());
    let doc = DocumentSpec::from_html(templates::minimal_template());
    let (assembled, _) = pipeline.prepare(&doc).unwrap();
    let orchestrator = Orchestrator::new(engines, fast_config().pagination).unwrap();
    orchestrator
        .paginate(&assembled, &CancelToken::new())
        .await
        .unwrap()
}

// =====================================================================
// Pagination
// =====================================================================

#[tokio::test]
async fn total_pages_resolve_to_engine_page_count() {
    // 3 sections × 13 paragraphs + 1 intro paragraph = 40 → 4 pages at 10/page.
    let engines = FakeEngines::new(10);
    let pipeline = pipeline_with(engines.clone(), fast_config());
    let doc = DocumentSpec::from_html(&templates::long_report_template(3));

    let outcome = pipeline
        .render(&doc, OutputMode::Preview, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.page_count, 4);
    let Output::Html(html) = &outcome.output else {
        panic!("preview should produce HTML");
    };
    assert!(!html.contains(TOTAL_PAGES_TOKEN));
    assert_eq!(html.matches(">4</span>").count(), 4);
    assert_eq!(html.matches(&page_count_meta(4)).count(), 1);
    assert!(html.starts_with("<!DOCTYPE html>"));
    assert_eq!(engines.live(), 0);
}

#[tokio::test]
async fn short_document_is_one_page() {
    let engines = FakeEngines::new(10);
    let pipeline = pipeline_with(engines.clone(), fast_config());
    let doc = DocumentSpec::from_html(templates::minimal_template());

    let outcome = pipeline
        .render(&doc, OutputMode::Pdf, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.page_count, 1);
    assert!(outcome.output.as_bytes().starts_with(b"%PDF"));
    // One lease to paginate, one to print.
    assert_eq!(engines.acquired(), 2);
    assert_eq!(engines.live(), 0);
}

#[tokio::test]
async fn pagination_timeout_releases_the_engine() {
    let engines = FakeEngines::hanging();
    let mut config = fast_config();
    config.pagination.pagination_timeout_ms = 30;
    let pipeline = pipeline_with(engines.clone(), config);
    let doc = DocumentSpec::from_html(templates::minimal_template());

    let err = pipeline
        .render(&doc, OutputMode::Pdf, &CancelToken::new())
        .await
        .unwrap_err();

    match err {
        RenderError::Pagination(PaginationError::Timeout { state, .. }) => {
            assert_eq!(state, PaginationState::PaginationRunning)
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
    assert_eq!(engines.acquired(), 1);
    assert_eq!(engines.live(), 0);
}

#[tokio::test]
async fn cancellation_mid_pagination_releases_the_engine() {
    let engines = FakeEngines::hanging();
    let mut config = fast_config();
    config.pagination.pagination_timeout_ms = 60_000;
    let pipeline = pipeline_with(engines.clone(), config);
    let doc = DocumentSpec::from_html(templates::minimal_template());
    let cancel = CancelToken::new();

    let trigger = cancel.clone();
    let probe = engines.clone();
    tokio::spawn(async move {
        while !probe.script_tags().iter().any(|t| t == "paginate") {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        trigger.cancel();
    });

    let err = pipeline
        .render(&doc, OutputMode::Pdf, &cancel)
        .await
        .unwrap_err();

    assert!(
        matches!(
            err,
            RenderError::Pagination(PaginationError::Cancelled {
                state: PaginationState::PaginationRunning
            })
        ),
        "unexpected error: {err:?}"
    );
    assert_eq!(engines.live(), 0);
}

#[tokio::test]
async fn scripts_run_in_order() {
    let engines = FakeEngines::new(10);
    let pipeline = pipeline_with(engines.clone(), fast_config());
    let doc = DocumentSpec::from_html(templates::chart_report_template());

    let outcome = pipeline
        .render(&doc, OutputMode::Preview, &CancelToken::new())
        .await
        .unwrap();
    assert!(outcome.warnings.is_empty());

    let tags = engines.script_tags();
    let polyfill = tags.iter().position(|t| t == "polyfill").unwrap();
    let probe = tags.iter().position(|t| t == "ready-probe").unwrap();
    let resolve = tags.iter().position(|t| t == "resolve").unwrap();
    // Prelude plus one script per chart, all before the probe.
    assert_eq!(tags[..probe].len(), 3);
    assert!(probe < polyfill);
    assert!(polyfill < resolve);
}

// =====================================================================
// Client detection and bundling
// =====================================================================

#[test]
fn document_without_clients_has_no_client_markers() {
    let engines = FakeEngines::new(10);
    let pipeline = pipeline_with(engines, fast_config());
    let doc = DocumentSpec::from_html(templates::invoice_template());

    let (assembled, warnings) = pipeline.prepare(&doc).unwrap();

    assert!(warnings.is_empty());
    assert!(assembled.bundles.is_empty());
    assert!(assembled.bundles.prelude.is_empty());
    assert!(!assembled.html.contains(CLIENT_ATTR));
}

#[test]
fn two_instances_share_dependencies() {
    let tree = docpress::tree::parse_html(templates::chart_report_template());
    let detection = client::detect(&tree);
    assert_eq!(detection.clients.len(), 2);
    assert_ne!(detection.clients[0].id, detection.clients[1].id);

    let (manifest, errors) = client::bundle(&detection.clients, &templates::sample_modules());
    assert!(errors.is_empty());
    assert_eq!(manifest.len(), 2);
    assert_eq!(
        manifest
            .prelude
            .matches("window.__docpress.define(\"charts/scale.js\"")
            .count(),
        1
    );
    for bundle in &manifest.bundles {
        assert!(bundle.script.contains(&bundle.id));
    }
}

#[test]
fn unresolvable_component_is_reported_not_fatal() {
    let modules = MemoryModuleResolver::new()
        .with_module("ok.js", "module.exports = function (el) {};");
    let engines = FakeEngines::new(10);
    let pipeline = Pipeline::new(fast_config(), engines, Arc::new(modules)).unwrap();
    let doc = DocumentSpec::new(vec![
        Node::client("ok.js", json!({})),
        Node::client("gone.js", json!({})),
    ]);

    let (assembled, warnings) = pipeline.prepare(&doc).unwrap();
    assert_eq!(assembled.bundles.len(), 1);
    assert_eq!(warnings.len(), 1);
    // Both placeholders stay in the markup.
    assert_eq!(assembled.html.matches(CLIENT_ATTR).count(), 2);
}

#[tokio::test]
async fn unresolvable_component_renders_as_partial_success() {
    let modules = MemoryModuleResolver::new()
        .with_module("ok.js", "module.exports = function (el) {};");
    let engines = FakeEngines::new(10);
    let pipeline = Pipeline::new(fast_config(), engines.clone(), Arc::new(modules)).unwrap();
    let doc = DocumentSpec::new(vec![
        Node::client("ok.js", json!({})),
        Node::client("gone.js", json!({})),
    ]);

    let outcome = pipeline
        .render(&doc, OutputMode::Preview, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.warnings.len(), 1);
    let Output::Html(html) = &outcome.output else {
        panic!("preview renders HTML");
    };
    // The failed component's placeholder survives, empty.
    assert!(html.contains(outcome.warnings[0].id()));
    assert_eq!(html.matches(CLIENT_ATTR).count(), 2);
    assert_eq!(engines.live(), 0);

    let pdf = pipeline
        .render(&doc, OutputMode::Pdf, &CancelToken::new())
        .await
        .unwrap();
    assert!(matches!(pdf.output, Output::Pdf(_)));
    assert_eq!(pdf.warnings.len(), 1);
}

// =====================================================================
// Styles
// =====================================================================

#[test]
fn style_resolution_is_idempotent_and_cached() {
    let resolver = StyleResolver::new(Arc::new(BuiltinUtilities), Arc::new(StyleCache::new(8)));
    let modules = templates::sample_modules();
    let doc = DocumentSpec::new(vec![Node::from(
        Element::new("div")
            .class("p-4 text-blue-700 font-bold")
            .child(Node::client("charts/bar.js", json!({"values": [1]}))),
    )]);

    let first = resolver.resolve(&doc, &modules).unwrap();
    let second = resolver.resolve(&doc, &modules).unwrap();

    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(first.precompiled_css, second.precompiled_css);
    assert_eq!(first.fingerprint, second.fingerprint);
    // Classes used only inside the client module are compiled too.
    assert!(first.precompiled_css.contains(".w-8"));
    assert_eq!(resolver.cache().stats().entries, 1);
}

// =====================================================================
// Conversion
// =====================================================================

#[tokio::test]
async fn unreachable_backend_is_tried_max_retries_plus_one_times() {
    let doc = paginated(FakeEngines::new(10)).await;
    let backend = ScriptedBackend::new(vec![Err(BackendFailure::Unreachable("down".into()))]);
    let dispatcher = Dispatcher::new(backend.clone(), fast_policy());

    let err = dispatcher
        .convert(&doc, &Default::default(), &CancelToken::new())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ConversionError::Unavailable {
            attempts: 4,
            reason: "down".into()
        }
    );
    assert_eq!(backend.calls(), 4);
}

#[tokio::test]
async fn rejection_is_a_single_attempt_with_verbatim_diagnostic() {
    let doc = paginated(FakeEngines::new(10)).await;
    let backend = ScriptedBackend::new(vec![Err(BackendFailure::Rejected {
        status: Some(422),
        diagnostic: "unsupported <canvas> at line 3".into(),
    })]);
    let dispatcher = Dispatcher::new(backend.clone(), fast_policy());

    let err = dispatcher
        .convert(&doc, &Default::default(), &CancelToken::new())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ConversionError::Rejected {
            status: Some(422),
            diagnostic: "unsupported <canvas> at line 3".into()
        }
    );
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn remote_backend_retries_service_unavailable() {
    let server = TestServer::start(vec![(503, "busy"), (503, "busy"), (200, "%PDF-1.7 remote")]).await;
    let doc = paginated(FakeEngines::new(10)).await;
    let backend = RemoteBackend::new(&server.url(), "/forms/chromium/convert/html", Duration::from_secs(5)).unwrap();
    let dispatcher = Dispatcher::new(Arc::new(backend), fast_policy());

    let pdf = dispatcher
        .convert(&doc, &Default::default(), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(pdf, b"%PDF-1.7 remote");
    assert_eq!(server.requests(), 3);
    let request = String::from_utf8_lossy(&server.bodies.lock().unwrap()[0]).to_string();
    assert!(request.starts_with("POST /forms/chromium/convert/html"));
    assert!(request.contains("name=\"files\"; filename=\"index.html\""));
    assert!(request.contains("name=\"paperWidth\""));
    assert!(request.contains("Hello, World!"));
}

#[tokio::test]
async fn remote_backend_rejection_carries_body() {
    let server = TestServer::start(vec![(400, "paperWidth is out of range")]).await;
    let doc = paginated(FakeEngines::new(10)).await;
    let backend = RemoteBackend::new(&server.url(), "convert", Duration::from_secs(5)).unwrap();
    let dispatcher = Dispatcher::new(Arc::new(backend), fast_policy());

    let err = dispatcher
        .convert(&doc, &Default::default(), &CancelToken::new())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ConversionError::Rejected {
            status: Some(400),
            diagnostic: "paperWidth is out of range".into()
        }
    );
    assert_eq!(server.requests(), 1);
}

#[tokio::test]
async fn remote_rejection_keeps_non_utf8_body_and_read_failures() {
    let invalid = b"HTTP/1.1 422 Unprocessable Entity\r\nContent-Length: 10\r\nContent-Type: text/plain; charset=iso-8859-1\r\nConnection: close\r\n\r\nbad \xff page".to_vec();
    // Declares more body than it sends, then hangs up.
    let truncated = b"HTTP/1.1 400 Bad Request\r\nContent-Length: 500\r\nConnection: close\r\n\r\npartial".to_vec();
    let server = TestServer::start_raw(vec![invalid, truncated]).await;
    let doc = paginated(FakeEngines::new(10)).await;
    let backend = RemoteBackend::new(&server.url(), "convert", Duration::from_secs(5)).unwrap();
    let dispatcher = Dispatcher::new(Arc::new(backend), fast_policy());

    let first = dispatcher
        .convert(&doc, &Default::default(), &CancelToken::new())
        .await
        .unwrap_err();
    assert_eq!(
        first,
        ConversionError::Rejected {
            status: Some(422),
            diagnostic: "bad \u{FFFD} page".into()
        }
    );

    let second = dispatcher
        .convert(&doc, &Default::default(), &CancelToken::new())
        .await
        .unwrap_err();
    match second {
        ConversionError::Rejected { status, diagnostic } => {
            assert_eq!(status, Some(400));
            assert!(diagnostic.contains("unreadable"), "{diagnostic}");
        }
        other => panic!("expected a rejection, got {other:?}"),
    }
    assert_eq!(server.requests(), 2);
}

#[tokio::test]
async fn pipeline_uses_configured_remote_backend() {
    let server = TestServer::start(vec![(200, "%PDF-1.7 via pipeline")]).await;
    let engines = FakeEngines::new(10);
    let mut config = fast_config();
    config.conversion.backend = BackendKind::Remote;
    config.conversion.remote_url = Some(server.url());
    let pipeline = pipeline_with(engines.clone(), config);

    let outcome = pipeline
        .render(
            &DocumentSpec::from_html(templates::invoice_template()),
            OutputMode::Pdf,
            &CancelToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.output, Output::Pdf(b"%PDF-1.7 via pipeline".to_vec()));
    // Only the pagination lease; the remote service did the printing.
    assert_eq!(engines.acquired(), 1);
    assert_eq!(engines.live(), 0);
}

// =====================================================================
// Batches
// =====================================================================

#[tokio::test]
async fn batch_isolates_failures() {
    let engines = FakeEngines::new(10);
    let pipeline = pipeline_with(engines.clone(), fast_config());
    let docs = vec![
        DocumentSpec::from_html(templates::invoice_template()).with_title("a"),
        DocumentSpec::from_html(&format!("<p>{FAIL_MARKER}</p>")).with_title("b"),
        DocumentSpec::from_html(&templates::long_report_template(2)).with_title("c"),
    ];

    let results = pipeline
        .render_batch(&docs, OutputMode::Pdf, &CancelToken::new())
        .await;

    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(matches!(
        results[1],
        Err(RenderError::Pagination(PaginationError::Script { .. }))
    ));
    // 2 × 13 + 1 = 27 paragraphs → 3 pages.
    assert_eq!(results[2].as_ref().unwrap().page_count, 3);
    assert_eq!(engines.live(), 0);
}

#[tokio::test]
async fn cancelled_batch_fails_every_document() {
    let engines = FakeEngines::new(10);
    let pipeline = pipeline_with(engines.clone(), fast_config());
    let docs = vec![
        DocumentSpec::from_html(templates::minimal_template()),
        DocumentSpec::from_html(templates::invoice_template()),
    ];
    let cancel = CancelToken::new();
    cancel.cancel();

    let results = pipeline.render_batch(&docs, OutputMode::Pdf, &cancel).await;

    assert!(results
        .iter()
        .all(|r| matches!(r, Err(RenderError::Cancelled))));
    assert_eq!(engines.acquired(), 0);
}
