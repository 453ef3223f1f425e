#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Router;
use cptrack_adapters::{Endpoints, ExtractContext};
use cptrack_storage::{BackoffPolicy, HttpClientConfig, HttpFetcher, Jitter};

pub fn fixture_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures")
        .join(relative)
}

pub fn fixture(relative: &str) -> String {
    std::fs::read_to_string(fixture_path(relative)).expect("fixture exists")
}

pub fn json_response(body: String) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}

pub fn html_response(body: String) -> Response {
    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], body).into_response()
}

pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    format!("http://{addr}")
}

fn fast_policy() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

/// Context pointed at a local mock, without pacing.
pub fn context(base: &str) -> ExtractContext {
    let http = HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(5),
        transient: fast_policy(),
        rate_limit: fast_policy(),
        ..HttpClientConfig::default()
    })
    .expect("http client");
    let mut ctx = ExtractContext::new(Arc::new(http));
    ctx.endpoints = Endpoints::rooted_at(base);
    ctx.jitter = Jitter::none();
    ctx
}
