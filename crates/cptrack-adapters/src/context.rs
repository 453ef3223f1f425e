use std::sync::Arc;

use chrono::{DateTime, Utc};
use cptrack_core::{ExtractError, Source};
use cptrack_storage::graphql::{post_query, GraphqlEndpoint, QueryResponse};
use cptrack_storage::{BrowserConfig, CaptureStore, FetchError, FetchRequest, FetchedResponse, HttpFetcher, Jitter};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

/// Base URLs for every source; tests point these at a local mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub leetcode_graphql: String,
    pub codechef_base: String,
    pub codeforces_api: String,
    pub github_api: String,
    pub github_graphql: String,
    pub codolio_base: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            leetcode_graphql: "https://leetcode.com/graphql".to_string(),
            codechef_base: "https://www.codechef.com".to_string(),
            codeforces_api: "https://codeforces.com/api".to_string(),
            github_api: "https://api.github.com".to_string(),
            github_graphql: "https://api.github.com/graphql".to_string(),
            codolio_base: "https://codolio.com".to_string(),
        }
    }
}

impl Endpoints {
    /// Every endpoint rooted at one base URL (`{base}/graphql`, `{base}/api`, ...).
    pub fn rooted_at(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            leetcode_graphql: format!("{base}/graphql"),
            codechef_base: base.to_string(),
            codeforces_api: format!("{base}/api"),
            github_api: base.to_string(),
            github_graphql: format!("{base}/graphql"),
            codolio_base: base.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    pub include_history: bool,
    pub history_limit: usize,
    pub heatmap_window_days: u32,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            include_history: true,
            history_limit: 8,
            heatmap_window_days: 365,
        }
    }
}

/// Everything a tier needs for one extraction.
#[derive(Debug, Clone)]
pub struct ExtractContext {
    pub http: Arc<HttpFetcher>,
    pub browser: Option<BrowserConfig>,
    pub github_token: Option<String>,
    pub endpoints: Endpoints,
    pub jitter: Jitter,
    pub capture: Option<CaptureStore>,
    pub run_id: Uuid,
    pub now: DateTime<Utc>,
    pub cancel: CancellationToken,
}

impl ExtractContext {
    pub fn new(http: Arc<HttpFetcher>) -> Self {
        Self {
            http,
            browser: None,
            github_token: None,
            endpoints: Endpoints::default(),
            jitter: Jitter::default(),
            capture: None,
            run_id: Uuid::new_v4(),
            now: Utc::now(),
            cancel: CancellationToken::new(),
        }
    }

    /// Randomized pre-request sleep.
    pub async fn pace(&self) -> Result<(), ExtractError> {
        self.jitter
            .pause(&self.cancel)
            .await
            .map_err(|_| ExtractError::Cancelled)
    }

    /// Paced fetch that keeps the raw [`FetchError`] for callers that inspect
    /// error bodies.
    pub async fn fetch_raw(&self, request: &FetchRequest, handle: &str) -> Result<FetchedResponse, FetchError> {
        self.pace().await.map_err(|_| FetchError::Cancelled)?;
        let resp = self.http.fetch(self.run_id, request, &self.cancel).await?;
        self.capture_body(request.source, handle, resp.extension(), &resp.body)
            .await;
        Ok(resp)
    }

    pub async fn fetch(&self, request: &FetchRequest, handle: &str) -> Result<FetchedResponse, ExtractError> {
        self.fetch_raw(request, handle)
            .await
            .map_err(|err| err.into_extract_error(request.source, handle))
    }

    pub async fn graphql<T: DeserializeOwned>(
        &self,
        endpoint: &GraphqlEndpoint,
        handle: &str,
        query: &str,
        variables: JsonValue,
    ) -> Result<QueryResponse<T>, ExtractError> {
        self.pace().await?;
        let (resp, raw) = post_query(&self.http, self.run_id, endpoint, query, variables, &self.cancel)
            .await
            .map_err(|err| err.into_extract_error(endpoint.source, handle))?;
        self.capture_body(endpoint.source, handle, "json", &raw).await;
        Ok(resp)
    }

    /// Stores a copy of a fetched body when capture is enabled; failures are
    /// logged, never surfaced.
    pub async fn capture_body(&self, source: Source, handle: &str, extension: &str, body: &str) {
        let Some(store) = &self.capture else {
            return;
        };
        if let Err(err) = store
            .store(self.now, source, handle, extension, body.as_bytes())
            .await
        {
            warn!(error = %err, %source, handle, "failed to capture response body");
        }
    }
}
