//! Thin GraphQL wrapper over [`HttpFetcher`].

use cptrack_core::Source;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::http::{FetchError, FetchRequest, HttpFetcher, GRAPHQL_TIMEOUT};

#[derive(Debug, Serialize)]
pub struct RequestBody<'a> {
    pub query: &'a str,
    pub variables: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GraphqlError {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct QueryResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Option<Vec<GraphqlError>>,
}

impl<T> QueryResponse<T> {
    pub fn errors(&self) -> &[GraphqlError] {
        self.errors.as_deref().unwrap_or_default()
    }

    pub fn error_summary(&self) -> String {
        self.errors()
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// A GraphQL endpoint plus the extra headers it needs (referer, auth).
#[derive(Debug, Clone)]
pub struct GraphqlEndpoint {
    pub source: Source,
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl GraphqlEndpoint {
    pub fn new(source: Source, url: impl Into<String>) -> Self {
        Self {
            source,
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// One GraphQL POST; returns the parsed envelope and the raw body.
pub async fn post_query<T: DeserializeOwned>(
    fetcher: &HttpFetcher,
    run_id: Uuid,
    endpoint: &GraphqlEndpoint,
    query: &str,
    variables: JsonValue,
    cancel: &CancellationToken,
) -> Result<(QueryResponse<T>, String), FetchError> {
    let body = serde_json::to_value(RequestBody { query, variables }).map_err(|err| FetchError::Decode {
        url: endpoint.url.clone(),
        message: err.to_string(),
    })?;
    let mut request =
        FetchRequest::post_json(endpoint.source, endpoint.url.clone(), body).timeout(GRAPHQL_TIMEOUT);
    for (name, value) in &endpoint.headers {
        request = request.header(name.clone(), value.clone());
    }
    let resp = fetcher.fetch(run_id, &request, cancel).await?;
    let parsed = resp.json::<QueryResponse<T>>()?;
    Ok((parsed, resp.body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;

    use crate::http::HttpClientConfig;

    #[derive(Debug, Deserialize)]
    struct Data {
        #[serde(rename = "matchedUser")]
        matched_user: Option<JsonValue>,
    }

    #[tokio::test]
    async fn posts_query_and_variables_and_surfaces_errors() {
        let router = Router::new().route(
            "/graphql",
            post(|Json(body): Json<JsonValue>| async move {
                assert_eq!(body["variables"]["username"], "ghost");
                assert!(body["query"].as_str().unwrap().contains("matchedUser"));
                Json(json!({"data": {"matchedUser": null}, "errors": [{"message": "That user does not exist."}]}))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

        let fetcher = HttpFetcher::new(HttpClientConfig::default()).unwrap();
        let (resp, raw) = post_query::<Data>(
            &fetcher,
            Uuid::new_v4(),
            &GraphqlEndpoint::new(Source::LeetCode, format!("http://{addr}/graphql"))
                .header("referer", "https://leetcode.com"),
            "query q($username: String!) { matchedUser(username: $username) { username } }",
            json!({"username": "ghost"}),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(resp.data.as_ref().unwrap().matched_user.is_none());
        assert_eq!(resp.error_summary(), "That user does not exist.");
        assert!(raw.contains("does not exist"));
    }
}
