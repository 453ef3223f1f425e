//! Headless-browser sessions over the W3C WebDriver HTTP protocol.
//!
//! A session is acquired per extraction and always released: [`with_browser`]
//! deletes it after the closure returns, and dropping an unclosed
//! [`BrowserSession`] spawns the delete on the current runtime.

use std::future::Future;
use std::time::{Duration, Instant};

use cptrack_core::{ErrorKind, ExtractError};
use serde::de::DeserializeOwned;
use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::pace::sleep_or_cancel;

pub const PAGE_LOAD_TIMEOUT: Duration = Duration::from_secs(60);
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub webdriver_url: String,
    pub page_load_timeout: Duration,
    pub user_agent: Option<String>,
    pub headless: bool,
}

impl BrowserConfig {
    pub fn new(webdriver_url: impl Into<String>) -> Self {
        Self {
            webdriver_url: webdriver_url.into(),
            page_load_timeout: PAGE_LOAD_TIMEOUT,
            user_agent: None,
            headless: true,
        }
    }

    fn capabilities(&self) -> JsonValue {
        let mut args = vec![
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--disable-gpu".to_string(),
            "--window-size=1366,900".to_string(),
        ];
        if self.headless {
            args.push("--headless=new".to_string());
        }
        if let Some(ua) = &self.user_agent {
            args.push(format!("--user-agent={ua}"));
        }
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": args }
                }
            }
        })
    }
}

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("webdriver session could not be created: {0}")]
    SessionNotCreated(String),
    #[error("webdriver {command} failed: {message}")]
    Command { command: String, message: String },
    #[error("no element matches {selector}")]
    NoSuchElement { selector: String },
    #[error("timed out after {waited:?} waiting for {selector}")]
    WaitTimeout { selector: String, waited: Duration },
    #[error("webdriver transport error: {0}")]
    Transport(String),
    #[error("browser session cancelled")]
    Cancelled,
}

impl BrowserError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BrowserError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::RendererError,
        }
    }
}

impl From<BrowserError> for ExtractError {
    fn from(err: BrowserError) -> Self {
        match err {
            BrowserError::Cancelled => ExtractError::Cancelled,
            other => ExtractError::Renderer(other.to_string()),
        }
    }
}

/// Command half of a session; cheap to clone into extraction closures.
#[derive(Debug, Clone)]
pub struct BrowserHandle {
    client: reqwest::Client,
    session_url: String,
    cancel: CancellationToken,
}

impl BrowserHandle {
    async fn command(&self, method: reqwest::Method, path: &str, body: Option<JsonValue>) -> Result<JsonValue, BrowserError> {
        let url = format!("{}{}", self.session_url, path);
        let mut request = self.client.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(&body);
        } else if method == reqwest::Method::POST {
            request = request.json(&json!({}));
        }
        let sent = tokio::select! {
            _ = self.cancel.cancelled() => return Err(BrowserError::Cancelled),
            sent = request.send() => sent,
        };
        let resp = sent.map_err(|err| BrowserError::Transport(err.to_string()))?;
        let status = resp.status();
        let payload: JsonValue = resp
            .json()
            .await
            .map_err(|err| BrowserError::Transport(err.to_string()))?;
        let value = payload.get("value").cloned().unwrap_or(JsonValue::Null);
        if status.is_success() {
            return Ok(value);
        }
        let error = value.get("error").and_then(JsonValue::as_str).unwrap_or("unknown error");
        let message = value.get("message").and_then(JsonValue::as_str).unwrap_or_default();
        Err(BrowserError::Command {
            command: format!("{method} {path}"),
            message: format!("{error}: {message}"),
        })
    }

    pub async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        debug!(url, "browser navigate");
        self.command(reqwest::Method::POST, "/url", Some(json!({ "url": url })))
            .await
            .map(|_| ())
    }

    /// Element id of the first match, `None` when nothing matches.
    pub async fn find_css(&self, selector: &str) -> Result<Option<String>, BrowserError> {
        let found = self
            .command(
                reqwest::Method::POST,
                "/element",
                Some(json!({ "using": "css selector", "value": selector })),
            )
            .await;
        match found {
            Ok(value) => Ok(value.get(ELEMENT_KEY).and_then(JsonValue::as_str).map(str::to_string)),
            Err(BrowserError::Command { message, .. }) if message.starts_with("no such element") => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Polls until `selector` matches or `timeout` elapses.
    pub async fn wait_for_css(&self, selector: &str, timeout: Duration) -> Result<(), BrowserError> {
        let started = Instant::now();
        loop {
            if self.find_css(selector).await?.is_some() {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(BrowserError::WaitTimeout {
                    selector: selector.to_string(),
                    waited: started.elapsed(),
                });
            }
            self.pause(POLL_INTERVAL).await?;
        }
    }

    pub async fn pause(&self, duration: Duration) -> Result<(), BrowserError> {
        sleep_or_cancel(duration, &self.cancel)
            .await
            .map_err(|_| BrowserError::Cancelled)
    }

    pub async fn execute<T: DeserializeOwned>(&self, script: &str, args: Vec<JsonValue>) -> Result<T, BrowserError> {
        let value = self
            .command(
                reqwest::Method::POST,
                "/execute/sync",
                Some(json!({ "script": script, "args": args })),
            )
            .await?;
        serde_json::from_value(value).map_err(|err| BrowserError::Command {
            command: "execute/sync".to_string(),
            message: format!("unexpected script result: {err}"),
        })
    }

    pub async fn page_source(&self) -> Result<String, BrowserError> {
        let value = self.command(reqwest::Method::GET, "/source", None).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BrowserError::Command {
                command: "source".to_string(),
                message: "page source was not a string".to_string(),
            })
    }

    pub async fn body_text(&self) -> Result<String, BrowserError> {
        self.execute("return document.body ? document.body.innerText : '';", vec![])
            .await
    }
}

/// Owning half of a WebDriver session.
#[derive(Debug)]
pub struct BrowserSession {
    handle: BrowserHandle,
    closed: bool,
}

impl BrowserSession {
    pub async fn start(config: &BrowserConfig, cancel: &CancellationToken) -> Result<Self, BrowserError> {
        let client = reqwest::Client::builder()
            .timeout(config.page_load_timeout + Duration::from_secs(15))
            .build()
            .map_err(|err| BrowserError::Transport(err.to_string()))?;
        let base = config.webdriver_url.trim_end_matches('/');

        let sent = tokio::select! {
            _ = cancel.cancelled() => return Err(BrowserError::Cancelled),
            sent = client.post(format!("{base}/session")).json(&config.capabilities()).send() => sent,
        };
        let resp = sent.map_err(|err| BrowserError::SessionNotCreated(err.to_string()))?;
        let status = resp.status();
        let payload: JsonValue = resp
            .json()
            .await
            .map_err(|err| BrowserError::SessionNotCreated(err.to_string()))?;
        let session_id = payload
            .pointer("/value/sessionId")
            .or_else(|| payload.get("sessionId"))
            .and_then(JsonValue::as_str)
            .filter(|_| status.is_success())
            .ok_or_else(|| BrowserError::SessionNotCreated(payload.to_string()))?;

        let session = Self {
            handle: BrowserHandle {
                client,
                session_url: format!("{base}/session/{session_id}"),
                cancel: cancel.clone(),
            },
            closed: false,
        };
        let page_load_ms = config.page_load_timeout.as_millis() as u64;
        session
            .handle
            .command(
                reqwest::Method::POST,
                "/timeouts",
                Some(json!({ "pageLoad": page_load_ms, "script": 30_000 })),
            )
            .await?;
        Ok(session)
    }

    pub fn handle(&self) -> BrowserHandle {
        self.handle.clone()
    }

    pub async fn close(mut self) -> Result<(), BrowserError> {
        self.closed = true;
        delete_session(&self.handle.client, &self.handle.session_url).await
    }
}

async fn delete_session(client: &reqwest::Client, session_url: &str) -> Result<(), BrowserError> {
    let resp = client
        .delete(session_url)
        .send()
        .await
        .map_err(|err| BrowserError::Transport(err.to_string()))?;
    if resp.status().is_success() {
        Ok(())
    } else {
        Err(BrowserError::Command {
            command: "DELETE session".to_string(),
            message: format!("status {}", resp.status()),
        })
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let client = self.handle.client.clone();
        let session_url = self.handle.session_url.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Err(err) = delete_session(&client, &session_url).await {
                    warn!(error = %err, "failed to release dropped browser session");
                }
            });
        }
    }
}

/// Runs `f` against a fresh session and releases the session on every exit.
pub async fn with_browser<T, E, F, Fut>(config: &BrowserConfig, cancel: &CancellationToken, f: F) -> Result<T, E>
where
    F: FnOnce(BrowserHandle) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<BrowserError>,
{
    let session = BrowserSession::start(config, cancel).await?;
    let outcome = f(session.handle()).await;
    if let Err(err) = session.close().await {
        warn!(error = %err, "failed to close browser session");
    }
    outcome
}
