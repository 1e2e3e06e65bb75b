//! Page fetchers for the three validation tiers.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::{
    EventLifecycleEvent, SetLifecycleEventsEnabledParams,
};
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

const STATUS_TRAILER: &str = "__HTTP_STATUS__";

/// CDP lifecycle event fired once the page has had no network activity for 500 ms.
const NETWORK_IDLE: &str = "networkIdle";

/// Result of a single fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    /// Final HTTP status, when the tier reports one
    pub status: Option<u16>,
    pub body: String,
}

impl FetchedPage {
    pub fn new(status: Option<u16>, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("fetch process failed: {0}")]
    Process(String),

    #[error("browser failed: {0}")]
    Browser(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// One way of retrieving a page body.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    fn tier(&self) -> &'static str;

    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError>;
}

// ============================================================================
// HTTP tier
// ============================================================================

/// Plain HTTP GET with a browser-like user agent, following redirects.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(ua) = HeaderValue::from_str(user_agent) {
            headers.insert(USER_AGENT, ua);
        }
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { client }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    fn tier(&self) -> &'static str {
        "http"
    }

    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(FetchedPage::new(Some(status), body))
    }
}

// ============================================================================
// Command-line tier
// ============================================================================

/// `curl -L -k -s` with the final status appended as a trailer.
pub struct CurlFetcher {
    program: String,
    user_agent: String,
    max_time: Duration,
}

impl CurlFetcher {
    pub fn new(program: impl Into<String>, user_agent: impl Into<String>, max_time: Duration) -> Self {
        Self {
            program: program.into(),
            user_agent: user_agent.into(),
            max_time,
        }
    }

    fn args<'a>(&'a self, url: &'a str, max_time: &'a str) -> [&'a str; 10] {
        [
            "-L",
            "-k",
            "-s",
            "-A",
            &self.user_agent,
            "--max-time",
            max_time,
            "-w",
            "\n__HTTP_STATUS__%{http_code}__",
            url,
        ]
    }
}

/// Split curl output into body and status. A `000` status means no response.
pub fn parse_status_trailer(output: &str) -> FetchedPage {
    match output.rsplit_once(STATUS_TRAILER) {
        Some((body, trailer)) => {
            let code = trailer.trim().trim_matches('_').trim();
            let status = code.parse::<u16>().ok().filter(|c| *c != 0);
            let body = body.strip_suffix('\n').unwrap_or(body);
            FetchedPage::new(status, body)
        }
        None => FetchedPage::new(None, output),
    }
}

#[async_trait]
impl PageFetcher for CurlFetcher {
    fn tier(&self) -> &'static str {
        "curl"
    }

    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let max_time = self.max_time.as_secs().max(1).to_string();
        let mut command = Command::new(&self.program);
        command
            .args(self.args(url, &max_time))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let grace = self.max_time + Duration::from_secs(5);
        let output = tokio::time::timeout(grace, command.output())
            .await
            .map_err(|_| FetchError::Timeout(grace))?
            .map_err(|e| FetchError::Process(format!("{}: {e}", self.program)))?;

        if !output.status.success() {
            return Err(FetchError::Process(format!(
                "exit code {}",
                output.status.code().unwrap_or(-1)
            )));
        }

        Ok(parse_status_trailer(&String::from_utf8_lossy(&output.stdout)))
    }
}

// ============================================================================
// Headless browser tier
// ============================================================================

/// Headless Chromium render, for pages gated behind JavaScript challenges.
pub struct BrowserFetcher {
    user_agent: String,
    timeout: Duration,
}

impl BrowserFetcher {
    pub fn new(user_agent: impl Into<String>, timeout: Duration) -> Self {
        Self {
            user_agent: user_agent.into(),
            timeout,
        }
    }

    async fn render(&self, url: &str) -> Result<String, FetchError> {
        let config = BrowserConfig::builder()
            .arg(format!("--user-agent={}", self.user_agent))
            .build()
            .map_err(FetchError::Browser)?;

        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| FetchError::Browser(format!("launch: {e}")))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let settle = self.timeout / 2;
        let content = async {
            let page = browser.new_page("about:blank").await?;
            page.execute(SetLifecycleEventsEnabledParams::new(true)).await?;
            let mut lifecycle = page.event_listener::<EventLifecycleEvent>().await?;
            page.goto(url).await?;

            let idle = tokio::time::timeout(settle, async {
                while let Some(event) = lifecycle.next().await {
                    if event.name == NETWORK_IDLE {
                        return true;
                    }
                }
                false
            })
            .await
            .unwrap_or(false);
            if !idle {
                tracing::debug!(url, "Page did not reach network idle, reading content anyway");
            }
            page.content().await
        }
        .await
        .map_err(|e| FetchError::Browser(e.to_string()));

        if let Err(e) = browser.close().await {
            tracing::debug!(error = %e, "Browser close failed");
        }
        let _ = browser.wait().await;
        handler_task.abort();

        content
    }
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    fn tier(&self) -> &'static str {
        "browser"
    }

    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let body = tokio::time::timeout(self.timeout, self.render(url))
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))??;
        Ok(FetchedPage::new(None, body))
    }
}
