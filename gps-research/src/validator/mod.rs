//! Source validation.
//!
//! Every cited URL is fetched through up to three tiers before it is allowed
//! to stay in a record:
//!
//! 1. **HTTP**: a plain GET. A 200 whose body is not a soft 404 or login
//!    wall is accepted; any other status, or a transport error, falls
//!    through to the next tier.
//! 2. **curl**: `curl -L -k -s` with the status appended as a trailer. A 403
//!    or a Cloudflare interstitial escalates to the browser; other 4xx/5xx,
//!    empty bodies, soft 404s, login walls and generic "access denied" pages
//!    are rejected.
//! 3. **browser**: a headless render once the network is idle, rejected on a
//!    soft 404 or a challenge page that never resolved.
//!
//! When nothing survives, a per-entity override page may be checked and
//! injected. Nested `source_url` fields that point at a dropped URL are
//! rewritten afterwards.

mod fetch;
mod overrides;
mod patterns;

pub use fetch::{
    parse_status_trailer, BrowserFetcher, CurlFetcher, FetchError, FetchedPage, HttpFetcher,
    PageFetcher,
};
pub use overrides::FallbackOverrides;
pub use patterns::{
    find_login_wall, find_soft_404, is_access_denied, is_cloudflare_challenge,
    LOGIN_WALL_MARKERS, SOFT_404_MARKERS,
};

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use gps_common::config::ValidatorConfig;

use crate::record::{ResearchRecord, Source, NO_VALID_SOURCE};

/// Appended to a nested section's notes when its citation was replaced.
pub const FALLBACK_WARNING: &str = "[WARNING: Original source was inaccessible, using fallback.]";

/// Why a URL was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    InvalidUrl,
    Soft404(&'static str),
    LoginWall(&'static str),
    AccessDenied,
    HttpStatus(u16),
    EmptyBody,
    Unreachable(String),
    BrowserUnavailable,
    BrowserFailed(String),
    ChallengeUnresolved,
}

impl RejectReason {
    /// Stable label used when tallying rejections.
    pub fn kind(&self) -> &'static str {
        match self {
            RejectReason::InvalidUrl => "invalid_url",
            RejectReason::Soft404(_) => "soft_404",
            RejectReason::LoginWall(_) => "login_wall",
            RejectReason::AccessDenied => "access_denied",
            RejectReason::HttpStatus(_) => "http_status",
            RejectReason::EmptyBody => "empty_body",
            RejectReason::Unreachable(_) => "unreachable",
            RejectReason::BrowserUnavailable => "browser_unavailable",
            RejectReason::BrowserFailed(_) => "browser_failed",
            RejectReason::ChallengeUnresolved => "challenge_unresolved",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::InvalidUrl => write!(f, "invalid URL"),
            RejectReason::Soft404(marker) => write!(f, "soft 404 ({marker})"),
            RejectReason::LoginWall(marker) => write!(f, "login wall ({marker})"),
            RejectReason::AccessDenied => write!(f, "access denied"),
            RejectReason::HttpStatus(status) => write!(f, "HTTP {status}"),
            RejectReason::EmptyBody => write!(f, "empty body"),
            RejectReason::Unreachable(e) => write!(f, "unreachable: {e}"),
            RejectReason::BrowserUnavailable => write!(f, "browser tier disabled"),
            RejectReason::BrowserFailed(e) => write!(f, "browser failed: {e}"),
            RejectReason::ChallengeUnresolved => write!(f, "challenge page never resolved"),
        }
    }
}

/// Outcome of checking one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Accepted by the named tier
    Accepted(&'static str),
    Rejected(RejectReason),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted(_))
    }
}

/// Rejection counts by reason kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RejectionTally {
    counts: BTreeMap<&'static str, usize>,
}

impl RejectionTally {
    pub fn record(&mut self, reason: &RejectReason) {
        *self.counts.entry(reason.kind()).or_default() += 1;
    }

    pub fn get(&self, kind: &str) -> usize {
        self.counts.get(kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

impl fmt::Display for RejectionTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.counts.iter().map(|(k, v)| format!("{k}={v}")).collect();
        f.write_str(&parts.join(", "))
    }
}

/// Result of filtering a source list.
#[derive(Debug, Clone, Default)]
pub struct FilterOutcome {
    pub valid: Vec<Source>,
    pub tally: RejectionTally,
    pub used_override: bool,
}

/// Tiered URL checker plus the per-entity override table.
pub struct SourceValidator {
    http: Arc<dyn PageFetcher>,
    cli: Arc<dyn PageFetcher>,
    browser: Option<Arc<dyn PageFetcher>>,
    override_check: Arc<dyn PageFetcher>,
    overrides: FallbackOverrides,
}

impl SourceValidator {
    pub fn new(
        http: Arc<dyn PageFetcher>,
        cli: Arc<dyn PageFetcher>,
        browser: Option<Arc<dyn PageFetcher>>,
        override_check: Arc<dyn PageFetcher>,
        overrides: FallbackOverrides,
    ) -> Self {
        Self {
            http,
            cli,
            browser,
            override_check,
            overrides,
        }
    }

    /// Real fetchers configured from `config`.
    pub fn from_config(config: &ValidatorConfig) -> gps_common::Result<Self> {
        let ua = config.user_agent.as_str();
        let browser: Option<Arc<dyn PageFetcher>> = if config.browser_enabled {
            Some(Arc::new(BrowserFetcher::new(
                ua,
                Duration::from_secs(config.browser_timeout_secs),
            )))
        } else {
            None
        };
        Ok(Self::new(
            Arc::new(HttpFetcher::new(
                ua,
                Duration::from_secs(config.http_timeout_secs),
            )),
            Arc::new(CurlFetcher::new(
                &config.curl_path,
                ua,
                Duration::from_secs(config.cli_timeout_secs),
            )),
            browser,
            Arc::new(CurlFetcher::new(
                &config.curl_path,
                ua,
                Duration::from_secs(config.override_timeout_secs),
            )),
            FallbackOverrides::load(config.overrides_file.as_deref())?,
        ))
    }

    pub fn overrides(&self) -> &FallbackOverrides {
        &self.overrides
    }

    /// Run the tier algorithm for one URL.
    pub async fn check_url(&self, url: &str, entity: &str) -> Verdict {
        match url::Url::parse(url.trim()) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            _ => return Verdict::Rejected(RejectReason::InvalidUrl),
        }
        let url = url.trim();

        match self.http.fetch(url).await {
            Ok(page) => {
                if let Some(marker) = find_soft_404(&page.body) {
                    return Verdict::Rejected(RejectReason::Soft404(marker));
                }
                if let Some(marker) = find_login_wall(&page.body) {
                    return Verdict::Rejected(RejectReason::LoginWall(marker));
                }
                if page.status == Some(200) {
                    return Verdict::Accepted(self.http.tier());
                }
                tracing::debug!(url, status = ?page.status, "HTTP tier inconclusive, trying curl");
            }
            Err(e) => {
                tracing::debug!(url, error = %e, "HTTP tier failed, trying curl");
            }
        }

        let page = match self.cli.fetch(url).await {
            Ok(page) => page,
            Err(e) => return Verdict::Rejected(RejectReason::Unreachable(e.to_string())),
        };

        match page.status {
            Some(403) => return self.check_with_browser(url).await,
            Some(status) if status >= 400 => {
                return Verdict::Rejected(RejectReason::HttpStatus(status))
            }
            _ => {}
        }
        if page.body.trim().is_empty() {
            return Verdict::Rejected(RejectReason::EmptyBody);
        }
        if let Some(marker) = find_soft_404(&page.body) {
            return Verdict::Rejected(RejectReason::Soft404(marker));
        }
        if let Some(marker) = find_login_wall(&page.body) {
            return Verdict::Rejected(RejectReason::LoginWall(marker));
        }

        let lowered = page.body.to_lowercase();
        if is_cloudflare_challenge(&lowered) {
            return self.check_with_browser(url).await;
        }
        if is_access_denied(&lowered, entity) {
            return Verdict::Rejected(RejectReason::AccessDenied);
        }
        Verdict::Accepted(self.cli.tier())
    }

    async fn check_with_browser(&self, url: &str) -> Verdict {
        let Some(browser) = &self.browser else {
            return Verdict::Rejected(RejectReason::BrowserUnavailable);
        };
        match browser.fetch(url).await {
            Ok(page) if page.body.trim().is_empty() => Verdict::Rejected(RejectReason::EmptyBody),
            Ok(page) => {
                if let Some(marker) = find_soft_404(&page.body) {
                    return Verdict::Rejected(RejectReason::Soft404(marker));
                }
                if is_cloudflare_challenge(&page.body.to_lowercase()) {
                    return Verdict::Rejected(RejectReason::ChallengeUnresolved);
                }
                Verdict::Accepted(browser.tier())
            }
            Err(e) => Verdict::Rejected(RejectReason::BrowserFailed(e.to_string())),
        }
    }

    /// Keep the sources that pass, falling back to the entity's override page.
    pub async fn filter_sources(&self, entity: &str, sources: &[Source]) -> FilterOutcome {
        let mut outcome = FilterOutcome::default();

        for source in sources {
            match self.check_url(&source.url, entity).await {
                Verdict::Accepted(tier) => {
                    tracing::debug!(entity, url = %source.url, tier, "Source accepted");
                    outcome.valid.push(source.clone());
                }
                Verdict::Rejected(reason) => {
                    tracing::info!(entity, url = %source.url, reason = %reason, "Source rejected");
                    outcome.tally.record(&reason);
                }
            }
        }

        if outcome.valid.is_empty() {
            if let Some(url) = self.overrides.get(entity) {
                if self.check_override(url).await {
                    tracing::info!(entity, url, "Using fallback source");
                    outcome.valid.push(Source::new(
                        url,
                        "Fallback source (cited sources were inaccessible)",
                    ));
                    outcome.used_override = true;
                } else {
                    tracing::warn!(entity, url, "Fallback source failed its check");
                }
            }
        }

        outcome
    }

    async fn check_override(&self, url: &str) -> bool {
        match self.override_check.fetch(url).await {
            Ok(page) => !page.body.trim().is_empty() && find_soft_404(&page.body).is_none(),
            Err(e) => {
                tracing::debug!(url, error = %e, "Fallback check failed");
                false
            }
        }
    }

    /// Filter a record's sources in place and repair dangling nested citations.
    pub async fn apply(&self, record: &mut ResearchRecord) -> FilterOutcome {
        let entity = record.entity_name.clone();
        let outcome = self.filter_sources(&entity, &record.sources).await;
        record.sources = outcome.valid.clone();
        rewrite_nested_sources(record);

        if !outcome.tally.is_empty() {
            tracing::info!(
                entity = %entity,
                kept = outcome.valid.len(),
                rejected = outcome.tally.total(),
                reasons = %outcome.tally,
                "Sources filtered"
            );
        }
        outcome
    }
}

/// Point nested `source_url` fields at a surviving source, or mark them unsourced.
pub fn rewrite_nested_sources(record: &mut ResearchRecord) {
    let surviving: HashSet<&str> = record.sources.iter().map(|s| s.url.as_str()).collect();
    let replacement = record
        .sources
        .first()
        .map(|s| s.url.clone())
        .unwrap_or_else(|| NO_VALID_SOURCE.to_string());

    let sections = [
        (&mut record.students.source_url, &mut record.students.notes),
        (&mut record.gpus.source_url, &mut record.gpus.notes),
    ];
    for (source_url, notes) in sections {
        let current = source_url.trim();
        if current.is_empty() || surviving.contains(current) || current == replacement {
            continue;
        }
        *source_url = replacement.clone();
        if !notes.contains(FALLBACK_WARNING) {
            if notes.is_empty() {
                *notes = FALLBACK_WARNING.to_string();
            } else {
                notes.push(' ');
                notes.push_str(FALLBACK_WARNING);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Canned pages keyed by URL; unknown URLs fail as transport errors.
    #[derive(Default)]
    struct StubFetcher {
        tier: &'static str,
        pages: HashMap<String, FetchedPage>,
        calls: Mutex<Vec<String>>,
    }

    impl StubFetcher {
        fn new(tier: &'static str) -> Self {
            Self {
                tier,
                ..Default::default()
            }
        }

        fn page(mut self, url: &str, status: Option<u16>, body: &str) -> Self {
            self.pages.insert(url.into(), FetchedPage::new(status, body));
            self
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PageFetcher for StubFetcher {
        fn tier(&self) -> &'static str {
            self.tier
        }

        async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
            self.calls.lock().unwrap().push(url.to_string());
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::Transport("connection refused".into()))
        }
    }

    fn validator(
        http: StubFetcher,
        cli: StubFetcher,
        browser: Option<StubFetcher>,
    ) -> (SourceValidator, Arc<StubFetcher>) {
        let browser = browser.map(Arc::new);
        let browser_handle = browser.clone().unwrap_or_else(|| Arc::new(StubFetcher::new("browser")));
        let validator = SourceValidator::new(
            Arc::new(http),
            Arc::new(cli),
            browser.map(|b| b as Arc<dyn PageFetcher>),
            Arc::new(StubFetcher::new("curl")),
            FallbackOverrides::empty(),
        );
        (validator, browser_handle)
    }

    const URL: &str = "https://research.example.edu/hpc";

    #[test]
    fn test_from_config_loads_builtin_overrides() {
        let v = SourceValidator::from_config(&ValidatorConfig::default()).unwrap();
        assert_eq!(v.overrides().len(), 2);
        assert!(v.overrides().get("Stanford University").is_some());
    }

    #[tokio::test]
    async fn test_http_200_accepted() {
        let (v, _) = validator(
            StubFetcher::new("http").page(URL, Some(200), "<h1>HPC cluster</h1>"),
            StubFetcher::new("curl"),
            None,
        );
        assert_eq!(v.check_url(URL, "Example University").await, Verdict::Accepted("http"));
    }

    #[tokio::test]
    async fn test_soft_404_under_200_rejected() {
        let (v, _) = validator(
            StubFetcher::new("http").page(URL, Some(200), "<h1>Page Not Found</h1>"),
            StubFetcher::new("curl").page(URL, Some(200), "fine"),
            None,
        );
        assert_eq!(
            v.check_url(URL, "Example University").await,
            Verdict::Rejected(RejectReason::Soft404("page not found"))
        );
    }

    #[tokio::test]
    async fn test_non_200_falls_through_to_curl() {
        let (v, _) = validator(
            StubFetcher::new("http").page(URL, Some(406), "blocked"),
            StubFetcher::new("curl").page(URL, Some(200), "<h1>GPU cluster</h1>"),
            None,
        );
        assert_eq!(v.check_url(URL, "Example University").await, Verdict::Accepted("curl"));
    }

    #[tokio::test]
    async fn test_curl_error_statuses() {
        let (v, _) = validator(
            StubFetcher::new("http"),
            StubFetcher::new("curl").page(URL, Some(410), "gone"),
            None,
        );
        assert_eq!(
            v.check_url(URL, "Example University").await,
            Verdict::Rejected(RejectReason::HttpStatus(410))
        );

        let (v, _) = validator(
            StubFetcher::new("http"),
            StubFetcher::new("curl").page(URL, Some(200), "   "),
            None,
        );
        assert_eq!(
            v.check_url(URL, "Example University").await,
            Verdict::Rejected(RejectReason::EmptyBody)
        );
    }

    #[tokio::test]
    async fn test_403_escalates_to_browser() {
        let (v, browser) = validator(
            StubFetcher::new("http"),
            StubFetcher::new("curl").page(URL, Some(403), "Forbidden"),
            Some(StubFetcher::new("browser").page(URL, None, "<h1>Cluster specs</h1>")),
        );
        assert_eq!(v.check_url(URL, "Example University").await, Verdict::Accepted("browser"));
        assert_eq!(browser.calls(), 1);
    }

    #[tokio::test]
    async fn test_browser_still_on_challenge_rejected() {
        let challenge = "<title>Just a moment...</title> Enable JavaScript and cookies to continue";
        let (v, browser) = validator(
            StubFetcher::new("http"),
            StubFetcher::new("curl").page(URL, Some(200), challenge),
            Some(StubFetcher::new("browser").page(URL, None, challenge)),
        );
        assert_eq!(
            v.check_url(URL, "Example University").await,
            Verdict::Rejected(RejectReason::ChallengeUnresolved)
        );
        assert_eq!(browser.calls(), 1);
    }

    #[tokio::test]
    async fn test_cloudflare_without_browser_rejected() {
        let (v, _) = validator(
            StubFetcher::new("http"),
            StubFetcher::new("curl").page(
                URL,
                Some(200),
                "<title>Just a moment...</title> Enable JavaScript and cookies to continue",
            ),
            None,
        );
        assert_eq!(
            v.check_url(URL, "Example University").await,
            Verdict::Rejected(RejectReason::BrowserUnavailable)
        );
    }

    #[tokio::test]
    async fn test_access_denied_naming_entity_passes() {
        let body = "Access Denied - Example University web application firewall";
        let (v, _) = validator(
            StubFetcher::new("http"),
            StubFetcher::new("curl").page(URL, Some(200), body),
            None,
        );
        assert_eq!(v.check_url(URL, "Example University").await, Verdict::Accepted("curl"));
        assert_eq!(
            v.check_url(URL, "Other College").await,
            Verdict::Rejected(RejectReason::AccessDenied)
        );
    }

    #[tokio::test]
    async fn test_invalid_url_never_fetched() {
        let http = StubFetcher::new("http");
        let (v, _) = validator(http, StubFetcher::new("curl"), None);
        assert_eq!(
            v.check_url("not a url", "U").await,
            Verdict::Rejected(RejectReason::InvalidUrl)
        );
        assert_eq!(
            v.check_url("ftp://files.example.edu/x", "U").await,
            Verdict::Rejected(RejectReason::InvalidUrl)
        );
    }

    #[tokio::test]
    async fn test_override_used_when_everything_rejected() {
        let fallback = "https://fallback.example.edu/specs";
        let mut overrides = FallbackOverrides::empty();
        overrides.insert("Example University", fallback);
        let v = SourceValidator::new(
            Arc::new(StubFetcher::new("http")),
            Arc::new(StubFetcher::new("curl").page(URL, Some(404), "")),
            None,
            Arc::new(StubFetcher::new("curl").page(fallback, Some(200), "<h1>System specs</h1>")),
            overrides,
        );

        let outcome = v
            .filter_sources("Example University", &[Source::new(URL, "gpus")])
            .await;
        assert!(outcome.used_override);
        assert_eq!(outcome.valid.len(), 1);
        assert_eq!(outcome.valid[0].url, fallback);
        assert_eq!(outcome.tally.get("http_status"), 1);
    }

    fn record_with_nested(student_url: &str, gpu_url: &str) -> ResearchRecord {
        let mut record =
            ResearchRecord::empty("U", NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        record.students.source_url = student_url.into();
        record.students.notes = "from catalog".into();
        record.gpus.source_url = gpu_url.into();
        record
    }

    #[test]
    fn test_rewrite_points_at_first_survivor() {
        let mut record = record_with_nested("https://dead.edu", "https://ok.edu");
        record.sources = vec![Source::new("https://ok.edu", ""), Source::new("https://b.edu", "")];
        rewrite_nested_sources(&mut record);

        assert_eq!(record.students.source_url, "https://ok.edu");
        assert_eq!(
            record.students.notes,
            format!("from catalog {FALLBACK_WARNING}")
        );
        assert_eq!(record.gpus.source_url, "https://ok.edu");
        assert!(record.gpus.notes.is_empty());
    }

    #[test]
    fn test_rewrite_without_survivors_is_idempotent() {
        let mut record = record_with_nested("https://dead.edu", "");
        rewrite_nested_sources(&mut record);
        assert_eq!(record.students.source_url, NO_VALID_SOURCE);
        let notes = record.students.notes.clone();

        rewrite_nested_sources(&mut record);
        assert_eq!(record.students.notes, notes);
        assert!(record.gpus.source_url.is_empty());
    }
}
