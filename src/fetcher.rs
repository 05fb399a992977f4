//! HTTP fetching with a fixed identity and mandatory politeness delay.
//!
//! # Architecture
//!
//! - [`Fetch`]: core trait, `fetch(url) -> document | FetchError`
//! - [`HttpFetcher`]: reqwest-backed implementation with the bot user agent,
//!   accept headers and a hard timeout
//! - [`PoliteFetcher`]: decorator that sleeps after every successful fetch
//!
//! The delay lives in the fetcher rather than in the extractors, so every
//! extractor is rate-limited without knowing about it.

use crate::config::FetchSettings;
use crate::error::{FetchError, FetchErrorKind};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

const ACCEPT_DOCUMENTS: &str =
    "text/html,application/xhtml+xml,application/rss+xml,application/atom+xml,application/xml;q=0.9,*/*;q=0.8";

/// Trait for retrieving one remote document.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Fetch `url` and return its body as text.
    ///
    /// # Errors
    ///
    /// [`FetchError`] on network failure, timeout or a non-2xx status.
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Plain HTTP GET with the scraper's identification headers.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build a client carrying the configured user agent, accept headers and timeout.
    pub fn new(settings: &FetchSettings) -> Result<Self, FetchError> {
        let client_err = |msg: String| FetchError::new("", FetchErrorKind::Client(msg));

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&settings.user_agent).map_err(|e| client_err(e.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_DOCUMENTS));
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&settings.accept_language)
                .map_err(|e| client_err(e.to_string()))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout())
            .gzip(true)
            .build()
            .map_err(|e| client_err(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    #[instrument(level = "debug", skip(self))]
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let t0 = Instant::now();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            warn!(%url, status = status.as_u16(), "Non-success response");
            return Err(FetchError::new(url, FetchErrorKind::Status(status.as_u16())));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;
        debug!(
            %url,
            bytes = body.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Fetched document"
        );
        Ok(body)
    }
}

/// Wrapper that imposes a fixed sleep after every successful fetch of the inner [`Fetch`].
///
/// Failed fetches return immediately; the caller decides whether they end the source.
pub struct PoliteFetcher<T> {
    inner: T,
    delay: Duration,
}

impl<T> PoliteFetcher<T>
where
    T: Fetch,
{
    pub fn new(inner: T, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

impl<T> fmt::Debug for PoliteFetcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoliteFetcher")
            .field("delay", &self.delay)
            .finish()
    }
}

#[async_trait]
impl<T> Fetch for PoliteFetcher<T>
where
    T: Fetch,
{
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let body = self.inner.fetch(url).await?;
        if !self.delay.is_zero() {
            debug!(%url, delay_ms = self.delay.as_millis() as u64, "Politeness delay");
            sleep(self.delay).await;
        }
        Ok(body)
    }
}

/// The fetcher used in production: HTTP with the politeness delay from `settings`.
pub fn polite_http_fetcher(settings: &FetchSettings) -> Result<PoliteFetcher<HttpFetcher>, FetchError> {
    Ok(PoliteFetcher::new(HttpFetcher::new(settings)?, settings.delay()))
}
