//! Scraper contexts
//!
//! A [`ScraperFactory`] hands out one isolated [`Scraper`] per job. The
//! shipped implementation drives pages over HTTP: each context owns its own
//! client (cookie jar, user agent, timeout) while every context shares one
//! rate limiter.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE},
    Client,
};

use crate::models::PunchupRecord;
use crate::utils::is_http_url;

use super::error::{CollectionError, CollectionResult};
use super::options::BrowserContextOptions;
use super::page::parse_performer_page;

type SharedRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// One isolated scraping context
#[async_trait]
pub trait Scraper: Send + Sync {
    /// Collect every performer record found at `url`
    async fn collect(&self, url: &str) -> CollectionResult<Vec<PunchupRecord>>;

    /// Release the context; collecting afterwards fails
    async fn close(&self) -> CollectionResult<()>;
}

/// Creates scraper contexts
#[async_trait]
pub trait ScraperFactory: Send + Sync {
    async fn create_scraper(
        &self,
        options: &BrowserContextOptions,
    ) -> CollectionResult<Box<dyn Scraper>>;
}

// ============================================================================
// HTTP implementation
// ============================================================================

/// Factory for [`HttpScraper`] contexts
pub struct HttpScraperFactory {
    rate_limiter: SharedRateLimiter,
}

impl HttpScraperFactory {
    pub fn new(requests_per_second: u32) -> Self {
        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_second(rate))),
        }
    }
}

#[async_trait]
impl ScraperFactory for HttpScraperFactory {
    async fn create_scraper(
        &self,
        options: &BrowserContextOptions,
    ) -> CollectionResult<Box<dyn Scraper>> {
        let scraper = HttpScraper::new(options, Arc::clone(&self.rate_limiter))?;
        Ok(Box::new(scraper))
    }
}

/// Scraper context over a dedicated HTTP client
pub struct HttpScraper {
    client: Client,
    rate_limiter: SharedRateLimiter,
    closed: AtomicBool,
}

impl HttpScraper {
    fn new(options: &BrowserContextOptions, rate_limiter: SharedRateLimiter) -> CollectionResult<Self> {
        let client = Client::builder()
            .timeout(options.navigation_timeout)
            .user_agent(options.user_agent.clone())
            .default_headers(Self::build_headers(options))
            .cookie_store(true)
            .gzip(true)
            .build()
            .map_err(|e| CollectionError::ContextCreation(e.to_string()))?;

        Ok(Self {
            client,
            rate_limiter,
            closed: AtomicBool::new(false),
        })
    }

    fn build_headers(options: &BrowserContextOptions) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        // Viewport hint for servers that vary markup by client width
        if let Ok(width) = HeaderValue::from_str(&options.viewport_width.to_string()) {
            headers.insert("Viewport-Width", width);
        }
        headers
    }

    async fn fetch(&self, url: &str) -> CollectionResult<String> {
        self.rate_limiter.until_ready().await;

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                CollectionError::Timeout { url: url.to_string() }
            } else {
                CollectionError::navigation(url, e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollectionError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| {
            if e.is_timeout() {
                CollectionError::Timeout { url: url.to_string() }
            } else {
                CollectionError::Parse {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })
    }
}

#[async_trait]
impl Scraper for HttpScraper {
    async fn collect(&self, url: &str) -> CollectionResult<Vec<PunchupRecord>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CollectionError::ContextClosed);
        }
        if !is_http_url(url) {
            return Err(CollectionError::InvalidUrl(url.to_string()));
        }

        let html = self.fetch(url).await?;
        let records: Vec<PunchupRecord> = parse_performer_page(&html).into_iter().collect();

        tracing::debug!(url, records = records.len(), "Page collected");
        Ok(records)
    }

    async fn close(&self) -> CollectionResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
