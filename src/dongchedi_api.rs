// Client for the Dongchedi ranking endpoint: one page per request, retried
// with exponential backoff.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, REFERER};
use reqwest::Client;
use tokio::time::sleep;

use crate::error::{truncate_body, ErrorChain, FetchError};
use crate::models::{CategoryFilter, RankPage};
use crate::month::MonthToken;

pub const RANK_DATA_URL: &str = "https://www.dongchedi.com/motor/pc/car/rank_data";
pub const SALES_REFERER: &str = "https://www.dongchedi.com/sales/";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const APP_ID: &str = "1839";
const APP_NAME: &str = "auto_web_pc";
// Monthly sales ranking.
const RANK_DATA_TYPE: &str = "11";

/// Bounded exponential backoff: `max_attempts` tries in total, sleeping
/// `initial_delay * multiplier^n` (capped at `max_delay`) between them.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            initial_delay: Duration::from_secs(1),
            multiplier: 1.8,
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    fn next_delay(&self, current: Duration) -> Duration {
        current.mul_f64(self.multiplier).min(self.max_delay)
    }
}

/// Runs `op` until it succeeds or the policy's attempts are used up.
/// The error of the final attempt is returned untouched.
pub async fn with_backoff<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + 'static,
{
    let mut delay = policy.initial_delay.min(policy.max_delay);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= policy.max_attempts => {
                tracing::error!(attempt, error = %ErrorChain(&e), "Giving up after {} attempts", attempt);
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(attempt, delay_secs = delay.as_secs_f64(), error = %ErrorChain(&e), "Attempt failed. Retrying...");
                sleep(delay).await;
                delay = policy.next_delay(delay);
            }
        }
    }
}

/// Parameters of one page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageQuery {
    pub month: MonthToken,
    pub offset: u32,
    pub page_size: u32,
    pub category: Option<CategoryFilter>,
}

impl PageQuery {
    fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("aid", APP_ID.to_string()),
            ("app_name", APP_NAME.to_string()),
            ("rank_data_type", RANK_DATA_TYPE.to_string()),
            ("month", self.month.to_string()),
            ("count", self.page_size.to_string()),
            ("offset", self.offset.to_string()),
        ];
        if let Some(category) = self.category {
            params.push(("new_energy_type", category.query_value().to_string()));
        }
        params
    }
}

/// Anything that can serve ranking pages. The aggregator only talks to this.
#[async_trait]
pub trait RankingSource: Send + Sync {
    async fn fetch_page(&self, query: &PageQuery) -> Result<RankPage, FetchError>;
}

/// Builds the shared HTTP client used for every ranking request.
pub fn build_client(user_agent: &str, timeout: Duration) -> reqwest::Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(REFERER, HeaderValue::from_static(SALES_REFERER));
    Client::builder()
        .user_agent(user_agent)
        .default_headers(headers)
        .timeout(timeout)
        .build()
}

pub struct DongchediClient {
    http: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl DongchediClient {
    pub fn new(http: Client) -> Self {
        Self {
            http,
            base_url: RANK_DATA_URL.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[cfg(test)]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn fetch_once(&self, query: &PageQuery) -> Result<RankPage, FetchError> {
        let (month, offset) = (query.month, query.offset);
        let response = self
            .http
            .get(&self.base_url)
            .query(&query.params())
            .send()
            .await
            .map_err(|source| FetchError::Transport { month, offset, source })?;

        let status = response.status();
        tracing::debug!(%month, offset, status = %status, "Received response status");
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "[Failed to read response body]".to_string());
            return Err(FetchError::Status {
                month,
                offset,
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| FetchError::Transport { month, offset, source })?;
        RankPage::from_slice(&bytes).map_err(|source| {
            tracing::debug!(%month, offset, response_body = %String::from_utf8_lossy(&bytes), "JSON parse error details");
            FetchError::Decode { month, offset, source }
        })
    }
}

#[async_trait]
impl RankingSource for DongchediClient {
    async fn fetch_page(&self, query: &PageQuery) -> Result<RankPage, FetchError> {
        with_backoff(&self.retry, move |attempt| {
            tracing::debug!(month = %query.month, offset = query.offset, attempt, "Fetch attempt {}/{}", attempt, self.retry.max_attempts);
            self.fetch_once(query)
        })
        .await
    }
}
