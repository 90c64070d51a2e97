//! HTTP region fetching with bounded retry and exponential backoff.
//!
//! The coordinator talks to the service through the [`RegionFetch`] trait so
//! tests can substitute a mock transport. [`HttpFetcher`] is the production
//! implementation: one GET per region carrying the bounding box and the
//! optional `since` cursor, a per-attempt timeout, and retries for transient
//! failures only.

use async_trait::async_trait;
use bytes::Bytes;
use geosync_types::{EngineConfig, FetchError, Region, SyncCursor};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// Undecoded response body for one region fetch.
#[derive(Debug, Clone)]
pub struct RawBatch {
    pub body: Bytes,
}

/// Transport capability consumed by the coordinator.
///
/// Implementations must be cheap to call concurrently; the coordinator
/// issues at most one fetch per region at a time but fetches for different
/// regions overlap. Every attempt sits behind await points, so aborting the
/// owning task cancels the in-flight attempt cleanly.
#[async_trait]
pub trait RegionFetch: Send + Sync {
    async fn fetch(
        &self,
        region: &Region,
        since: Option<&SyncCursor>,
    ) -> Result<RawBatch, FetchError>;
}

/// reqwest-backed fetcher with retry/backoff.
pub struct HttpFetcher {
    client: Client,
    endpoint: String,
    timeout: Duration,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_cap: Duration,
}

impl HttpFetcher {
    pub fn new(config: &EngineConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.fetch_timeout())
            .build()
            .map_err(|e| FetchError::Unreachable { message: e.to_string() })?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            timeout: config.fetch_timeout(),
            max_attempts: config.max_attempts.max(1),
            backoff_base: config.backoff_base(),
            backoff_cap: config.backoff_cap(),
        })
    }

    async fn attempt(
        &self,
        region: &Region,
        since: Option<&SyncCursor>,
    ) -> Result<RawBatch, FetchError> {
        let mut query: Vec<(&str, String)> = vec![
            ("minLat", region.min_lat.to_string()),
            ("minLon", region.min_lon.to_string()),
            ("maxLat", region.max_lat.to_string()),
            ("maxLon", region.max_lon.to_string()),
        ];
        if let Some(cursor) = since {
            query.push(("since", cursor.as_str().to_string()));
        }

        let response = self
            .client
            .get(&self.endpoint)
            .query(&query)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Server { status: status.as_u16() });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| classify_reqwest_error(&e, self.timeout))?;
        Ok(RawBatch { body })
    }

    /// Backoff delay for the given retry, exponential with ±20% jitter.
    fn backoff_delay(&self, retry: u32) -> Duration {
        let exp = self.backoff_base.as_millis().saturating_mul(1u128 << retry.min(16)) as f64;
        let capped = exp.min(self.backoff_cap.as_millis() as f64);
        let jitter = (rand::random::<f64>() - 0.5) * 2.0 * 0.2 * capped;
        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}

#[async_trait]
impl RegionFetch for HttpFetcher {
    async fn fetch(
        &self,
        region: &Region,
        since: Option<&SyncCursor>,
    ) -> Result<RawBatch, FetchError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            debug!(
                "Fetching region [{:.3},{:.3}]..[{:.3},{:.3}], attempt {}/{}",
                region.min_lat, region.min_lon, region.max_lat, region.max_lon,
                attempt, self.max_attempts
            );
            match self.attempt(region, since).await {
                Ok(batch) => return Ok(batch),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.backoff_delay(attempt - 1);
                    warn!("Transient fetch failure ({}), retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_transient() => {
                    return Err(FetchError::RetriesExhausted { attempts: attempt, last: Box::new(e) });
                }
                // 4xx-class: the service will keep rejecting this request.
                Err(e) => return Err(e),
            }
        }
    }
}

fn classify_reqwest_error(e: &reqwest::Error, timeout: Duration) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout { duration_secs: timeout.as_secs() }
    } else if let Some(status) = e.status() {
        FetchError::Server { status: status.as_u16() }
    } else {
        FetchError::Unreachable { message: e.to_string() }
    }
}
