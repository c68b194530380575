use bytes::Bytes;
use reqwest::{Client, StatusCode};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

/// Throughput the estimator reports before it has seen a sample.
const STARTUP_BPS: f64 = 3_000_000.0;

/// Exponentially-weighted moving average of observed download throughput.
pub struct ThroughputEstimator {
    ewma_bps: f64,
    primed: bool,
    alpha: f64,
}

impl ThroughputEstimator {
    /// `alpha` is the weight given to the newest sample.
    pub fn new(alpha: f64) -> Self {
        Self {
            ewma_bps: 0.0,
            primed: false,
            alpha,
        }
    }

    /// Record a download of `bytes` bytes that took `elapsed_s` seconds.
    pub fn record(&mut self, bytes: usize, elapsed_s: f64) {
        if elapsed_s <= 0.0 {
            return;
        }
        let sample = bytes as f64 * 8.0 / elapsed_s;
        self.ewma_bps = if self.primed {
            self.alpha * sample + (1.0 - self.alpha) * self.ewma_bps
        } else {
            self.primed = true;
            sample
        };
    }

    /// Estimated throughput in bits per second.
    pub fn estimate_bps(&self) -> f64 {
        if self.primed {
            self.ewma_bps
        } else {
            STARTUP_BPS
        }
    }
}

const FETCH_ATTEMPTS: usize = 3;
const BASE_DELAY_MS: u64 = 500;

/// Why a segment download gave up.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{url} does not exist (404)")]
    NotFound { url: String },
    #[error("giving up on {url} after {attempts} attempts: {detail}")]
    Exhausted {
        url: String,
        attempts: usize,
        detail: String,
    },
}

/// Download one segment, returning the payload and the wall time the transfer
/// took. Transient failures are retried with exponential backoff; a 404 is
/// returned immediately.
pub async fn fetch_segment(client: &Client, url: &str) -> Result<(Bytes, f64), FetchError> {
    let mut last_detail = String::new();
    for attempt in 0..FETCH_ATTEMPTS {
        if attempt > 0 {
            let delay = Duration::from_millis(BASE_DELAY_MS * 2u64.pow(attempt as u32 - 1));
            tokio::time::sleep(delay).await;
        }
        let start = Instant::now();
        match client.get(url).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    match response.bytes().await {
                        Ok(bytes) => return Ok((bytes, start.elapsed().as_secs_f64())),
                        Err(e) => last_detail = e.to_string(),
                    }
                } else if status == StatusCode::NOT_FOUND {
                    return Err(FetchError::NotFound {
                        url: url.to_string(),
                    });
                } else {
                    last_detail = format!("HTTP {status}");
                }
            }
            Err(e) => last_detail = e.to_string(),
        }
        warn!(
            "segment fetch attempt {} failed for {}: {}",
            attempt + 1,
            url,
            last_detail
        );
    }
    Err(FetchError::Exhausted {
        url: url.to_string(),
        attempts: FETCH_ATTEMPTS,
        detail: last_detail,
    })
}
