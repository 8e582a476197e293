use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::{DashError, DashResult};
use crate::mpd::{parse_mpd, Manifest};

/// Smallest download time used for a throughput sample, avoids dividing by zero
/// for in-memory or cached responses.
const MIN_SAMPLE_SECS: f64 = 1e-6;

pub struct BandwidthEstimator {
    ewma: f64,
    initialized: bool,
    alpha: f64,
}

impl Default for BandwidthEstimator {
    fn default() -> Self {
        Self::new(0.25)
    }
}

impl BandwidthEstimator {
    pub fn new(alpha: f64) -> Self {
        Self { ewma: 0.0, initialized: false, alpha }
    }

    /**
     * Records the number of bytes downloaded and the time taken in seconds.
     */
    pub fn record(&mut self, bytes: usize, duration_s: f64) {
        let sample = (bytes as f64 * 8.0) / duration_s.max(MIN_SAMPLE_SECS);
        self.ewma = if self.initialized {
            self.alpha * sample + (1.0 - self.alpha) * self.ewma
        } else {
            self.initialized = true;
            sample
        };
    }

    /**
     * Returns the estimated bandwidth in bits per second.
     * If no samples are recorded, returns 50 Mbps.
     */
    pub fn estimate(&self) -> f64 {
        if self.initialized { self.ewma } else { 50_000_000.0 }
    }

    pub fn has_samples(&self) -> bool {
        self.initialized
    }
}

/// Something that turns a segment URL into its bytes.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, url: &str) -> DashResult<Bytes>;
}

/// [`Transport`] over HTTP(S).
#[derive(Clone, Default)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &str) -> DashResult<Bytes> {
        let response = self.client.get(url).send().await.map_err(|e| {
            warn!("Fetch of {} failed: {}", url, e);
            DashError::BadRequest(format!("{url}: {e}"))
        })?;
        let status = response.status();
        if !status.is_success() {
            debug!("Received {} from {}", status, url);
            return Err(DashError::bad_status(url, status.as_u16()));
        }
        response
            .bytes()
            .await
            .map_err(|e| DashError::BadResponse(format!("{url}: {e}")))
    }
}

/// Downloads a segment and returns (bytes, download_duration in seconds).
pub async fn fetch_segment(transport: &dyn Transport, url: &str) -> DashResult<(Bytes, f64)> {
    let start = Instant::now();
    let bytes = transport.fetch(url).await?;
    Ok((bytes, start.elapsed().as_secs_f64()))
}

/// Resolves a manifest-relative path by replacing the last path segment of
/// the manifest URL. Absolute URLs are returned untouched.
pub fn resolve_segment_url(manifest_url: &str, path: &str) -> String {
    if path.contains("://") {
        return path.to_string();
    }
    match manifest_url.rsplit_once('/') {
        Some((base, _)) => format!("{base}/{path}"),
        None => path.to_string(),
    }
}

pub async fn fetch_manifest(transport: &dyn Transport, manifest_url: &str) -> DashResult<Manifest> {
    let body = transport.fetch(manifest_url).await?;
    let text = std::str::from_utf8(&body)
        .map_err(|e| DashError::BadResponse(format!("{manifest_url}: manifest is not UTF-8: {e}")))?;
    parse_mpd(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_seeds_the_estimate() {
        let mut estimator = BandwidthEstimator::new(0.5);
        assert!(!estimator.has_samples());
        assert_eq!(estimator.estimate(), 50_000_000.0);

        estimator.record(1_000, 1.0);
        assert_eq!(estimator.estimate(), 8_000.0);
        estimator.record(2_000, 1.0);
        assert_eq!(estimator.estimate(), 12_000.0);
    }

    #[test]
    fn zero_duration_sample_stays_finite() {
        let mut estimator = BandwidthEstimator::default();
        estimator.record(10, 0.0);
        assert!(estimator.estimate().is_finite());
    }

    #[test]
    fn segment_urls_resolve_against_the_manifest() {
        assert_eq!(
            resolve_segment_url("http://host/video/stream.mpd", "tile1_rep0_3.m4s"),
            "http://host/video/tile1_rep0_3.m4s"
        );
        assert_eq!(
            resolve_segment_url("http://host/stream.mpd", "https://cdn/x.m4s"),
            "https://cdn/x.m4s"
        );
        assert_eq!(resolve_segment_url("stream.mpd", "init.mp4"), "init.mp4");
    }
}
