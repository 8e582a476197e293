use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{DashError, DashResult};
use crate::segment::fetcher::Transport;

#[derive(Default)]
struct Resources {
    bodies: HashMap<String, Bytes>,
    failures: HashMap<String, DashError>,
    requests: HashMap<String, usize>,
}

/// [`Transport`] serving preloaded bodies, for tests and offline playback.
/// Unknown URLs answer like an HTTP 404.
#[derive(Default)]
pub struct MemoryTransport {
    resources: Mutex<Resources>,
    latency: Option<Duration>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch sleeps this long before answering.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Default::default()
        }
    }

    fn lock(&self) -> MutexGuard<'_, Resources> {
        self.resources.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert(&self, url: impl Into<String>, body: impl Into<Bytes>) {
        self.lock().bodies.insert(url.into(), body.into());
    }

    /// Makes `url` fail with `error` instead of answering.
    pub fn fail(&self, url: impl Into<String>, error: DashError) {
        self.lock().failures.insert(url.into(), error);
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.lock().requests.get(url).copied().unwrap_or(0)
    }

    pub fn total_requests(&self) -> usize {
        self.lock().requests.values().sum()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn fetch(&self, url: &str) -> DashResult<Bytes> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut resources = self.lock();
        *resources.requests.entry(url.to_string()).or_default() += 1;
        if let Some(error) = resources.failures.get(url) {
            return Err(error.clone());
        }
        resources
            .bodies
            .get(url)
            .cloned()
            .ok_or_else(|| DashError::bad_status(url, 404))
    }
}
