//! Per-tile fetch pipeline: representation choice, the memoized
//! initialization segment and the numbered media segments.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::Bytes;
use circular_buffer::CircularBuffer;
use futures::future::{BoxFuture, FutureExt, Shared};
use shared_utils::{BackpressureQueue, TileCoordinate};
use tokio::runtime::Handle;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{DashError, DashResult};
use crate::mpd::Manifest;
use crate::segment::{fetch_segment, resolve_segment_url, BandwidthEstimator, Transport};
use crate::selector::Selector;

/// Number of past representation choices kept per tile.
pub const TRACE_CAPACITY: usize = 120;

/// Time a producer waits on a full queue before re-checking cancellation.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(80);

type SharedSegment = Shared<BoxFuture<'static, DashResult<Bytes>>>;

struct InitialSegment {
    representation_index: usize,
    fetch: SharedSegment,
}

/// Mutable state of one tile, owned by its worker.
pub struct TileRuntimeState {
    coordinate: TileCoordinate,
    tile_index: u32,
    /// Next media segment number, 1-based.
    segment_counter: u64,
    initial: Option<InitialSegment>,
    trace: Box<CircularBuffer<TRACE_CAPACITY, usize>>,
    estimator: Arc<Mutex<BandwidthEstimator>>,
}

impl TileRuntimeState {
    pub fn new(coordinate: TileCoordinate, tile_index: u32) -> Self {
        Self {
            coordinate,
            tile_index,
            segment_counter: 1,
            initial: None,
            trace: CircularBuffer::boxed(),
            estimator: Arc::new(Mutex::new(BandwidthEstimator::default())),
        }
    }

    pub fn coordinate(&self) -> TileCoordinate {
        self.coordinate
    }

    pub fn tile_index(&self) -> u32 {
        self.tile_index
    }

    pub fn segment_counter(&self) -> u64 {
        self.segment_counter
    }

    /// Most recent choices last.
    pub fn representation_trace(&self) -> Vec<usize> {
        self.trace.iter().copied().collect()
    }

    fn estimator(&self) -> MutexGuard<'_, BandwidthEstimator> {
        self.estimator.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Snapshot of a tile's progress.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileStats {
    pub tile_index: u32,
    /// Media segments requested so far.
    pub segments_requested: u64,
    pub last_representation: Option<usize>,
    pub bandwidth_estimate: f64,
}

/// The two fetches of one cycle, still in flight.
pub struct SegmentRequest {
    pub segment_number: u64,
    pub representation_index: usize,
    initial: SharedSegment,
    media: JoinHandle<DashResult<Bytes>>,
}

/// The fetched payloads of one cycle.
#[derive(Debug, Clone)]
pub struct SegmentBuffers {
    pub segment_number: u64,
    pub representation_index: usize,
    pub initial: Bytes,
    pub media: Bytes,
}

fn joined(error: JoinError) -> DashError {
    if error.is_cancelled() {
        DashError::Aborted
    } else {
        DashError::BadResponse(format!("fetch task failed: {error}"))
    }
}

impl SegmentRequest {
    /// Media is checked before the initialization segment so a finished
    /// stream reports end-of-stream even when the init fetch failed too.
    pub async fn resolve(self) -> DashResult<SegmentBuffers> {
        let media = self.media.await.map_err(joined)??;
        if media.is_empty() {
            return Err(DashError::BadResponse(format!(
                "segment {} is empty",
                self.segment_number
            )));
        }
        let initial = self.initial.await?;
        Ok(SegmentBuffers {
            segment_number: self.segment_number,
            representation_index: self.representation_index,
            initial,
            media,
        })
    }

    /// Blocks the calling (non-runtime) thread until both fetches finished or
    /// `cancel` fired, whichever comes first. On cancellation the fetches
    /// are left to finish on the runtime; only the wait is given up.
    pub fn wait(self, runtime: &Handle, cancel: &CancellationToken) -> DashResult<SegmentBuffers> {
        runtime.block_on(async {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(DashError::Aborted),
                buffers = self.resolve() => buffers,
            }
        })
    }
}

/// Issues the fetches of one tile.
pub struct TileStreamer {
    manifest: Arc<Manifest>,
    manifest_url: String,
    transport: Arc<dyn Transport>,
    selector: Arc<dyn Selector>,
    runtime: Handle,
    state: TileRuntimeState,
}

impl TileStreamer {
    pub fn new(
        manifest: Arc<Manifest>,
        manifest_url: &str,
        coordinate: TileCoordinate,
        transport: Arc<dyn Transport>,
        selector: Arc<dyn Selector>,
        runtime: Handle,
    ) -> Self {
        let tile_index = manifest.tile_index(coordinate.x, coordinate.y);
        Self {
            manifest,
            manifest_url: manifest_url.to_string(),
            transport,
            selector,
            runtime,
            state: TileRuntimeState::new(coordinate, tile_index),
        }
    }

    pub fn state(&self) -> &TileRuntimeState {
        &self.state
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub fn stats(&self) -> TileStats {
        TileStats {
            tile_index: self.state.tile_index,
            segments_requested: self.state.segment_counter - 1,
            last_representation: self.state.trace.back().copied(),
            bandwidth_estimate: self.state.estimator().estimate(),
        }
    }

    /// Starts the fetches of the next segment.
    pub fn request_segment(&mut self, cancel: &CancellationToken) -> DashResult<SegmentRequest> {
        if cancel.is_cancelled() {
            return Err(DashError::Aborted);
        }
        let TileCoordinate { x, y } = self.state.coordinate;
        let video_set = self.manifest.video_set(x, y);
        let count = video_set.representations.len();
        let representation_index = self.selector.select(x, y, count).min(count.saturating_sub(1));
        let representation = video_set.representation(representation_index);
        self.state.trace.push_back(representation_index);

        let memoized = self
            .state
            .initial
            .as_ref()
            .filter(|initial| initial.representation_index == representation_index)
            .map(|initial| initial.fetch.clone());
        let initial = match memoized {
            Some(fetch) => fetch,
            None => {
                let url = resolve_segment_url(&self.manifest_url, representation.initialization_path());
                debug!(tile = self.state.tile_index, representation_index, "Fetching initialization segment {}", url);
                let handle = self.spawn_fetch(url);
                let fetch = async move { handle.await.map_err(joined)? }.boxed().shared();
                self.state.initial = Some(InitialSegment {
                    representation_index,
                    fetch: fetch.clone(),
                });
                fetch
            }
        };

        let segment_number = self.state.segment_counter;
        let url = resolve_segment_url(&self.manifest_url, &representation.media_path(segment_number));
        trace!(tile = self.state.tile_index, segment_number, "Fetching media segment {}", url);
        let media = self.spawn_fetch(url);
        self.state.segment_counter += 1;

        Ok(SegmentRequest {
            segment_number,
            representation_index,
            initial,
            media,
        })
    }

    fn spawn_fetch(&self, url: String) -> JoinHandle<DashResult<Bytes>> {
        let transport = self.transport.clone();
        let estimator = self.state.estimator.clone();
        self.runtime.spawn(async move {
            let (bytes, duration_s) = fetch_segment(transport.as_ref(), &url).await?;
            estimator
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .record(bytes.len(), duration_s);
            Ok(bytes)
        })
    }
}

/// Writes `event`, retrying every `timeout` until it fits or `cancel` fires.
pub fn write_or_abort<T, const N: usize>(
    queue: &BackpressureQueue<T, N>,
    mut event: T,
    cancel: &CancellationToken,
    timeout: Duration,
) -> DashResult<()> {
    loop {
        match queue.try_write_until(event, Instant::now() + timeout) {
            Ok(()) => return Ok(()),
            Err(rejected) => {
                if cancel.is_cancelled() {
                    return Err(DashError::Aborted);
                }
                event = rejected;
            }
        }
    }
}
