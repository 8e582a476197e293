//! A streaming session: one worker thread per tile feeding a bounded queue,
//! torn down through a cancellation token and a rendezvous barrier.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use dash_player::mpd::{Dimension, GridSize, Manifest, VideoAdaptationSet};
use dash_player::segment::{fetch_manifest, HttpTransport, Transport};
use dash_player::tile::{write_or_abort, SegmentRequest, TileStats, TileStreamer};
use dash_player::{DashError, DashResult, Selector};
use shared_utils::{BackpressureQueue, Frame, GenerationBarrier, TileCoordinate, TileEvent};
use tokio::runtime::{Builder, Runtime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::SessionConfig;
use crate::metrics::SessionMetrics;
use crate::processing::{make_decoder, DecoderEngine, Mp4FragmentEngine};

/// Lifecycle of a session; states only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    Created = 0,
    Prefetching = 1,
    Streaming = 2,
    Draining = 3,
    Closed = 4,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Created,
            1 => SessionState::Prefetching,
            2 => SessionState::Streaming,
            3 => SessionState::Draining,
            _ => SessionState::Closed,
        }
    }
}

/// State shared between the session handle and its tile workers.
struct SessionShared {
    state: AtomicU8,
    cancel: CancellationToken,
    queues: Vec<BackpressureQueue<TileEvent>>,
    stats: Vec<Mutex<TileStats>>,
    metrics: SessionMetrics,
    /// Set once any tile stopped producing.
    terminated: AtomicBool,
    exited_workers: AtomicUsize,
}

impl SessionShared {
    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Moves any live state to `Draining` and cancels every worker.
    fn begin_draining(&self) {
        let mut current = self.state.load(Ordering::SeqCst);
        while current < SessionState::Draining as u8 {
            match self.state.compare_exchange(
                current,
                SessionState::Draining as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        self.cancel.cancel();
    }

    fn close(&self) {
        self.state.store(SessionState::Closed as u8, Ordering::SeqCst);
    }

    fn stats(&self, raster: usize) -> MutexGuard<'_, TileStats> {
        self.stats[raster].lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct Session {
    config: SessionConfig,
    manifest: Arc<Manifest>,
    transport: Arc<dyn Transport>,
    engine: Arc<dyn DecoderEngine>,
    selector: Arc<dyn Selector>,
    runtime: Option<Runtime>,
    shared: Arc<SessionShared>,
    barrier: Option<Arc<GenerationBarrier>>,
    workers: Vec<JoinHandle<()>>,
}

fn build_runtime(config: &SessionConfig) -> DashResult<Runtime> {
    Builder::new_multi_thread()
        .worker_threads(config.resolved_fetch_threads())
        .thread_name_fn(|| {
            static ATOMIC_FETCH_ID: AtomicUsize = AtomicUsize::new(0);
            let id = ATOMIC_FETCH_ID.fetch_add(1, Ordering::SeqCst);
            format!("DASH_R w-{}", id)
        })
        .enable_all()
        .build()
        .map_err(|e| DashError::BadRequest(format!("cannot start fetch runtime: {e}")))
}

impl Session {
    /// Fetches and parses the manifest at `config.manifest_url`.
    ///
    /// Blocks the calling thread, so it must not be called from inside an
    /// async context.
    #[instrument(skip_all, fields(url = %config.manifest_url))]
    pub fn create(config: SessionConfig, selector: impl Selector + 'static) -> DashResult<Self> {
        let runtime = build_runtime(&config)?;
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new());
        let manifest = runtime.block_on(fetch_manifest(transport.as_ref(), &config.manifest_url))?;
        info!(
            "Manifest '{}' loaded: {}x{} tiles",
            manifest.title, manifest.grid.cols, manifest.grid.rows
        );
        Ok(Self::assemble(
            config,
            manifest,
            transport,
            Arc::new(Mp4FragmentEngine),
            Arc::new(selector),
            runtime,
        ))
    }

    /// Like [`Session::create`] with an already parsed manifest and explicit
    /// collaborators.
    pub fn create_with(
        config: SessionConfig,
        manifest: Manifest,
        transport: Arc<dyn Transport>,
        engine: Arc<dyn DecoderEngine>,
        selector: Arc<dyn Selector>,
    ) -> DashResult<Self> {
        let runtime = build_runtime(&config)?;
        Ok(Self::assemble(config, manifest, transport, engine, selector, runtime))
    }

    fn assemble(
        config: SessionConfig,
        manifest: Manifest,
        transport: Arc<dyn Transport>,
        engine: Arc<dyn DecoderEngine>,
        selector: Arc<dyn Selector>,
        runtime: Runtime,
    ) -> Self {
        let tiles = manifest.tile_count();
        let shared = Arc::new(SessionShared {
            state: AtomicU8::new(SessionState::Created as u8),
            cancel: CancellationToken::new(),
            queues: (0..tiles).map(|_| BackpressureQueue::new()).collect(),
            stats: manifest
                .coordinates()
                .map(|c| {
                    Mutex::new(TileStats {
                        tile_index: manifest.tile_index(c.x, c.y),
                        ..Default::default()
                    })
                })
                .collect(),
            metrics: SessionMetrics::new(),
            terminated: AtomicBool::new(false),
            exited_workers: AtomicUsize::new(0),
        });
        Self {
            config,
            manifest: Arc::new(manifest),
            transport,
            engine,
            selector,
            runtime: Some(runtime),
            shared,
            barrier: None,
            workers: Vec::new(),
        }
    }

    /// Starts one worker thread per tile.
    #[instrument(skip_all)]
    pub fn prefetch(&mut self) -> DashResult<()> {
        match self.state() {
            SessionState::Created => {}
            SessionState::Prefetching | SessionState::Streaming => return Ok(()),
            SessionState::Draining | SessionState::Closed => return Err(DashError::SessionClosed),
        }
        let runtime = match &self.runtime {
            Some(runtime) => runtime.handle().clone(),
            None => return Err(DashError::SessionClosed),
        };
        if !self.shared.transition(SessionState::Created, SessionState::Prefetching) {
            return Err(DashError::SessionClosed);
        }

        let tiles = self.manifest.tile_count();
        let concurrency = self.config.resolved_decoder_concurrency(tiles);
        let barrier = {
            let shared = self.shared.clone();
            Arc::new(GenerationBarrier::with_completion(tiles + 1, move || {
                shared.close();
                info!("All tile workers stopped, session closed");
            }))
        };
        self.barrier = Some(barrier.clone());
        info!("Prefetching {} tiles, decoder concurrency {}", tiles, concurrency);

        let coordinates: Vec<TileCoordinate> = self.manifest.coordinates().collect();
        for (raster, coordinate) in coordinates.into_iter().enumerate() {
            let streamer = TileStreamer::new(
                self.manifest.clone(),
                &self.config.manifest_url,
                coordinate,
                self.transport.clone(),
                self.selector.clone(),
                runtime.clone(),
            );
            let worker = TileWorker {
                video_set: self.manifest.video_set(coordinate.x, coordinate.y).clone(),
                streamer,
                engine: self.engine.clone(),
                shared: self.shared.clone(),
                raster,
                concurrency,
                write_timeout: self.config.write_timeout(),
            };
            let exit = ExitGuard {
                barrier: barrier.clone(),
                shared: self.shared.clone(),
            };
            let spawned = std::thread::Builder::new()
                .name(format!("TILE w-{}", worker.streamer.state().tile_index()))
                .spawn(move || {
                    let _exit = exit;
                    worker.run();
                });
            match spawned {
                Ok(handle) => self.workers.push(handle),
                Err(e) => {
                    // The closure and its exit guard were dropped with the
                    // failed spawn, so this tile already left the barrier.
                    error!("Failed to spawn worker for tile {}: {}", coordinate, e);
                    self.shared.begin_draining();
                    for _ in raster + 1..tiles {
                        barrier.arrive_and_drop();
                    }
                    return Err(DashError::Aborted);
                }
            }
        }
        Ok(())
    }

    /// Cancels every worker and waits until all of them have stopped.
    /// Calling it again is a no-op.
    #[instrument(skip_all)]
    pub fn shutdown(&mut self) {
        if self.state() == SessionState::Closed {
            return;
        }
        info!("Shutting down session");
        self.shared.begin_draining();
        match self.barrier.take() {
            Some(barrier) => barrier.arrive_and_wait(),
            None => self.shared.close(),
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("A tile worker panicked");
            }
        }
        debug!("{} workers exited", self.shared.exited_workers.load(Ordering::SeqCst));
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// False once any tile stopped producing or the session is going down.
    pub fn available(&self) -> bool {
        !self.shared.terminated.load(Ordering::SeqCst)
            && self.state() < SessionState::Draining
    }

    fn raster_index(&self, x: u32, y: u32) -> usize {
        let grid = self.manifest.grid;
        assert!(x < grid.cols && y < grid.rows, "tile ({x}, {y}) outside grid {}x{}", grid.cols, grid.rows);
        TileCoordinate::new(x, y).raster_index(grid.cols)
    }

    /// Next queued event of the tile, `None` when nothing is buffered.
    pub fn poll_tile_event(&self, x: u32, y: u32) -> DashResult<Option<TileEvent>> {
        if self.state() == SessionState::Closed {
            return Err(DashError::SessionClosed);
        }
        let raster = self.raster_index(x, y);
        let event = self.shared.queues[raster].read_if_not_empty();
        match &event {
            Some(TileEvent::Frame(_)) => self.shared.metrics.frame_consumed(self.manifest.tile_index(x, y)),
            Some(terminal) => debug!("Tile ({}, {}) delivered {:?}", x, y, terminal),
            None => {}
        }
        Ok(event)
    }

    /// Next decoded frame of the tile. End-of-stream and error markers are
    /// consumed and reported as `None`; check [`Session::available`].
    pub fn poll_tile(&self, x: u32, y: u32) -> Option<Frame> {
        self.poll_tile_event(x, y).ok().flatten().and_then(TileEvent::into_frame)
    }

    pub fn grid_size(&self) -> GridSize {
        self.manifest.grid_size()
    }

    pub fn frame_size(&self) -> Dimension {
        self.manifest.frame_size()
    }

    pub fn tile_size(&self) -> Dimension {
        self.manifest.tile_size()
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn tile_stats(&self, x: u32, y: u32) -> TileStats {
        let raster = self.raster_index(x, y);
        self.shared.stats(raster).clone()
    }

    /// Frames currently buffered for the tile.
    pub fn buffered(&self, x: u32, y: u32) -> usize {
        self.shared.queues[self.raster_index(x, y)].len()
    }

    /// Workers that have finished since the session started.
    pub fn exited_workers(&self) -> usize {
        self.shared.exited_workers.load(Ordering::SeqCst)
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.shared.metrics
    }

    pub fn gather_metrics(&self) -> String {
        self.shared.metrics.gather()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("manifest_url", &self.config.manifest_url)
            .field("state", &self.state())
            .field("grid", &self.manifest.grid)
            .field("workers", &self.workers.len())
            .finish()
    }
}

/// Default configuration, create and prefetch in one go.
pub fn create_session(manifest_url: &str, selector: impl Selector + 'static) -> DashResult<Session> {
    let mut session = Session::create(SessionConfig::with_manifest_url(manifest_url), selector)?;
    session.prefetch()?;
    Ok(session)
}

/// Arrives at the session barrier when the worker ends, panics included.
struct ExitGuard {
    barrier: Arc<GenerationBarrier>,
    shared: Arc<SessionShared>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.shared.exited_workers.fetch_add(1, Ordering::SeqCst);
        self.barrier.arrive_and_drop();
    }
}

struct TileWorker {
    video_set: VideoAdaptationSet,
    streamer: TileStreamer,
    engine: Arc<dyn DecoderEngine>,
    shared: Arc<SessionShared>,
    raster: usize,
    concurrency: usize,
    write_timeout: Duration,
}

impl TileWorker {
    fn tile_index(&self) -> u32 {
        self.streamer.state().tile_index()
    }

    fn run(mut self) {
        let tile = self.tile_index();
        debug!("Tile {} worker started", tile);
        let outcome = self.stream();
        self.shared.terminated.store(true, Ordering::SeqCst);

        let sentinel = match outcome {
            Ok(()) | Err(DashError::Aborted) => {
                debug!("Tile {} aborted", tile);
                return;
            }
            Err(e) if e.is_end_of_stream() => {
                info!("Tile {} reached the end of its stream: {}", tile, e);
                TileEvent::EndOfStream
            }
            Err(e) if e.is_tile_local() => {
                warn!("Tile {} stopped: {}", tile, e);
                TileEvent::Error(e.kind())
            }
            Err(e) => {
                error!("Tile {} failed, stopping the session: {}", tile, e);
                let sentinel = TileEvent::Error(e.kind());
                self.write_sentinel(sentinel);
                self.shared.begin_draining();
                return;
            }
        };
        self.write_sentinel(sentinel);
    }

    /// Blocks until the queue has room for the end marker, giving up only
    /// once the session is cancelled.
    fn write_sentinel(&self, sentinel: TileEvent) {
        let queue = &self.shared.queues[self.raster];
        if write_or_abort(queue, sentinel, &self.shared.cancel, self.write_timeout).is_err() {
            debug!("Tile {} dropped its end marker on cancellation", self.tile_index());
        }
    }

    fn request(&mut self) -> DashResult<SegmentRequest> {
        let request = self.streamer.request_segment(&self.shared.cancel)?;
        self.shared
            .metrics
            .representation_selected(self.tile_index(), request.representation_index);
        *self.shared.stats(self.raster) = self.streamer.stats();
        Ok(request)
    }

    fn stream(&mut self) -> DashResult<()> {
        let cancel = self.shared.cancel.clone();
        let runtime = self.streamer.runtime().clone();
        let mut pending = self.request()?;
        loop {
            let buffers = pending.wait(&runtime, &cancel)?;
            // The next segment downloads while this one decodes.
            pending = self.request()?;

            let mut frames = make_decoder(self.engine.as_ref(), buffers.initial, buffers.media, self.concurrency)?;
            let mut frame_index = 0;
            while frames.has_more() {
                for mut frame in frames.consume_batch()? {
                    frame.segment_number = buffers.segment_number;
                    frame.representation_index = buffers.representation_index;
                    frame.frame_index = frame_index;
                    if frame.width == 0 && frame.height == 0 {
                        frame.width = self.video_set.width;
                        frame.height = self.video_set.height;
                    }
                    frame_index += 1;
                    write_or_abort(&self.shared.queues[self.raster], TileEvent::Frame(frame), &cancel, self.write_timeout)?;
                    self.shared.metrics.frame_produced(self.tile_index());
                    if self.shared.transition(SessionState::Prefetching, SessionState::Streaming) {
                        info!("First frame decoded, streaming");
                    }
                }
            }
            debug!(
                "Tile {} segment {} decoded into {} frames",
                self.tile_index(),
                buffers.segment_number,
                frame_index
            );
        }
    }
}
