//! Representation selection, asked once per fetch cycle of every tile.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::trace;

use crate::mpd::GridSize;

/// Picks a representation index in `[0, count)` for the tile at `(x, y)`.
///
/// Implementations are shared by all tile workers and may be called
/// concurrently. `count` is never zero for a well-formed manifest; a zero
/// count yields index 0.
pub trait Selector: Send + Sync {
    fn select(&self, tile_x: u32, tile_y: u32, count: usize) -> usize;
}

impl<F> Selector for F
where
    F: Fn(u32, u32, usize) -> usize + Send + Sync,
{
    fn select(&self, tile_x: u32, tile_y: u32, count: usize) -> usize {
        self(tile_x, tile_y, count)
    }
}

fn clamp_index(index: usize, count: usize) -> usize {
    index.min(count.saturating_sub(1))
}

/// Always the same representation.
#[derive(Debug, Clone, Copy)]
pub struct ConstantSelector {
    index: usize,
}

impl ConstantSelector {
    pub fn new(index: usize) -> Self {
        Self { index }
    }

    pub fn lowest() -> Self {
        Self::new(0)
    }

    pub fn highest() -> Self {
        Self::new(usize::MAX)
    }
}

impl Selector for ConstantSelector {
    fn select(&self, _tile_x: u32, _tile_y: u32, count: usize) -> usize {
        clamp_index(self.index, count)
    }
}

/// Maps a per-tile likelihood `p` to `round(count * p)`, clamped to the
/// representation range.
pub struct PredictiveSelector<P> {
    predictor: P,
}

impl<P> PredictiveSelector<P>
where
    P: Fn(u32, u32) -> f64 + Send + Sync,
{
    pub fn new(predictor: P) -> Self {
        Self { predictor }
    }
}

impl<P> Selector for PredictiveSelector<P>
where
    P: Fn(u32, u32) -> f64 + Send + Sync,
{
    fn select(&self, tile_x: u32, tile_y: u32, count: usize) -> usize {
        let p = (self.predictor)(tile_x, tile_y);
        let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) };
        let index = clamp_index((count as f64 * p).round() as usize, count);
        trace!(tile_x, tile_y, p, index, "representation selected");
        index
    }
}

/// Likelihood that a tile is watched, from its wrapped distance to the
/// current field of view.
#[derive(Debug)]
pub struct ViewportPredictor {
    grid: GridSize,
    degrade_factor: f64,
    /// `x << 32 | y`
    field_of_view: AtomicU64,
}

impl ViewportPredictor {
    pub fn new(grid: GridSize, degrade_factor: f64) -> Self {
        Self {
            grid,
            degrade_factor,
            field_of_view: AtomicU64::new(0),
        }
    }

    /// Moves the field of view; picked up by the next fetch cycle of each tile.
    pub fn set_field_of_view(&self, x: u32, y: u32) {
        let x = x % self.grid.cols.max(1);
        let y = y % self.grid.rows.max(1);
        self.field_of_view.store(((x as u64) << 32) | y as u64, Ordering::Relaxed);
    }

    pub fn field_of_view(&self) -> (u32, u32) {
        let packed = self.field_of_view.load(Ordering::Relaxed);
        ((packed >> 32) as u32, packed as u32)
    }

    pub fn predict(&self, tile_x: u32, tile_y: u32) -> f64 {
        let (fov_x, fov_y) = self.field_of_view();
        let cols = self.grid.cols.max(1);
        let rows = self.grid.rows.max(1);
        let dx = wrapped_distance(tile_x, fov_x, cols) as f64 / cols as f64;
        let dy = wrapped_distance(tile_y, fov_y, rows) as f64 / rows as f64;
        (1.0 - self.degrade_factor * dx - self.degrade_factor * dy).max(0.0)
    }

    pub fn into_selector(self: Arc<Self>) -> PredictiveSelector<impl Fn(u32, u32) -> f64 + Send + Sync> {
        PredictiveSelector::new(move |x, y| self.predict(x, y))
    }
}

/// Distance on a ring of `len` positions; the grid wraps around horizontally
/// and vertically like an equirectangular panorama.
fn wrapped_distance(a: u32, b: u32, len: u32) -> u32 {
    let direct = a.abs_diff(b);
    direct.min(len.saturating_sub(direct))
}
