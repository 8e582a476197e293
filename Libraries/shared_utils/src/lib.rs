pub mod barrier;
pub mod queue;
pub mod types;

pub use barrier::GenerationBarrier;
pub use queue::{BackpressureQueue, DEFAULT_QUEUE_CAPACITY};
pub use types::{ErrorKind, Frame, TileCoordinate, TileEvent};
