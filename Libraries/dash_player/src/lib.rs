//! Tiled DASH streaming: manifest model, representation selection and the
//! per-tile segment fetch pipeline.

pub mod error;
pub mod mpd;
pub mod segment;
pub mod selector;
pub mod tile;

pub use error::{DashError, DashResult, DurationParseError, ParseError};
pub use mpd::{Dimension, GridSize, Manifest};
pub use segment::{HttpTransport, MemoryTransport, Transport};
pub use selector::{ConstantSelector, PredictiveSelector, Selector, ViewportPredictor};
pub use tile::{write_or_abort, SegmentBuffers, SegmentRequest, TileStats, TileStreamer};
