use dash_player::DashResult;
use shared_utils::Frame;

use crate::processing::cursor::SegmentCursor;

/// Creates one [`Decoder`] per fetched segment pair.
pub trait DecoderEngine: Send + Sync {
    /// `concurrency` is the number of threads the decoder may use internally.
    fn open(&self, cursor: SegmentCursor, concurrency: usize) -> DashResult<Box<dyn Decoder>>;
}

/// A decoder bound to one segment pair.
pub trait Decoder: Send {
    /// Runs one decode round. May return no frames while the decoder is
    /// still buffering, and returns no frames once flushed.
    fn send_and_receive(&mut self) -> DashResult<Vec<Frame>>;

    /// True when every frame of the segment has been returned.
    fn is_flushed(&self) -> bool;
}
