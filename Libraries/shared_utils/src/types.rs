use std::fmt;

use bytes::Bytes;

/// Position of a tile inside the panoramic grid, 0-based.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoordinate {
    pub x: u32,
    pub y: u32,
}

impl TileCoordinate {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Raster position of the tile in a grid that is `cols` wide (0-based).
    pub fn raster_index(&self, cols: u32) -> usize {
        (self.y * cols + self.x) as usize
    }

    /// 1-based tile index, `x + y * cols + 1`.
    pub fn tile_index(&self, cols: u32) -> u32 {
        self.x + self.y * cols + 1
    }

    /// Inverse of [`TileCoordinate::tile_index`].
    pub fn from_tile_index(index: u32, cols: u32) -> Self {
        debug_assert!(index >= 1 && cols > 0);
        Self {
            x: (index - 1) % cols,
            y: (index - 1) / cols,
        }
    }
}

impl fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl From<(u32, u32)> for TileCoordinate {
    fn from((x, y): (u32, u32)) -> Self {
        Self { x, y }
    }
}

/// A decoded frame of one tile.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Media segment number (1-based) the frame was decoded from.
    pub segment_number: u64,
    /// Position of the frame inside its segment.
    pub frame_index: u64,
    /// Representation the segment was fetched with.
    pub representation_index: usize,
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Bytes) -> Self {
        Self {
            segment_number: 0,
            frame_index: 0,
            representation_index: 0,
            width,
            height,
            data,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Small copyable tag describing why a tile stream ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Parse,
    BadRequest,
    BadResponse,
    SessionClosed,
    Aborted,
    StreamDrained,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Parse => "parse",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::BadResponse => "bad_response",
            ErrorKind::SessionClosed => "session_closed",
            ErrorKind::Aborted => "aborted",
            ErrorKind::StreamDrained => "stream_drained",
        };
        f.write_str(name)
    }
}

/// Value carried by a tile queue. The stream of a tile is a run of frames
/// terminated by at most one sentinel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TileEvent {
    Frame(Frame),
    EndOfStream,
    Error(ErrorKind),
}

impl TileEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TileEvent::Frame(_))
    }

    pub fn into_frame(self) -> Option<Frame> {
        match self {
            TileEvent::Frame(frame) => Some(frame),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn tile_index_is_a_bijection() {
        for (cols, rows) in [(1u32, 1u32), (3, 3), (4, 2), (6, 4)] {
            let mut seen = HashSet::new();
            for y in 0..rows {
                for x in 0..cols {
                    let coordinate = TileCoordinate::new(x, y);
                    let index = coordinate.tile_index(cols);
                    assert!((1..=cols * rows).contains(&index));
                    assert!(seen.insert(index));
                    assert_eq!(TileCoordinate::from_tile_index(index, cols), coordinate);
                }
            }
            assert_eq!(seen.len() as u32, cols * rows);
        }
    }

    #[test]
    fn raster_index_matches_row_major_order() {
        assert_eq!(TileCoordinate::new(2, 1).raster_index(3), 5);
        assert_eq!(TileCoordinate::new(0, 0).raster_index(3), 0);
    }

    #[test]
    fn only_frames_are_non_terminal() {
        let frame = TileEvent::Frame(Frame::new(1, 1, Bytes::from_static(b"x")));
        assert!(!frame.is_terminal());
        assert!(TileEvent::EndOfStream.is_terminal());
        assert!(TileEvent::Error(ErrorKind::BadRequest).is_terminal());
        assert_eq!(TileEvent::EndOfStream.into_frame(), None);
    }
}
