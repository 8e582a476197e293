use std::io::{self, Read, Seek, SeekFrom};

use bytes::Bytes;

/// Read-only view of an initialization segment followed by a media segment,
/// without copying either.
#[derive(Debug, Clone)]
pub struct SegmentCursor {
    initial: Bytes,
    media: Bytes,
    position: u64,
}

impl SegmentCursor {
    pub fn new(initial: Bytes, media: Bytes) -> Self {
        Self {
            initial,
            media,
            position: 0,
        }
    }

    pub fn len(&self) -> u64 {
        (self.initial.len() + self.media.len()) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn remaining(&self) -> u64 {
        self.len().saturating_sub(self.position)
    }

    /// Offset at which the media segment starts.
    pub fn media_offset(&self) -> u64 {
        self.initial.len() as u64
    }

    fn chunk(&self) -> &[u8] {
        let position = self.position;
        let initial_len = self.initial.len() as u64;
        if position < initial_len {
            &self.initial[position as usize..]
        } else if position - initial_len < self.media.len() as u64 {
            &self.media[(position - initial_len) as usize..]
        } else {
            &[]
        }
    }
}

impl Read for SegmentCursor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let chunk = self.chunk();
        let count = chunk.len().min(buf.len());
        buf[..count].copy_from_slice(&chunk[..count]);
        self.position += count as u64;
        Ok(count)
    }
}

impl Seek for SegmentCursor {
    fn seek(&mut self, from: SeekFrom) -> io::Result<u64> {
        let target = match from {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.len().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        match target {
            Some(position) => {
                self.position = position;
                Ok(position)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )),
        }
    }
}
