//! Fragmented MP4 walker: every top-level `mdat` box of the media segment
//! becomes one frame.

use std::io::{self, Read, Seek, SeekFrom};

use byteorder::{BigEndian, ReadBytesExt};
use bytes::Bytes;
use dash_player::{DashError, DashResult};
use shared_utils::Frame;
use tracing::trace;

use crate::processing::cursor::SegmentCursor;
use crate::processing::decoders::engine::{Decoder, DecoderEngine};

const LEADING_BOXES: [&[u8; 4]; 3] = [b"ftyp", b"styp", b"moov"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BoxHeader {
    fourcc: [u8; 4],
    /// Payload size, header excluded.
    payload: u64,
}

fn corrupt(error: io::Error) -> DashError {
    DashError::BadResponse(format!("corrupted MP4 box: {error}"))
}

/// Reads the header at the cursor position, `None` at a clean end of stream.
fn read_box_header(cursor: &mut SegmentCursor) -> io::Result<Option<BoxHeader>> {
    if cursor.remaining() == 0 {
        return Ok(None);
    }
    let size = cursor.read_u32::<BigEndian>()? as u64;
    let mut fourcc = [0u8; 4];
    cursor.read_exact(&mut fourcc)?;
    let (size, header_len) = match size {
        0 => (cursor.remaining() + 8, 8),
        1 => (cursor.read_u64::<BigEndian>()?, 16),
        size => (size, 8),
    };
    if size < header_len || size - header_len > cursor.remaining() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "box {:?} declares {} bytes, {} available",
                String::from_utf8_lossy(&fourcc),
                size,
                cursor.remaining() + header_len
            ),
        ));
    }
    Ok(Some(BoxHeader {
        fourcc,
        payload: size - header_len,
    }))
}

/// Reference [`DecoderEngine`] for fragmented MP4 tiles.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mp4FragmentEngine;

impl DecoderEngine for Mp4FragmentEngine {
    fn open(&self, mut cursor: SegmentCursor, _concurrency: usize) -> DashResult<Box<dyn Decoder>> {
        let first = read_box_header(&mut cursor)
            .map_err(corrupt)?
            .ok_or_else(|| DashError::BadResponse("empty segment".to_string()))?;
        if !LEADING_BOXES.contains(&&first.fourcc) {
            return Err(DashError::BadResponse(format!(
                "stream starts with {:?} box",
                String::from_utf8_lossy(&first.fourcc)
            )));
        }
        cursor.seek(SeekFrom::Start(0)).map_err(corrupt)?;
        Ok(Box::new(Mp4FragmentDecoder { cursor, flushed: false }))
    }
}

struct Mp4FragmentDecoder {
    cursor: SegmentCursor,
    flushed: bool,
}

impl Decoder for Mp4FragmentDecoder {
    fn send_and_receive(&mut self) -> DashResult<Vec<Frame>> {
        if self.flushed {
            return Ok(vec![]);
        }
        while let Some(header) = read_box_header(&mut self.cursor).map_err(corrupt)? {
            if &header.fourcc == b"mdat" {
                let mut payload = vec![0u8; header.payload as usize];
                self.cursor.read_exact(&mut payload).map_err(corrupt)?;
                trace!(bytes = payload.len(), offset = self.cursor.position(), "mdat");
                return Ok(vec![Frame::new(0, 0, Bytes::from(payload))]);
            }
            self.cursor
                .seek(SeekFrom::Current(header.payload as i64))
                .map_err(corrupt)?;
        }
        self.flushed = true;
        Ok(vec![])
    }

    fn is_flushed(&self) -> bool {
        self.flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mp4_box(fourcc: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
        out.extend_from_slice(fourcc);
        out.extend_from_slice(payload);
        out
    }

    fn open(initial: Vec<u8>, media: Vec<u8>) -> DashResult<Box<dyn Decoder>> {
        Mp4FragmentEngine.open(SegmentCursor::new(initial.into(), media.into()), 1)
    }

    #[test]
    fn yields_one_frame_per_mdat() {
        let initial = [mp4_box(b"ftyp", b"iso6"), mp4_box(b"moov", &[0; 12])].concat();
        let media = [
            mp4_box(b"styp", b"msdh"),
            mp4_box(b"moof", &[1; 20]),
            mp4_box(b"mdat", b"first"),
            mp4_box(b"moof", &[2; 20]),
            mp4_box(b"mdat", b"second"),
        ]
        .concat();
        let mut decoder = open(initial, media).unwrap();

        let first = decoder.send_and_receive().unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].data, Bytes::from_static(b"first"));
        let second = decoder.send_and_receive().unwrap();
        assert_eq!(second[0].data, Bytes::from_static(b"second"));
        assert!(!decoder.is_flushed());
        assert!(decoder.send_and_receive().unwrap().is_empty());
        assert!(decoder.is_flushed());
    }

    #[test]
    fn large_size_header() {
        let mut mdat = 1u32.to_be_bytes().to_vec();
        mdat.extend_from_slice(b"mdat");
        mdat.extend_from_slice(&(16u64 + 3).to_be_bytes());
        mdat.extend_from_slice(b"abc");
        let mut decoder = open(mp4_box(b"ftyp", b""), mdat).unwrap();
        assert_eq!(decoder.send_and_receive().unwrap()[0].data, Bytes::from_static(b"abc"));
    }

    #[test]
    fn rejects_streams_without_a_leading_box() {
        assert!(matches!(
            open(b"garbage!".to_vec(), vec![]),
            Err(DashError::BadResponse(_))
        ));
        assert!(matches!(open(vec![], vec![]), Err(DashError::BadResponse(_))));
    }

    #[test]
    fn truncated_box_is_a_bad_response() {
        let mut media = mp4_box(b"mdat", b"payload");
        media.truncate(10);
        let mut decoder = open(mp4_box(b"ftyp", b""), media).unwrap();
        assert!(matches!(decoder.send_and_receive(), Err(DashError::BadResponse(_))));
    }
}
