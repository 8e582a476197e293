use std::collections::VecDeque;
use std::fmt;

use bytes::Bytes;
use dash_player::{DashError, DashResult};
use shared_utils::Frame;
use tracing::debug;

pub mod cursor;
pub mod decoders;

pub use cursor::SegmentCursor;
pub use decoders::{Decoder, DecoderEngine, Mp4FragmentEngine};

/// Pulls decoded frames out of one segment pair.
pub struct FrameSource {
    decoder: Box<dyn Decoder>,
    pending: VecDeque<Frame>,
    rounds: u64,
}

impl FrameSource {
    pub fn new(decoder: Box<dyn Decoder>) -> Self {
        Self {
            decoder,
            pending: VecDeque::new(),
            rounds: 0,
        }
    }

    pub fn has_more(&self) -> bool {
        !self.pending.is_empty() || !self.decoder.is_flushed()
    }

    /// Decodes until at least one frame is available or the decoder is
    /// flushed; the final round of a segment may come back empty.
    pub fn consume_batch(&mut self) -> DashResult<Vec<Frame>> {
        if !self.pending.is_empty() {
            return Ok(self.pending.drain(..).collect());
        }
        if self.decoder.is_flushed() {
            return Err(DashError::StreamDrained);
        }
        loop {
            let frames = self.decoder.send_and_receive()?;
            self.rounds += 1;
            if !frames.is_empty() || self.decoder.is_flushed() {
                return Ok(frames);
            }
        }
    }

    /// Single-frame pull; frames left over from the same round are kept for
    /// the next call.
    pub fn consume_one(&mut self) -> DashResult<Option<Frame>> {
        if self.pending.is_empty() && !self.decoder.is_flushed() {
            let frames = self.consume_batch()?;
            self.pending.extend(frames);
        }
        Ok(self.pending.pop_front())
    }

    pub fn rounds(&self) -> u64 {
        self.rounds
    }
}

impl fmt::Debug for FrameSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSource")
            .field("pending", &self.pending.len())
            .field("flushed", &self.decoder.is_flushed())
            .field("rounds", &self.rounds)
            .finish()
    }
}

/// Opens a decoder over `initial` followed by `media`. Any failure to set the
/// decoder up is reported as a bad response.
pub fn make_decoder(
    engine: &dyn DecoderEngine,
    initial: Bytes,
    media: Bytes,
    concurrency: usize,
) -> DashResult<FrameSource> {
    let cursor = SegmentCursor::new(initial, media);
    let length = cursor.len();
    let decoder = engine.open(cursor, concurrency.max(1)).map_err(|e| {
        debug!("Decoder setup failed for {} byte segment: {}", length, e);
        match e {
            DashError::BadResponse(_) => e,
            other => DashError::BadResponse(other.to_string()),
        }
    })?;
    Ok(FrameSource::new(decoder))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    /// Emits `script[i]` frames on round `i`, flushing after the last round.
    struct Scripted {
        script: Vec<usize>,
        round: usize,
    }

    impl Decoder for Scripted {
        fn send_and_receive(&mut self) -> DashResult<Vec<Frame>> {
            let count = self.script.get(self.round).copied().unwrap_or(0);
            self.round += 1;
            Ok((0..count)
                .map(|i| Frame::new(1, 1, Bytes::from(vec![self.round as u8, i as u8])))
                .collect())
        }

        fn is_flushed(&self) -> bool {
            self.round >= self.script.len()
        }
    }

    fn source(script: Vec<usize>) -> FrameSource {
        FrameSource::new(Box::new(Scripted { script, round: 0 }))
    }

    #[test]
    fn batch_skips_empty_rounds() {
        let mut frames = source(vec![0, 0, 2, 0]);
        assert!(frames.has_more());
        assert_eq!(frames.consume_batch().unwrap().len(), 2);
        assert_eq!(frames.rounds(), 3);
        // The last round flushes without output.
        assert!(frames.has_more());
        assert!(frames.consume_batch().unwrap().is_empty());
        assert!(!frames.has_more());
        assert_eq!(frames.consume_batch(), Err(DashError::StreamDrained));
    }

    #[test]
    fn single_pulls_keep_the_rest_of_the_round() {
        let mut frames = source(vec![3]);
        let first = frames.consume_one().unwrap().unwrap();
        assert_eq!(first.data.as_ref(), &[1, 0]);
        assert!(frames.has_more());
        let rest = frames.consume_batch().unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[1].data.as_ref(), &[1, 2]);
        assert_eq!(frames.consume_one().unwrap(), None);
    }

    struct Refusing;

    impl DecoderEngine for Refusing {
        fn open(&self, mut cursor: SegmentCursor, concurrency: usize) -> DashResult<Box<dyn Decoder>> {
            assert_eq!(concurrency, 1);
            let mut all = Vec::new();
            cursor.read_to_end(&mut all).unwrap();
            Err(DashError::Parse(dash_player::ParseError::Xml(String::from_utf8(all).unwrap())))
        }
    }

    #[test]
    fn setup_failure_is_a_bad_response() {
        let result = make_decoder(&Refusing, Bytes::from_static(b"in"), Bytes::from_static(b"it"), 0);
        match result {
            Err(DashError::BadResponse(message)) => assert!(message.contains("init")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
