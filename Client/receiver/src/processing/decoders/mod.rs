pub mod engine;
pub mod mp4;

pub use engine::{Decoder, DecoderEngine};
pub use mp4::Mp4FragmentEngine;
