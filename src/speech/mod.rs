//! Spoken-response processing
//!
//! Turns a fragment stream into speakable sentence units and plays their
//! synthesized audio in sentence order.

mod pipeline;
mod segmenter;

pub use pipeline::{PlaybackQueue, SpeechPipeline};
pub use segmenter::{SentenceSegmenter, SentenceUnit};
