//! Shared test utilities
//!
//! Fake synthesis and playback backends so pipeline tests run without
//! audio hardware or network access.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use parley::voice::{AudioSink, PcmStream, SynthesisClient};
use parley::{Error, Result, SentenceUnit};

/// Sink that records every write instead of playing it
pub struct RecordingSink {
    writes: Arc<Mutex<Vec<Vec<i16>>>>,
}

impl RecordingSink {
    /// Returns the sink and a handle observing its writes
    #[must_use]
    pub fn new() -> (Self, Arc<Mutex<Vec<Vec<i16>>>>) {
        let writes = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                writes: Arc::clone(&writes),
            },
            writes,
        )
    }
}

impl AudioSink for RecordingSink {
    fn write(&mut self, samples: &[i16]) -> Result<()> {
        self.writes
            .lock()
            .expect("recording sink lock poisoned")
            .push(samples.to_vec());
        Ok(())
    }
}

/// Synthesizer scripted through the unit text
///
/// Text is `"marker"` or `"marker:delay_ms"`; the result is one PCM
/// chunk holding the marker as a single little-endian `i16` sample,
/// produced after the given delay. The text `"fail"` yields an error.
pub struct ScriptedSynthesis;

#[async_trait]
impl SynthesisClient for ScriptedSynthesis {
    async fn synthesize(&self, text: &str) -> Result<PcmStream> {
        if text.starts_with("fail") {
            return Err(Error::Tts("scripted synthesis failure".to_string()));
        }

        let mut parts = text.split(':');
        let marker: i16 = leading_digits(parts.next().unwrap_or(""));
        let delay_ms: u64 = parts.next().map_or(0, |p| leading_digits::<u64>(p));

        Ok(stream::once(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok(Bytes::from(marker.to_le_bytes().to_vec()))
        })
        .boxed())
    }
}

fn leading_digits<T: std::str::FromStr + Default>(text: &str) -> T {
    let digits: String = text
        .trim()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().unwrap_or_default()
}

/// Build speakable units with sequence numbers assigned in order
#[must_use]
pub fn units(texts: &[&str]) -> Vec<SentenceUnit> {
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| SentenceUnit {
            sequence: i as u64,
            text: (*text).to_string(),
            speakable: !text.trim().is_empty(),
        })
        .collect()
}
