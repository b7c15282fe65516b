//! Concurrent synthesis with strictly ordered playback
//!
//! Sentence units are synthesized by a bounded pool of workers, so later
//! sentences can be in flight while earlier ones play. Finished audio
//! lands in a reorder buffer keyed by sequence number and a dedicated
//! playback loop drains it in order, never relying on completion order.
//! A failed or non-speakable unit keeps its slot as an empty segment so
//! the sequence stays gap-free and playback never stalls.

use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use futures::StreamExt;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::speech::segmenter::SentenceUnit;
use crate::voice::{pcm_bytes_to_samples, AudioSink, SynthesisClient};

/// How long the playback loop sleeps between queue checks; also bounds
/// how long a cancelled turn keeps playing
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Reorder buffer between synthesis workers and the playback loop
///
/// Workers insert segments under any sequence number in any order; the
/// consumer asks for exactly the next one and blocks until it arrives,
/// the end watermark passes it, or the turn is cancelled.
pub struct PlaybackQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

#[derive(Default)]
struct QueueState {
    segments: BTreeMap<u64, Vec<i16>>,
    /// One past the last sequence number of the turn, set once the
    /// producer side knows no further units are coming
    end: Option<u64>,
}

impl PlaybackQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            ready: Condvar::new(),
        }
    }

    /// Store a finished segment; empty segments hold a slot without audio
    pub fn insert(&self, sequence: u64, samples: Vec<i16>) {
        let mut state = self.state.lock().expect("playback queue lock poisoned");
        state.segments.insert(sequence, samples);
        drop(state);
        self.ready.notify_all();
    }

    /// Mark the turn complete after `end` segments
    pub fn finalize(&self, end: u64) {
        let mut state = self.state.lock().expect("playback queue lock poisoned");
        state.end = Some(end);
        drop(state);
        self.ready.notify_all();
    }

    /// Block until the segment with `sequence` is available
    ///
    /// Returns `None` once the watermark says the turn has no segment at
    /// or past `sequence`, or as soon as `cancel` fires.
    fn wait_next(&self, sequence: u64, cancel: &CancellationToken) -> Option<Vec<i16>> {
        let mut state = self.state.lock().expect("playback queue lock poisoned");
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            if let Some(samples) = state.segments.remove(&sequence) {
                return Some(samples);
            }
            if state.end.is_some_and(|end| sequence >= end) {
                return None;
            }
            let (guard, _timeout) = self
                .ready
                .wait_timeout(state, POLL_INTERVAL)
                .expect("playback queue lock poisoned");
            state = guard;
        }
    }
}

impl Default for PlaybackQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives sentence units through synthesis and into ordered playback
pub struct SpeechPipeline {
    tts: Arc<dyn SynthesisClient>,
    workers: usize,
}

impl SpeechPipeline {
    pub fn new(tts: Arc<dyn SynthesisClient>, workers: usize) -> Self {
        Self {
            tts,
            workers: workers.max(1),
        }
    }

    /// Consume sentence units until the channel closes, playing their
    /// audio strictly in sequence order
    ///
    /// Cancellation aborts pending synthesis, discards buffered audio
    /// and stops playback within one poll interval.
    pub async fn run(
        &self,
        sink: Box<dyn AudioSink + Send>,
        mut units: mpsc::Receiver<SentenceUnit>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let queue = Arc::new(PlaybackQueue::new());

        let playback = {
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || playback_loop(sink, &queue, &cancel))
        };

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut synthesis = JoinSet::new();
        let mut end = 0u64;

        loop {
            let unit = tokio::select! {
                unit = units.recv() => match unit {
                    Some(unit) => unit,
                    None => break,
                },
                () = cancel.cancelled() => break,
            };
            end = end.max(unit.sequence + 1);

            if !unit.speakable {
                queue.insert(unit.sequence, Vec::new());
                continue;
            }

            let permit = tokio::select! {
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                () = cancel.cancelled() => break,
            };

            let tts = Arc::clone(&self.tts);
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            synthesis.spawn(async move {
                let _permit = permit;
                let samples = match synthesize(tts.as_ref(), &unit.text, &cancel).await {
                    Ok(samples) => samples,
                    Err(err) => {
                        tracing::warn!(
                            sequence = unit.sequence,
                            error = %err,
                            "synthesis failed, skipping segment",
                        );
                        Vec::new()
                    }
                };
                queue.insert(unit.sequence, samples);
            });
        }

        if cancel.is_cancelled() {
            synthesis.shutdown().await;
        } else {
            while synthesis.join_next().await.is_some() {}
        }
        queue.finalize(end);

        playback
            .await
            .map_err(|err| Error::Audio(format!("playback task failed: {err}")))?
    }
}

fn playback_loop(
    mut sink: Box<dyn AudioSink + Send>,
    queue: &PlaybackQueue,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut next = 0u64;
    while let Some(samples) = queue.wait_next(next, cancel) {
        if !samples.is_empty() {
            tracing::trace!(sequence = next, samples = samples.len(), "playing segment");
            sink.write(&samples)?;
        }
        next += 1;
    }
    Ok(())
}

/// Collect one unit's PCM stream into samples, bailing out early on cancel
async fn synthesize(
    tts: &dyn SynthesisClient,
    text: &str,
    cancel: &CancellationToken,
) -> Result<Vec<i16>> {
    let mut stream = tts.synthesize(text).await?;
    let mut pcm = BytesMut::new();
    loop {
        let chunk = tokio::select! {
            chunk = stream.next() => chunk,
            () = cancel.cancelled() => return Ok(Vec::new()),
        };
        match chunk {
            Some(Ok(bytes)) => pcm.extend_from_slice(&bytes),
            Some(Err(err)) => return Err(err),
            None => break,
        }
    }
    Ok(pcm_bytes_to_samples(&pcm))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_yields_segments_in_sequence_order() {
        let queue = PlaybackQueue::new();
        let cancel = CancellationToken::new();

        queue.insert(2, vec![2]);
        queue.insert(0, vec![0]);
        queue.insert(1, vec![1]);
        queue.finalize(3);

        for expected in 0..3 {
            let samples = queue.wait_next(expected, &cancel).unwrap();
            assert_eq!(samples, vec![expected as i16]);
        }
        assert!(queue.wait_next(3, &cancel).is_none());
    }

    #[test]
    fn finalize_unblocks_consumer_past_watermark() {
        let queue = Arc::new(PlaybackQueue::new());
        let cancel = CancellationToken::new();

        let consumer = {
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            std::thread::spawn(move || queue.wait_next(0, &cancel))
        };
        std::thread::sleep(Duration::from_millis(20));
        queue.finalize(0);

        assert!(consumer.join().unwrap().is_none());
    }

    #[test]
    fn cancellation_unblocks_consumer_within_poll_interval() {
        let queue = Arc::new(PlaybackQueue::new());
        let cancel = CancellationToken::new();

        let consumer = {
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            std::thread::spawn(move || queue.wait_next(0, &cancel))
        };
        std::thread::sleep(Duration::from_millis(20));
        cancel.cancel();

        assert!(consumer.join().unwrap().is_none());
    }

    #[test]
    fn empty_segment_holds_its_slot() {
        let queue = PlaybackQueue::new();
        let cancel = CancellationToken::new();

        queue.insert(0, Vec::new());
        queue.insert(1, vec![7]);
        queue.finalize(2);

        assert_eq!(queue.wait_next(0, &cancel), Some(Vec::new()));
        assert_eq!(queue.wait_next(1, &cancel), Some(vec![7]));
    }
}
