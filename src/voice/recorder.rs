//! Adaptive utterance recorder
//!
//! Starts buffering when the voice-activity gate first reports speech and
//! stops after a run of trailing silence. Elapsed time is accounted in
//! whole frames, which keeps timeout behavior deterministic regardless of
//! device jitter.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::capture::{FrameSource, FRAME_DURATION};
use super::vad::VoiceGate;
use crate::config::RecorderConfig;

/// Outcome of one capture attempt
#[derive(Debug)]
pub enum RecordingResult {
    /// Speech was captured; samples are in capture order
    Captured(Vec<i16>),

    /// No speech observed within the onset window
    TimedOut,

    /// The turn was cancelled while capturing; buffered audio is discarded
    Cancelled,

    /// The input device failed before a terminal state was reached
    DeviceError(String),
}

enum State {
    AwaitingSpeech,
    Recording,
}

/// Start/stop recording state machine
pub struct AdaptiveRecorder {
    onset_window: Duration,
    silence_threshold: Duration,
}

impl AdaptiveRecorder {
    /// Create a recorder with the given tuning
    #[must_use]
    pub fn new(config: &RecorderConfig) -> Self {
        Self {
            onset_window: config.onset_window,
            silence_threshold: config.silence_threshold,
        }
    }

    /// Record one utterance from the frame source
    ///
    /// Pulls frames until speech onset, buffers through the utterance,
    /// and stops once trailing silence exceeds the threshold. No frames
    /// are read after a terminal state. The cancellation token is
    /// checked before every frame read so a cancelled turn returns
    /// promptly and the caller can release the device.
    pub fn record<S, G>(
        &self,
        source: &mut S,
        gate: &mut G,
        cancel: &CancellationToken,
    ) -> RecordingResult
    where
        S: FrameSource,
        G: VoiceGate,
    {
        let mut state = State::AwaitingSpeech;
        let mut frames: Vec<i16> = Vec::new();
        let mut waited = Duration::ZERO;
        let mut silence = Duration::ZERO;

        loop {
            if cancel.is_cancelled() {
                tracing::debug!("capture cancelled");
                return RecordingResult::Cancelled;
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::error!("input stream ended before utterance completed");
                    return RecordingResult::DeviceError(
                        "input stream ended before utterance completed".to_string(),
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, "frame read failed");
                    return RecordingResult::DeviceError(e.to_string());
                }
            };

            let is_speech = gate.is_speech(&frame);

            match state {
                State::AwaitingSpeech => {
                    if is_speech {
                        tracing::debug!("speech detected, recording");
                        state = State::Recording;
                        frames.extend_from_slice(&frame);
                        silence = Duration::ZERO;
                    } else {
                        waited += FRAME_DURATION;
                        if waited >= self.onset_window {
                            tracing::info!(
                                window_ms = self.onset_window.as_millis(),
                                "no speech detected, timeout"
                            );
                            return RecordingResult::TimedOut;
                        }
                    }
                }
                State::Recording => {
                    frames.extend_from_slice(&frame);

                    if is_speech {
                        silence = Duration::ZERO;
                    } else {
                        silence += FRAME_DURATION;
                        if silence > self.silence_threshold {
                            tracing::info!(
                                samples = frames.len(),
                                "trailing silence reached, recording complete"
                            );
                            return RecordingResult::Captured(frames);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::{PcmFrame, FRAME_SIZE};
    use crate::Result;

    /// Replays a scripted speech/silence pattern, counting reads
    struct ScriptedSource {
        pattern: Vec<bool>,
        reads: usize,
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<Option<PcmFrame>> {
            let Some(&voiced) = self.pattern.get(self.reads) else {
                return Ok(None);
            };
            self.reads += 1;
            // Encode voicing in the first sample so the gate can read it back
            let mut frame = vec![0i16; FRAME_SIZE];
            frame[0] = i16::from(voiced);
            Ok(Some(frame))
        }
    }

    struct MarkerGate;

    impl VoiceGate for MarkerGate {
        fn is_speech(&mut self, frame: &[i16]) -> bool {
            frame[0] == 1
        }
    }

    fn recorder() -> AdaptiveRecorder {
        AdaptiveRecorder::new(&RecorderConfig {
            onset_window: Duration::from_secs(3),
            silence_threshold: Duration::from_secs(1),
            vad_mode: 3,
        })
    }

    #[test]
    fn times_out_without_speech() {
        let mut source = ScriptedSource {
            pattern: vec![false; 400],
            reads: 0,
        };
        let result = recorder().record(&mut source, &mut MarkerGate, &CancellationToken::new());

        assert!(matches!(result, RecordingResult::TimedOut));
        // 3s onset window at 30ms frames = exactly 100 reads
        assert_eq!(source.reads, 100);
    }

    #[test]
    fn stops_after_trailing_silence() {
        // ~2s of speech followed by open-ended silence
        let speech_frames = 2000 / 30 + 1;
        let mut pattern = vec![true; speech_frames];
        pattern.extend(vec![false; 400]);
        let mut source = ScriptedSource { pattern, reads: 0 };

        let result = recorder().record(&mut source, &mut MarkerGate, &CancellationToken::new());

        let RecordingResult::Captured(samples) = result else {
            panic!("expected captured audio");
        };

        // Silence counter must strictly exceed 1s: 34 silent frames buffered
        let silence_frames = 1000 / 30 + 1;
        let expected = (speech_frames + silence_frames) * FRAME_SIZE;
        assert_eq!(samples.len(), expected);
        assert_eq!(source.reads, speech_frames + silence_frames);
    }

    #[test]
    fn cancellation_stops_capture_before_the_next_frame() {
        let mut source = ScriptedSource {
            pattern: vec![true; 400],
            reads: 0,
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = recorder().record(&mut source, &mut MarkerGate, &cancel);

        assert!(matches!(result, RecordingResult::Cancelled));
        assert_eq!(source.reads, 0);
    }

    #[test]
    fn device_exhaustion_is_an_error() {
        let mut source = ScriptedSource {
            pattern: vec![true; 5],
            reads: 0,
        };
        let result = recorder().record(&mut source, &mut MarkerGate, &CancellationToken::new());

        assert!(matches!(result, RecordingResult::DeviceError(_)));
    }

    #[test]
    fn speech_resets_silence_counter() {
        // Speech, near-threshold silence, more speech, then final silence
        let mut pattern = vec![true; 10];
        pattern.extend(vec![false; 30]); // 0.9s, under the 1s threshold
        pattern.extend(vec![true; 10]);
        pattern.extend(vec![false; 40]);
        let total = pattern.len();
        let mut source = ScriptedSource { pattern, reads: 0 };

        let result = recorder().record(&mut source, &mut MarkerGate, &CancellationToken::new());

        let RecordingResult::Captured(samples) = result else {
            panic!("expected captured audio");
        };
        // Stops 34 silent frames into the final run, 6 frames early
        assert_eq!(samples.len(), (total - 6) * FRAME_SIZE);
    }
}
