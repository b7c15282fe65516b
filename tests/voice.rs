//! Voice capture integration tests
//!
//! Exercises the recorder and PCM helpers without audio hardware.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use parley::config::RecorderConfig;
use parley::voice::{
    pcm_bytes_to_samples, samples_to_wav, AdaptiveRecorder, FrameSource, PcmFrame,
    RecordingResult, VoiceGate, FRAME_SIZE, SAMPLE_RATE,
};
use parley::Result;

/// Frame source driven by a fixed script; frames with a nonzero first
/// sample count as voiced for [`EnergyGate`]
struct ScriptedMic {
    frames: Vec<PcmFrame>,
    cursor: usize,
}

impl ScriptedMic {
    fn new(script: &[bool]) -> Self {
        let frames = script
            .iter()
            .map(|voiced| {
                let mut frame = vec![0i16; FRAME_SIZE];
                if *voiced {
                    frame[0] = 1000;
                }
                frame
            })
            .collect();
        Self { frames, cursor: 0 }
    }
}

impl FrameSource for ScriptedMic {
    fn next_frame(&mut self) -> Result<Option<PcmFrame>> {
        let frame = self.frames.get(self.cursor).cloned();
        self.cursor += 1;
        Ok(frame)
    }
}

struct EnergyGate;

impl VoiceGate for EnergyGate {
    fn is_speech(&mut self, frame: &[i16]) -> bool {
        frame.first().is_some_and(|s| *s != 0)
    }
}

fn script(speech: usize, silence: usize) -> Vec<bool> {
    let mut frames = vec![true; speech];
    frames.extend(std::iter::repeat(false).take(silence));
    frames
}

#[test]
fn recorder_times_out_in_silence() {
    let mut mic = ScriptedMic::new(&[false; 200]);
    let mut gate = EnergyGate;
    let recorder = AdaptiveRecorder::new(&RecorderConfig::default());

    assert!(matches!(
        recorder.record(&mut mic, &mut gate, &CancellationToken::new()),
        RecordingResult::TimedOut
    ));
}

#[test]
fn recorder_captures_speech_followed_by_silence() {
    // One second of speech, then enough silence to trip the threshold
    let mut mic = ScriptedMic::new(&script(34, 60));
    let mut gate = EnergyGate;
    let recorder = AdaptiveRecorder::new(&RecorderConfig::default());

    let result = recorder.record(&mut mic, &mut gate, &CancellationToken::new());
    let RecordingResult::Captured(samples) = result else {
        panic!("expected a captured utterance");
    };

    // Speech frames plus the buffered trailing silence
    assert!(samples.len() >= 34 * FRAME_SIZE);
    assert_eq!(samples.len() % FRAME_SIZE, 0);
}

#[test]
fn recorder_reports_device_loss_mid_utterance() {
    // Source runs dry while speech is still active
    let mut mic = ScriptedMic::new(&script(10, 0));
    let mut gate = EnergyGate;
    let recorder = AdaptiveRecorder::new(&RecorderConfig::default());

    assert!(matches!(
        recorder.record(&mut mic, &mut gate, &CancellationToken::new()),
        RecordingResult::DeviceError(_)
    ));
}

/// Never stops talking; paced like a real device
struct ChattyMic;

impl FrameSource for ChattyMic {
    fn next_frame(&mut self) -> Result<Option<PcmFrame>> {
        std::thread::sleep(Duration::from_millis(1));
        let mut frame = vec![0i16; FRAME_SIZE];
        frame[0] = 1000;
        Ok(Some(frame))
    }
}

#[test]
fn cancelled_turn_reads_no_frames() {
    let mut mic = ScriptedMic::new(&script(10, 10));
    let mut gate = EnergyGate;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = AdaptiveRecorder::new(&RecorderConfig::default()).record(
        &mut mic,
        &mut gate,
        &cancel,
    );

    assert!(matches!(result, RecordingResult::Cancelled));
}

#[test]
fn cancellation_interrupts_continuous_speech() {
    // Without a per-frame cancel check this capture would never end
    let cancel = CancellationToken::new();
    let capture = {
        let cancel = cancel.clone();
        std::thread::spawn(move || {
            let mut mic = ChattyMic;
            let mut gate = EnergyGate;
            AdaptiveRecorder::new(&RecorderConfig::default()).record(&mut mic, &mut gate, &cancel)
        })
    };

    std::thread::sleep(Duration::from_millis(50));
    cancel.cancel();

    let result = capture.join().expect("capture thread");
    assert!(matches!(result, RecordingResult::Cancelled));
}

#[test]
fn wav_encoding_has_expected_header() {
    let samples = vec![0i16, 100, -100, 32_000];
    let wav = samples_to_wav(&samples, SAMPLE_RATE).unwrap();

    assert_eq!(&wav[0..4], b"RIFF");
    assert_eq!(&wav[8..12], b"WAVE");

    // Mono, 16 kHz, 16-bit PCM
    let channels = u16::from_le_bytes([wav[22], wav[23]]);
    let sample_rate = u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]);
    let bits = u16::from_le_bytes([wav[34], wav[35]]);
    assert_eq!(channels, 1);
    assert_eq!(sample_rate, SAMPLE_RATE);
    assert_eq!(bits, 16);

    // All samples made it into the data chunk
    assert_eq!(wav.len(), 44 + samples.len() * 2);
}

#[test]
fn pcm_decoding_is_little_endian() {
    let bytes = [0x00, 0x00, 0xE8, 0x03, 0x18, 0xFC];
    assert_eq!(pcm_bytes_to_samples(&bytes), vec![0, 1000, -1000]);
}

#[test]
fn pcm_decoding_drops_trailing_odd_byte() {
    let bytes = [0xE8, 0x03, 0xFF];
    assert_eq!(pcm_bytes_to_samples(&bytes), vec![1000]);
}
