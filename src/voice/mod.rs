//! Voice I/O module
//!
//! Microphone frame capture, voice-activity detection, the adaptive
//! utterance recorder, and speaker output. Transcription and synthesis
//! clients live here as well since they speak the same PCM formats.

mod capture;
mod playback;
mod recorder;
mod stt;
mod tts;
mod vad;

pub use capture::{
    samples_to_wav, FrameSource, MicFrameSource, PcmFrame, FRAME_DURATION, FRAME_DURATION_MS,
    FRAME_SIZE, SAMPLE_RATE,
};
pub use playback::{pcm_bytes_to_samples, AudioSink, CpalSink};
pub use recorder::{AdaptiveRecorder, RecordingResult};
pub use stt::{TranscribeClient, WhisperStt};
pub use tts::{OpenAiTts, PcmStream, SynthesisClient};
pub use vad::{VoiceGate, WebRtcGate};
