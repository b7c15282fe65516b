//! Per-frame voice-activity detection

use webrtc_vad::{SampleRate, Vad, VadMode};

use crate::{Error, Result};

/// Classifies a single PCM frame as speech or non-speech
pub trait VoiceGate {
    /// True if the frame contains speech
    fn is_speech(&mut self, frame: &[i16]) -> bool;
}

/// WebRTC VAD-backed gate
pub struct WebRtcGate {
    vad: Vad,
}

impl WebRtcGate {
    /// Create a gate with the given aggressiveness (0 = lenient, 3 = strict)
    ///
    /// # Errors
    ///
    /// Returns error if the mode is out of range
    pub fn new(mode: u8) -> Result<Self> {
        let vad_mode = match mode {
            0 => VadMode::Quality,
            1 => VadMode::LowBitrate,
            2 => VadMode::Aggressive,
            3 => VadMode::VeryAggressive,
            other => {
                return Err(Error::Config(format!(
                    "vad mode must be 0-3, got {other}"
                )))
            }
        };

        Ok(Self {
            vad: Vad::new_with_rate_and_mode(SampleRate::Rate16kHz, vad_mode),
        })
    }
}

impl VoiceGate for WebRtcGate {
    fn is_speech(&mut self, frame: &[i16]) -> bool {
        // Frames of the wrong length are rejected by the VAD; treat as silence
        self.vad.is_voice_segment(frame).unwrap_or(false)
    }
}
