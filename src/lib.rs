//! Parley - real-time voice conversation pipeline
//!
//! This library implements the speech turn-taking pipeline of a voice
//! assistant: adaptive utterance capture with voice-activity detection,
//! fan-out of a streaming chat response to independent consumers, and
//! strictly ordered speech playback over concurrent synthesis calls.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  Turn Orchestrator                    │
//! │  record ─ transcribe ─ generate ─ speak + print      │
//! └──────┬──────────────┬──────────────────┬─────────────┘
//!        │              │                  │
//! ┌──────▼─────┐ ┌──────▼───────┐ ┌────────▼───────────┐
//! │   voice    │ │     llm      │ │      speech        │
//! │ mic / VAD  │ │ chat stream  │ │ segmenter / reorder │
//! │ recorder   │ │ response tee │ │ buffer / playback   │
//! └────────────┘ └──────────────┘ └────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod llm;
pub mod policy;
pub mod speech;
pub mod turn;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use llm::{ChatClient, ChatMessage, ResponseFragment, ResponseTee, TeeReader};
pub use policy::{Decision, PolicyClient, StaticPolicy};
pub use speech::{SentenceSegmenter, SentenceUnit, SpeechPipeline};
pub use turn::{TurnOrchestrator, TurnOutcome};
pub use voice::{
    AdaptiveRecorder, FrameSource, RecordingResult, VoiceGate, FRAME_DURATION_MS, FRAME_SIZE,
    SAMPLE_RATE,
};
