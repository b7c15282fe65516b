//! Turn orchestration
//!
//! Wires one conversational turn end to end: capture an utterance from
//! the microphone, transcribe it, stream the model's reply, and fan the
//! reply out to two concurrent consumers: the speech pipeline and a
//! text printer that also watches for tool calls.

use std::collections::HashMap;
use std::io::Write as _;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::llm::{ChatClient, ChatMessage, OpenAiChat, ResponseFragment, ResponseTee};
use crate::policy::{Decision, PolicyClient, StaticPolicy};
use crate::speech::{SentenceSegmenter, SpeechPipeline};
use crate::voice::{
    samples_to_wav, AdaptiveRecorder, CpalSink, MicFrameSource, OpenAiTts, RecordingResult,
    SynthesisClient, TranscribeClient, WebRtcGate, WhisperStt, SAMPLE_RATE,
};

/// How a single turn ended
#[derive(Debug)]
pub enum TurnOutcome {
    /// No speech was detected within the onset window
    NoSpeech,

    /// The turn was cancelled before completing
    Cancelled,

    /// The model replied with text only
    Completed {
        transcript: String,
        reply: String,
    },

    /// The model requested a tool invocation
    ToolCall {
        transcript: String,
        name: String,
        arguments: String,
        /// Policy verdict for the requested action
        allowed: bool,
    },
}

/// Runs conversational turns against the configured services
pub struct TurnOrchestrator {
    config: Config,
    chat: Arc<dyn ChatClient>,
    stt: Arc<dyn TranscribeClient>,
    tts: Arc<dyn SynthesisClient>,
    policy: Arc<dyn PolicyClient>,
}

impl TurnOrchestrator {
    /// Build an orchestrator with OpenAI-backed clients
    ///
    /// # Errors
    ///
    /// Returns error if no API key is configured
    pub fn new(config: Config) -> Result<Self> {
        let api_key = config
            .api_keys
            .openai
            .clone()
            .ok_or_else(|| Error::Config("OPENAI_API_KEY is not set".to_string()))?;

        let chat = OpenAiChat::new(
            api_key.clone(),
            config.llm.base_url.clone(),
            config.llm.model.clone(),
        )?;
        let stt = WhisperStt::new(
            api_key.clone(),
            config.llm.base_url.clone(),
            config.stt.model.clone(),
        )?;
        let tts = OpenAiTts::new(
            api_key,
            config.llm.base_url.clone(),
            config.tts.model.clone(),
            config.tts.voice.clone(),
            config.tts.speed,
        )?;
        let policy = StaticPolicy::new(&config.policy);

        Ok(Self {
            config,
            chat: Arc::new(chat),
            stt: Arc::new(stt),
            tts: Arc::new(tts),
            policy: Arc::new(policy),
        })
    }

    /// Run turns until cancelled
    ///
    /// Turns that time out waiting for speech are skipped silently;
    /// transient service errors are logged and the loop continues.
    /// Audio device errors are fatal.
    pub async fn run_loop(&self, cancel: CancellationToken) -> Result<()> {
        let mut history = vec![ChatMessage::system(&self.config.llm.system_prompt)];
        tracing::info!("listening; press Ctrl-C to exit");

        loop {
            let outcome = tokio::select! {
                outcome = self.run_turn(&mut history, &cancel) => outcome,
                () = cancel.cancelled() => return Ok(()),
            };

            match outcome {
                Ok(TurnOutcome::NoSpeech) => {
                    tracing::debug!("no speech detected, listening again");
                }
                Ok(TurnOutcome::Cancelled) => return Ok(()),
                Ok(TurnOutcome::Completed { transcript, reply }) => {
                    tracing::info!(
                        transcript = %transcript,
                        reply_chars = reply.len(),
                        "turn completed",
                    );
                }
                Ok(TurnOutcome::ToolCall {
                    transcript,
                    name,
                    allowed,
                    ..
                }) => {
                    tracing::info!(transcript = %transcript, tool = %name, allowed, "tool call");
                }
                Err(err @ Error::Audio(_)) => return Err(err),
                Err(err) => {
                    tracing::error!(error = %err, "turn failed");
                }
            }
        }
    }

    /// Run exactly one turn
    ///
    /// Every stage observes the cancellation token: capture checks it
    /// per frame, the service calls race against it, and the response
    /// stream is cut short so the connection closes rather than being
    /// drained to completion.
    pub async fn run_turn(
        &self,
        history: &mut Vec<ChatMessage>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        // Capture blocks on the microphone, so it runs off the async
        // runtime; dropping the source on any exit releases the device
        let recorder_config = self.config.recorder.clone();
        let capture_cancel = cancel.clone();
        let recording = tokio::task::spawn_blocking(move || -> Result<RecordingResult> {
            let mut source = MicFrameSource::open()?;
            let mut gate = WebRtcGate::new(recorder_config.vad_mode)?;
            let recorder = AdaptiveRecorder::new(&recorder_config);
            Ok(recorder.record(&mut source, &mut gate, &capture_cancel))
        })
        .await
        .map_err(|err| Error::Audio(format!("capture task failed: {err}")))??;

        let samples = match recording {
            RecordingResult::Captured(samples) => samples,
            RecordingResult::TimedOut => return Ok(TurnOutcome::NoSpeech),
            RecordingResult::Cancelled => return Ok(TurnOutcome::Cancelled),
            RecordingResult::DeviceError(message) => return Err(Error::Audio(message)),
        };

        let wav = samples_to_wav(&samples, SAMPLE_RATE)?;
        let transcript = tokio::select! {
            transcript = self.stt.transcribe(&wav, &self.config.stt.language) => transcript?,
            () = cancel.cancelled() => return Ok(TurnOutcome::Cancelled),
        };
        tracing::info!(transcript = %transcript, "heard");

        history.push(ChatMessage::user(&transcript));
        let stream = tokio::select! {
            stream = self.chat.generate(history) => stream?,
            () = cancel.cancelled() => return Ok(TurnOutcome::Cancelled),
        };
        // Ending the stream on cancel lets the tee producer finish and
        // drop the connection instead of draining it
        let stream = stream.take_until(cancel.clone().cancelled_owned());
        let tee = ResponseTee::spawn(stream);

        // Consumer 1: segment into sentences and speak them
        let (unit_tx, unit_rx) = mpsc::channel(16);
        let mut speech_reader = tee.subscribe();
        let segmentation = tokio::spawn(async move {
            let mut segmenter = SentenceSegmenter::new();
            while let Some(fragment) = speech_reader.next().await {
                if let ResponseFragment::Text(delta) = fragment {
                    for unit in segmenter.push(&delta) {
                        if unit_tx.send(unit).await.is_err() {
                            return;
                        }
                    }
                }
            }
            if let Some(unit) = segmenter.finish() {
                let _ = unit_tx.send(unit).await;
            }
        });

        let sink = CpalSink::new(self.config.tts.sample_rate)?;
        let pipeline = SpeechPipeline::new(Arc::clone(&self.tts), self.config.tts.workers);
        let playback_cancel = cancel.clone();
        let playback = tokio::spawn(async move {
            pipeline.run(Box::new(sink), unit_rx, playback_cancel).await
        });

        // Consumer 2: print the reply and watch for a tool call
        let mut text_reader = tee.subscribe();
        let mut reply = String::new();
        let mut tool_call = None;
        let mut stdout = std::io::stdout();
        while let Some(fragment) = text_reader.next().await {
            match fragment {
                ResponseFragment::Text(delta) => {
                    let _ = write!(stdout, "{delta}");
                    let _ = stdout.flush();
                    reply.push_str(&delta);
                }
                ResponseFragment::ToolCall { name, arguments } => {
                    tool_call = Some((name, arguments));
                }
            }
        }
        if !reply.is_empty() {
            let _ = writeln!(stdout);
        }

        segmentation
            .await
            .map_err(|err| Error::Llm(format!("segmentation task failed: {err}")))?;
        playback
            .await
            .map_err(|err| Error::Audio(format!("playback task failed: {err}")))??;

        // A cut-short stream is not an empty or failed reply
        if cancel.is_cancelled() {
            return Ok(TurnOutcome::Cancelled);
        }

        if let Some(message) = tee.error() {
            return Err(Error::Llm(message));
        }
        if reply.is_empty() && tool_call.is_none() {
            return Err(Error::Llm("model returned an empty response".to_string()));
        }

        if !reply.is_empty() {
            history.push(ChatMessage::assistant(&reply));
        }

        if let Some((name, arguments)) = tool_call {
            let mut context = HashMap::new();
            context.insert("mode".to_string(), "voice".to_string());
            let decision = self.policy.enforce(&name, &context).await?;
            if let Decision::Deny { reason } = &decision {
                println!("(tool call '{name}' blocked: {reason})");
            }
            return Ok(TurnOutcome::ToolCall {
                transcript,
                name,
                arguments,
                allowed: decision.is_allowed(),
            });
        }

        Ok(TurnOutcome::Completed { transcript, reply })
    }
}
