//! Audio capture from microphone
//!
//! Wraps the default input device as a pull-based sequence of fixed-size
//! PCM frames sized for the voice-activity gate.

use std::sync::mpsc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16_000;

/// Frame duration accepted by the voice-activity gate
pub const FRAME_DURATION_MS: u32 = 30;

/// Samples per frame (mono)
pub const FRAME_SIZE: usize = (SAMPLE_RATE as usize * FRAME_DURATION_MS as usize) / 1000;

/// Frame duration as a [`Duration`]
pub const FRAME_DURATION: Duration = Duration::from_millis(FRAME_DURATION_MS as u64);

/// One fixed-duration block of mono 16-bit samples
pub type PcmFrame = Vec<i16>;

/// Pull-based source of PCM frames
///
/// `Ok(Some(frame))` yields the next frame, `Ok(None)` means the device
/// closed the stream. Implementations may block on device I/O.
pub trait FrameSource {
    /// Pull the next frame from the device
    ///
    /// # Errors
    ///
    /// Returns error on a device fault
    fn next_frame(&mut self) -> Result<Option<PcmFrame>>;
}

/// Captures fixed-size frames from the default input device
///
/// The cpal stream is owned by this struct; dropping it releases the
/// microphone, so capture is scoped to the lifetime of the source.
pub struct MicFrameSource {
    _stream: Stream,
    frames: mpsc::Receiver<PcmFrame>,
}

impl MicFrameSource {
    /// Open the default input device and start capturing
    ///
    /// # Errors
    ///
    /// Returns error if no suitable input device is available
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .ok_or_else(|| Error::Audio("no suitable input config found".to_string()))?;

        let config: StreamConfig = supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            channels = config.channels,
            "audio capture initialized"
        );

        let (tx, rx) = mpsc::channel::<PcmFrame>();
        let mut pending: Vec<i16> = Vec::with_capacity(FRAME_SIZE * 2);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    #[allow(clippy::cast_possible_truncation)]
                    pending.extend(
                        data.iter()
                            .map(|s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16),
                    );

                    while pending.len() >= FRAME_SIZE {
                        let frame: PcmFrame = pending.drain(..FRAME_SIZE).collect();
                        // Receiver gone means the recorder finished; stop quietly
                        if tx.send(frame).is_err() {
                            pending.clear();
                            break;
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        tracing::debug!("audio capture started");

        Ok(Self {
            _stream: stream,
            frames: rx,
        })
    }
}

impl FrameSource for MicFrameSource {
    fn next_frame(&mut self) -> Result<Option<PcmFrame>> {
        match self.frames.recv_timeout(Duration::from_secs(1)) {
            Ok(frame) => Ok(Some(frame)),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                Err(Error::Audio("microphone stream stalled".to_string()))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Ok(None),
        }
    }
}

/// Encode i16 samples as WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
