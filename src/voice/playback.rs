//! Audio playback to speakers

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use crate::{Error, Result};

/// Push-based sample sink
///
/// The playback stage owns exactly one sink for the duration of a turn;
/// writes block until the samples have been played.
pub trait AudioSink {
    /// Write samples to the output device, blocking until drained
    ///
    /// # Errors
    ///
    /// Returns error if playback fails
    fn write(&mut self, samples: &[i16]) -> Result<()>;
}

/// Plays audio on the default output device
///
/// Holds only the stream configuration; the device handle is acquired
/// per write and released when the write completes, so the sink itself
/// stays `Send`.
pub struct CpalSink {
    config: StreamConfig,
    sample_rate: u32,
}

impl CpalSink {
    /// Check the default output device supports the given sample rate
    ///
    /// # Errors
    ///
    /// Returns error if no suitable output device is available
    pub fn new(sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(sample_rate)
                        && c.max_sample_rate() >= SampleRate(sample_rate)
                })
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(sample_rate))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self {
            config,
            sample_rate,
        })
    }
}

impl AudioSink for CpalSink {
    fn write(&mut self, samples: &[i16]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device".to_string()))?;

        let config = self.config.clone();
        let channels = config.channels as usize;

        let samples: Arc<Vec<f32>> =
            Arc::new(samples.iter().map(|&s| f32::from(s) / 32768.0).collect());
        let position = Arc::new(Mutex::new(0usize));
        let finished = Arc::new(Mutex::new(false));

        let samples_cb = Arc::clone(&samples);
        let position_cb = Arc::clone(&position);
        let finished_cb = Arc::clone(&finished);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut pos = match position_cb.lock() {
                        Ok(pos) => pos,
                        Err(_) => return,
                    };

                    for frame in data.chunks_mut(channels) {
                        let sample = if *pos < samples_cb.len() {
                            samples_cb[*pos]
                        } else {
                            if let Ok(mut done) = finished_cb.lock() {
                                *done = true;
                            }
                            0.0
                        };

                        for out in frame.iter_mut() {
                            *out = sample;
                        }

                        if *pos < samples_cb.len() {
                            *pos += 1;
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let duration_ms = (samples.len() as u64 * 1000) / u64::from(self.sample_rate);

        // Poll for completion with timeout
        let start = std::time::Instant::now();
        let timeout = std::time::Duration::from_millis(duration_ms + 500);

        loop {
            let done = finished.lock().map(|f| *f).unwrap_or(true);
            if done || start.elapsed() > timeout {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
        }

        drop(stream);
        tracing::debug!(samples = samples.len(), "segment playback complete");

        Ok(())
    }
}

/// Decode little-endian 16-bit PCM bytes into samples
///
/// A trailing odd byte (truncated stream) is dropped.
#[must_use]
pub fn pcm_bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_le_pcm() {
        let bytes = [0x00, 0x00, 0xff, 0x7f, 0x00, 0x80];
        assert_eq!(pcm_bytes_to_samples(&bytes), vec![0, i16::MAX, i16::MIN]);
    }

    #[test]
    fn drops_trailing_odd_byte() {
        let bytes = [0x01, 0x00, 0x7f];
        assert_eq!(pcm_bytes_to_samples(&bytes), vec![1]);
    }
}
