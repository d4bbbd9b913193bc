use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{AudioClip, DeviceError, OutputStream};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Speaker endpoint. A fresh cpal stream is built per clip so the device
/// is free between playbacks.
pub struct CpalOutput {
    name: String,
    device: Device,
    volume: f32,
}

impl CpalOutput {
    pub fn new(device: Device, name: &str) -> Self {
        Self {
            name: name.to_string(),
            device,
            volume: 1.0,
        }
    }

    fn playback_error(&self, reason: impl ToString) -> DeviceError {
        DeviceError::PlaybackError {
            device: self.name.clone(),
            reason: reason.to_string(),
        }
    }

    fn stream_config(&self, clip: &AudioClip) -> Result<StreamConfig, DeviceError> {
        let rate = SampleRate(clip.sample_rate());
        let supports_rate =
            |c: &cpal::SupportedStreamConfigRange| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate;

        let configs: Vec<_> = self
            .device
            .supported_output_configs()
            .map_err(|e| self.playback_error(e))?
            .filter(supports_rate)
            .collect();

        configs
            .iter()
            .find(|c| c.channels() == clip.channels())
            .or_else(|| configs.first())
            .map(|c| c.clone().with_sample_rate(rate).config())
            .ok_or_else(|| {
                self.playback_error(format!("no output config for {} Hz", clip.sample_rate()))
            })
    }
}

/// Maps clip samples onto the device channel layout and applies gain.
fn layout_samples(clip: &AudioClip, device_channels: usize, gain: f32) -> Vec<f32> {
    let clip_channels = clip.channels().max(1) as usize;
    clip.samples()
        .chunks(clip_channels)
        .flat_map(|frame| {
            let mono = frame.iter().sum::<f32>() / frame.len() as f32;
            (0..device_channels).map(move |ch| {
                let sample = if clip_channels == device_channels {
                    frame[ch]
                } else {
                    mono
                };
                (sample * gain).clamp(-1.0, 1.0)
            })
        })
        .collect()
}

impl OutputStream for CpalOutput {
    fn set_volume(&mut self, level: f32) {
        self.volume = level.clamp(0.0, 1.0);
    }

    fn play(&mut self, clip: &AudioClip) -> Result<(), DeviceError> {
        if clip.is_empty() {
            return Ok(());
        }

        let config = self.stream_config(clip)?;
        let samples = Arc::new(layout_samples(clip, config.channels as usize, self.volume));
        let position = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));
        let failed = Arc::new(AtomicBool::new(false));

        let stream = {
            let samples = Arc::clone(&samples);
            let position = Arc::clone(&position);
            let finished = Arc::clone(&finished);
            let failed = Arc::clone(&failed);
            self.device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let start = position.load(Ordering::Relaxed);
                        for (i, out) in data.iter_mut().enumerate() {
                            *out = samples.get(start + i).copied().unwrap_or(0.0);
                        }
                        let next = start + data.len();
                        position.store(next, Ordering::Relaxed);
                        if next >= samples.len() {
                            finished.store(true, Ordering::Release);
                        }
                    },
                    move |err| {
                        tracing::error!("Audio playback error: {}", err);
                        failed.store(true, Ordering::Release);
                    },
                    None,
                )
                .map_err(|e| self.playback_error(e))?
        };

        stream.play().map_err(|e| self.playback_error(e))?;

        let deadline = Instant::now() + Duration::from_millis(clip.duration_ms()) + DRAIN_GRACE;
        while !finished.load(Ordering::Acquire) {
            if failed.load(Ordering::Acquire) {
                return Err(self.playback_error("device disconnected during playback"));
            }
            if Instant::now() > deadline {
                return Err(self.playback_error("playback did not complete in time"));
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        // let the last callback buffer reach the speaker
        std::thread::sleep(POLL_INTERVAL * 5);
        drop(stream);

        tracing::debug!(
            "Played {} ms on '{}'",
            clip.duration_ms(),
            self.name
        );
        Ok(())
    }
}
