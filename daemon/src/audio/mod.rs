//! Audio endpoints: opening input/output devices in priority order,
//! frame-by-frame recording and blocking playback.

pub mod capture;
pub mod clip;
pub mod device;
pub mod host;
pub mod playback;
#[cfg(any(test, feature = "test-util"))]
pub mod scripted;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::config::AudioConfig;

pub use clip::{AudioClip, ClipError};
pub use device::{AudioDevice, InputHandle, OutputHandle, Recorder};
pub use host::CpalBackend;

/// One block of interleaved PCM samples in [-1.0, 1.0].
pub type Frame = Vec<f32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceRole {
    Input,
    Output,
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceRole::Input => write!(f, "input"),
            DeviceRole::Output => write!(f, "output"),
        }
    }
}

/// A named audio endpoint. Lower `priority` is tried first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    pub name: String,
    pub role: DeviceRole,
    pub priority: usize,
}

impl DeviceProfile {
    pub fn new(name: impl Into<String>, role: DeviceRole, priority: usize) -> Self {
        Self {
            name: name.into(),
            role,
            priority,
        }
    }

    /// Builds the static profile list from the configured device names,
    /// keeping their listed order as priority.
    pub fn from_config(config: &AudioConfig) -> Vec<DeviceProfile> {
        let inputs = config
            .input_devices
            .iter()
            .enumerate()
            .map(|(i, name)| DeviceProfile::new(name.clone(), DeviceRole::Input, i));
        let outputs = config
            .output_devices
            .iter()
            .enumerate()
            .map(|(i, name)| DeviceProfile::new(name.clone(), DeviceRole::Output, i));
        inputs.chain(outputs).collect()
    }
}

/// Capture format shared by every input device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per channel in one frame.
    pub frame_samples: usize,
}

impl AudioFormat {
    pub fn from_config(config: &AudioConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            frame_samples: config.chunk_size as usize,
        }
    }

    /// Interleaved sample count of one frame.
    pub fn frame_len(&self) -> usize {
        self.frame_samples * self.channels as usize
    }

    pub fn frame_duration_ms(&self) -> f64 {
        self.frame_samples as f64 * 1000.0 / self.sample_rate as f64
    }

    /// Largest frame count whose audio fits inside `duration_ms` (at least one).
    pub fn frames_within(&self, duration_ms: u64) -> usize {
        let frames = duration_ms * self.sample_rate as u64 / (self.frame_samples as u64 * 1000);
        (frames as usize).max(1)
    }

    /// Smallest frame count whose audio covers `duration_ms` (at least one).
    pub fn frames_covering(&self, duration_ms: u64) -> usize {
        let per_frame = self.frame_samples as u64 * 1000;
        let frames = (duration_ms * self.sample_rate as u64).div_ceil(per_frame);
        (frames as usize).max(1)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("No usable {role} device (tried: {tried})")]
    DeviceUnavailable { role: DeviceRole, tried: String },

    #[error("Failed to open '{device}': {reason}")]
    OpenFailed { device: String, reason: String },

    #[error("Audio stream error on '{device}': {reason}")]
    Stream { device: String, reason: String },

    #[error("No audio from '{device}' within {timeout_ms} ms")]
    Stalled { device: String, timeout_ms: u64 },

    #[error("Playback failed on '{device}': {reason}")]
    PlaybackError { device: String, reason: String },
}

/// Platform audio layer. Implementations open one endpoint per call;
/// dropping the returned stream releases the device.
pub trait AudioBackend: Send + Sync {
    fn open_input(
        &self,
        profile: &DeviceProfile,
        format: &AudioFormat,
    ) -> Result<Box<dyn InputStream>, DeviceError>;

    fn open_output(&self, profile: &DeviceProfile) -> Result<Box<dyn OutputStream>, DeviceError>;
}

pub trait InputStream: Send {
    /// Blocks until one full frame is available.
    fn read_frame(&mut self) -> Result<Frame, DeviceError>;
}

pub trait OutputStream: Send {
    fn set_volume(&mut self, level: f32);

    /// Blocks until the clip has finished playing.
    fn play(&mut self, clip: &AudioClip) -> Result<(), DeviceError>;
}
