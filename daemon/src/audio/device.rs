use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{
    AudioBackend, AudioClip, AudioFormat, DeviceError, DeviceProfile, DeviceRole, Frame,
    InputStream, OutputStream,
};

/// Opens recording and playback endpoints from a fixed, prioritised list of
/// device profiles, falling back to the next profile when one fails.
#[derive(Clone)]
pub struct AudioDevice {
    backend: Arc<dyn AudioBackend>,
    profiles: Arc<[DeviceProfile]>,
    format: AudioFormat,
    max_volume: f32,
}

/// An open input endpoint. Dropping it releases the device.
pub struct InputHandle {
    rank: usize,
    profile: DeviceProfile,
    stream: Box<dyn InputStream>,
}

/// An open output endpoint. Dropping it releases the device.
pub struct OutputHandle {
    rank: usize,
    profile: DeviceProfile,
    stream: Box<dyn OutputStream>,
}

impl InputHandle {
    pub fn device_name(&self) -> &str {
        &self.profile.name
    }
}

impl OutputHandle {
    pub fn device_name(&self) -> &str {
        &self.profile.name
    }
}

impl AudioDevice {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        mut profiles: Vec<DeviceProfile>,
        format: AudioFormat,
        max_volume: f32,
    ) -> Self {
        profiles.sort_by_key(|p| (p.role == DeviceRole::Output, p.priority));
        Self {
            backend,
            profiles: profiles.into(),
            format,
            max_volume,
        }
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    fn candidates(&self, role: DeviceRole) -> impl Iterator<Item = &DeviceProfile> {
        self.profiles.iter().filter(move |p| p.role == role)
    }

    /// Tries every input profile in priority order and returns the first
    /// that opens.
    pub fn open_input(&self) -> Result<InputHandle, DeviceError> {
        self.open_input_from(0)
    }

    /// Tries every output profile in priority order. The opened handle has
    /// its volume normalised to the configured maximum.
    pub fn open_output(&self) -> Result<OutputHandle, DeviceError> {
        self.open_output_from(0)
    }

    fn open_input_from(&self, start: usize) -> Result<InputHandle, DeviceError> {
        let mut tried = Vec::new();
        for (rank, profile) in self.candidates(DeviceRole::Input).enumerate().skip(start) {
            match self.backend.open_input(profile, &self.format) {
                Ok(stream) => {
                    info!("Opened input device '{}'", profile.name);
                    return Ok(InputHandle {
                        rank,
                        profile: profile.clone(),
                        stream,
                    });
                }
                Err(e) => {
                    warn!("Input device '{}' unavailable: {}", profile.name, e);
                    tried.push(profile.name.clone());
                }
            }
        }
        Err(DeviceError::DeviceUnavailable {
            role: DeviceRole::Input,
            tried: tried.join(", "),
        })
    }

    fn open_output_from(&self, start: usize) -> Result<OutputHandle, DeviceError> {
        let mut tried = Vec::new();
        for (rank, profile) in self.candidates(DeviceRole::Output).enumerate().skip(start) {
            match self.backend.open_output(profile) {
                Ok(mut stream) => {
                    stream.set_volume(self.max_volume);
                    info!(
                        "Opened output device '{}' at volume {:.2}",
                        profile.name, self.max_volume
                    );
                    return Ok(OutputHandle {
                        rank,
                        profile: profile.clone(),
                        stream,
                    });
                }
                Err(e) => {
                    warn!("Output device '{}' unavailable: {}", profile.name, e);
                    tried.push(profile.name.clone());
                }
            }
        }
        Err(DeviceError::DeviceUnavailable {
            role: DeviceRole::Output,
            tried: tried.join(", "),
        })
    }

    /// Turns an open input handle into a lazy frame sequence that ends after
    /// `max_duration_ms` of audio.
    pub fn record(&self, handle: InputHandle, max_duration_ms: u64) -> Recorder {
        let frames_left = self.format.frames_within(max_duration_ms);
        debug!(
            "Recording from '{}' for at most {} frames",
            handle.device_name(),
            frames_left
        );
        Recorder {
            device: self.clone(),
            handle: Some(handle),
            frames_left,
            retried: false,
        }
    }

    /// Plays a clip to completion. A failure is retried once on the next
    /// output profile; the handle is swapped for the replacement device.
    pub fn play(&self, handle: &mut OutputHandle, clip: &AudioClip) -> Result<(), DeviceError> {
        let err = match handle.stream.play(clip) {
            Ok(()) => return Ok(()),
            Err(err) => as_playback_error(err, handle.device_name()),
        };

        warn!("Playback failed, retrying on next output device: {}", err);
        let mut replacement = self.open_output_from(handle.rank + 1).map_err(|_| err.clone())?;
        let result = replacement.stream.play(clip);
        let device = replacement.profile.name.clone();
        *handle = replacement;
        result.map_err(|e| as_playback_error(e, &device))
    }

    /// Opens an output device, plays the clip and releases the device.
    pub fn play_clip(&self, clip: &AudioClip) -> Result<(), DeviceError> {
        let mut handle = self.open_output()?;
        self.play(&mut handle, clip)
    }
}

fn as_playback_error(err: DeviceError, device: &str) -> DeviceError {
    match err {
        DeviceError::PlaybackError { .. } => err,
        other => DeviceError::PlaybackError {
            device: device.to_string(),
            reason: other.to_string(),
        },
    }
}

/// Frame sequence produced by [`AudioDevice::record`]. It owns the input
/// handle and releases it when dropped or when the sequence ends in error.
pub struct Recorder {
    device: AudioDevice,
    handle: Option<InputHandle>,
    frames_left: usize,
    retried: bool,
}

impl Recorder {
    /// True once the duration cap has been reached.
    pub fn hit_cap(&self) -> bool {
        self.frames_left == 0
    }

    pub fn device_name(&self) -> Option<&str> {
        self.handle.as_ref().map(InputHandle::device_name)
    }

    /// Releases the input device early.
    pub fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!("Released input device '{}'", handle.device_name());
        }
    }
}

impl Iterator for Recorder {
    type Item = Result<Frame, DeviceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.frames_left == 0 {
            self.release();
            return None;
        }

        let handle = self.handle.as_mut()?;
        match handle.stream.read_frame() {
            Ok(frame) => {
                self.frames_left -= 1;
                Some(Ok(frame))
            }
            Err(err) => {
                let next_rank = handle.rank + 1;
                self.release();

                if self.retried {
                    return Some(Err(err));
                }
                self.retried = true;

                warn!("Input read failed, retrying on next input device: {}", err);
                match self.device.open_input_from(next_rank) {
                    Ok(replacement) => {
                        self.handle = Some(replacement);
                        self.next()
                    }
                    Err(_) => Some(Err(err)),
                }
            }
        }
    }
}
