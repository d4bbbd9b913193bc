//! In-memory audio backend that replays a frame script and records every
//! device open, release and playback. Used to exercise capture and turn
//! logic without sound hardware.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{
    AudioBackend, AudioClip, AudioFormat, DeviceError, DeviceProfile, DeviceRole, Frame,
    InputStream, OutputStream,
};

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Opened { role: DeviceRole, device: String },
    Released { role: DeviceRole, device: String },
    VolumeSet { device: String, level: f32 },
    Played { device: String, samples: usize },
}

#[derive(Default)]
struct Script {
    frames: VecDeque<Result<Frame, DeviceError>>,
    tail: Option<Frame>,
    unavailable: HashSet<String>,
    failing_playback: HashSet<String>,
    events: Vec<DeviceEvent>,
}

#[derive(Clone, Default)]
pub struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
}

pub fn silent_frame(len: usize) -> Frame {
    vec![0.0; len]
}

/// A square wave at the given amplitude; its RMS equals `amplitude`.
pub fn loud_frame(len: usize, amplitude: f32) -> Frame {
    (0..len)
        .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
        .collect()
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_frames(&self, frame: Frame, count: usize) {
        let mut script = self.lock();
        for _ in 0..count {
            script.frames.push_back(Ok(frame.clone()));
        }
    }

    pub fn push_failure(&self, err: DeviceError) {
        self.lock().frames.push_back(Err(err));
    }

    /// Frame returned once the script runs out. Without one, reads past the
    /// end report a stalled device.
    pub fn repeat_forever(&self, frame: Frame) {
        self.lock().tail = Some(frame);
    }

    pub fn mark_unavailable(&self, device: &str) {
        self.lock().unavailable.insert(device.to_string());
    }

    pub fn fail_playback_on(&self, device: &str) {
        self.lock().failing_playback.insert(device.to_string());
    }

    pub fn events(&self) -> Vec<DeviceEvent> {
        self.lock().events.clone()
    }

    pub fn opened_count(&self, role: DeviceRole) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|e| matches!(e, DeviceEvent::Opened { role: r, .. } if *r == role))
            .count()
    }

    pub fn released_count(&self, role: DeviceRole) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|e| matches!(e, DeviceEvent::Released { role: r, .. } if *r == role))
            .count()
    }

    /// Devices that completed a playback, in order.
    pub fn played_on(&self) -> Vec<String> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                DeviceEvent::Played { device, .. } => Some(device.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: DeviceEvent) {
        self.lock().events.push(event);
    }
}

impl AudioBackend for ScriptedBackend {
    fn open_input(
        &self,
        profile: &DeviceProfile,
        _format: &AudioFormat,
    ) -> Result<Box<dyn InputStream>, DeviceError> {
        if self.lock().unavailable.contains(&profile.name) {
            return Err(DeviceError::OpenFailed {
                device: profile.name.clone(),
                reason: "scripted as unavailable".to_string(),
            });
        }
        self.record(DeviceEvent::Opened {
            role: DeviceRole::Input,
            device: profile.name.clone(),
        });
        Ok(Box::new(ScriptedInput {
            backend: self.clone(),
            device: profile.name.clone(),
        }))
    }

    fn open_output(&self, profile: &DeviceProfile) -> Result<Box<dyn OutputStream>, DeviceError> {
        if self.lock().unavailable.contains(&profile.name) {
            return Err(DeviceError::OpenFailed {
                device: profile.name.clone(),
                reason: "scripted as unavailable".to_string(),
            });
        }
        self.record(DeviceEvent::Opened {
            role: DeviceRole::Output,
            device: profile.name.clone(),
        });
        Ok(Box::new(ScriptedOutput {
            backend: self.clone(),
            device: profile.name.clone(),
        }))
    }
}

struct ScriptedInput {
    backend: ScriptedBackend,
    device: String,
}

impl InputStream for ScriptedInput {
    fn read_frame(&mut self) -> Result<Frame, DeviceError> {
        let mut script = self.backend.lock();
        match script.frames.pop_front() {
            Some(next) => next,
            None => script.tail.clone().ok_or_else(|| DeviceError::Stalled {
                device: self.device.clone(),
                timeout_ms: 0,
            }),
        }
    }
}

impl Drop for ScriptedInput {
    fn drop(&mut self) {
        self.backend.record(DeviceEvent::Released {
            role: DeviceRole::Input,
            device: self.device.clone(),
        });
    }
}

struct ScriptedOutput {
    backend: ScriptedBackend,
    device: String,
}

impl OutputStream for ScriptedOutput {
    fn set_volume(&mut self, level: f32) {
        self.backend.record(DeviceEvent::VolumeSet {
            device: self.device.clone(),
            level,
        });
    }

    fn play(&mut self, clip: &AudioClip) -> Result<(), DeviceError> {
        if self.backend.lock().failing_playback.contains(&self.device) {
            return Err(DeviceError::PlaybackError {
                device: self.device.clone(),
                reason: "scripted disconnect".to_string(),
            });
        }
        self.backend.record(DeviceEvent::Played {
            device: self.device.clone(),
            samples: clip.samples().len(),
        });
        Ok(())
    }
}

impl Drop for ScriptedOutput {
    fn drop(&mut self) {
        self.backend.record(DeviceEvent::Released {
            role: DeviceRole::Output,
            device: self.device.clone(),
        });
    }
}
