use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host};
use std::time::Duration;

use super::capture::CpalInput;
use super::playback::CpalOutput;
use super::{AudioBackend, AudioFormat, DeviceError, DeviceProfile, InputStream, OutputStream};

/// Name that selects the host's default endpoint.
pub const DEFAULT_DEVICE: &str = "default";

/// Audio backend on the platform's default cpal host.
pub struct CpalBackend {
    host: Host,
    frame_timeout: Duration,
}

impl CpalBackend {
    pub fn new(frame_timeout: Duration) -> Self {
        let host = cpal::default_host();
        tracing::info!("Audio host: {:?}", host.id());
        Self {
            host,
            frame_timeout,
        }
    }

    fn find_device(&self, profile: &DeviceProfile, input: bool) -> Result<Device, DeviceError> {
        let not_found = |reason: String| DeviceError::OpenFailed {
            device: profile.name.clone(),
            reason,
        };

        if profile.name == DEFAULT_DEVICE {
            let device = if input {
                self.host.default_input_device()
            } else {
                self.host.default_output_device()
            };
            return device.ok_or_else(|| not_found("no default device".to_string()));
        }

        let mut devices = if input {
            self.host.input_devices()
        } else {
            self.host.output_devices()
        }
        .map_err(|e| not_found(e.to_string()))?;

        devices
            .find(|d| d.name().map(|n| n == profile.name).unwrap_or(false))
            .ok_or_else(|| not_found("device not present".to_string()))
    }
}

impl AudioBackend for CpalBackend {
    fn open_input(
        &self,
        profile: &DeviceProfile,
        format: &AudioFormat,
    ) -> Result<Box<dyn InputStream>, DeviceError> {
        let device = self.find_device(profile, true)?;
        let input = CpalInput::open(&device, &profile.name, format, self.frame_timeout)?;
        Ok(Box::new(input))
    }

    fn open_output(&self, profile: &DeviceProfile) -> Result<Box<dyn OutputStream>, DeviceError> {
        let device = self.find_device(profile, false)?;
        Ok(Box::new(CpalOutput::new(device, &profile.name)))
    }
}
