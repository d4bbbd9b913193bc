//! One listen-and-record turn: open the input, feed frames to the silence
//! detector, stop on completed speech or on the duration cap.

pub mod recording;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::audio::{AudioDevice, DeviceError};
use crate::vad::SilenceDetector;

pub use recording::{Recording, RecordingBuffer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Listening,
    Stopped,
    TimedOut,
    Aborted,
}

#[derive(Debug)]
pub enum CaptureOutcome {
    /// The speaker finished: speech followed by a full window of silence.
    Stopped(Recording),
    /// The duration cap was reached. The recording is still usable.
    TimedOut(Recording),
}

impl CaptureOutcome {
    pub fn recording(&self) -> &Recording {
        match self {
            CaptureOutcome::Stopped(recording) | CaptureOutcome::TimedOut(recording) => recording,
        }
    }

    pub fn into_recording(self) -> Recording {
        match self {
            CaptureOutcome::Stopped(recording) | CaptureOutcome::TimedOut(recording) => recording,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("Capture could not start: {0}")]
    DeviceUnavailable(DeviceError),

    #[error("Capture aborted: {0}")]
    CaptureAborted(String),
}

/// Cancels a running capture from another thread. The session notices it
/// before reading the next frame.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct CaptureSession {
    device: AudioDevice,
    detector: SilenceDetector,
    max_duration_ms: u64,
    state: CaptureState,
    abort: AbortHandle,
}

impl CaptureSession {
    pub fn new(
        device: AudioDevice,
        detector: SilenceDetector,
        max_duration_ms: u64,
        abort: AbortHandle,
    ) -> Self {
        Self {
            device,
            detector,
            max_duration_ms,
            state: CaptureState::Idle,
            abort,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Records until the detector reports a finished turn or the cap is hit.
    /// Blocks on every frame read, so async callers run it on a blocking
    /// thread. The input device is released before this returns, whatever
    /// the outcome; an aborted capture drops its partial recording.
    pub fn run(&mut self) -> Result<CaptureOutcome, CaptureError> {
        self.detector.reset();

        let handle = match self.device.open_input() {
            Ok(handle) => handle,
            Err(e) => {
                self.state = CaptureState::Aborted;
                return Err(CaptureError::DeviceUnavailable(e));
            }
        };

        self.state = CaptureState::Listening;
        info!("Listening on '{}'", handle.device_name());

        let mut recorder = self.device.record(handle, self.max_duration_ms);
        let mut buffer = RecordingBuffer::new(*self.device.format());

        loop {
            if self.abort.is_aborted() {
                recorder.release();
                self.state = CaptureState::Aborted;
                warn!("Capture aborted after {} frames", buffer.frames());
                return Err(CaptureError::CaptureAborted(
                    "cancelled while listening".to_string(),
                ));
            }

            match recorder.next() {
                Some(Ok(frame)) => {
                    buffer.push_frame(&frame);
                    let observation = self.detector.observe(&frame);
                    debug!(
                        "Frame {}: {:?}",
                        buffer.frames(),
                        observation.activity
                    );

                    if observation.turn_complete {
                        recorder.release();
                        self.state = CaptureState::Stopped;
                        let recording = buffer.freeze();
                        info!(
                            "Capture stopped on silence: {} frames, {} ms",
                            recording.frames(),
                            recording.duration_ms()
                        );
                        return Ok(CaptureOutcome::Stopped(recording));
                    }
                }
                Some(Err(e)) => {
                    drop(recorder);
                    self.state = CaptureState::Aborted;
                    warn!("Input device failed mid-capture: {}", e);
                    return Err(CaptureError::CaptureAborted(e.to_string()));
                }
                None => {
                    drop(recorder);
                    self.state = CaptureState::TimedOut;
                    let recording = buffer.freeze();
                    info!(
                        "Capture reached the {} ms cap: {} frames",
                        self.max_duration_ms,
                        recording.frames()
                    );
                    return Ok(CaptureOutcome::TimedOut(recording));
                }
            }
        }
    }
}
