pub mod audio;
pub mod button;
pub mod config;
pub mod controller;
pub mod rate_limit;
pub mod relay;
pub mod server;
pub mod session;
pub mod sounds;
pub mod state;
pub mod vad;

pub use audio::{AudioClip, AudioDevice, CpalBackend, DeviceError, DeviceProfile};
pub use button::{ButtonEvent, ButtonEventSource};
pub use controller::{StatusHandle, TurnController, TurnOutcome};
pub use rate_limit::ControlRateLimiter;
pub use relay::{DirectRelay, RelayError, RelayHub, RelayedRelay, ResponseRelay};
pub use session::{CaptureError, CaptureOutcome, CaptureSession, Recording};
pub use sounds::SoundBank;
pub use state::{TurnState, TurnStats};
pub use vad::SilenceDetector;
