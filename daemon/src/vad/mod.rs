pub mod detector;
pub mod silence_detector;

pub use detector::{
    frame_rms, ActivityClassifier, AdaptiveEnergyClassifier, EnergyClassifier, VoiceActivity,
};
pub use silence_detector::{Observation, SilenceDetector};
