use std::collections::VecDeque;
use tracing::{debug, info};

use super::detector::{ActivityClassifier, AdaptiveEnergyClassifier, EnergyClassifier, VoiceActivity};
use crate::audio::AudioFormat;
use crate::config::CaptureConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub activity: VoiceActivity,
    /// Speech was heard earlier and the whole window has since been silent.
    pub turn_complete: bool,
}

/// Decides when the speaker has finished: every frame in a rolling window
/// of the last `window_len` frames is silent, and at least one frame before
/// that was speech.
pub struct SilenceDetector {
    classifier: Box<dyn ActivityClassifier>,
    window: VecDeque<VoiceActivity>,
    window_len: usize,
    heard_speech: bool,
}

impl SilenceDetector {
    pub fn new(classifier: Box<dyn ActivityClassifier>, window_len: usize) -> Self {
        let window_len = window_len.max(1);
        info!(
            "SilenceDetector initialized: classifier={}, window={} frames",
            classifier.name(),
            window_len
        );

        Self {
            classifier,
            window: VecDeque::with_capacity(window_len),
            window_len,
            heard_speech: false,
        }
    }

    pub fn from_config(config: &CaptureConfig, format: &AudioFormat) -> Self {
        let classifier: Box<dyn ActivityClassifier> = if config.is_adaptive() {
            Box::new(AdaptiveEnergyClassifier::new(
                config.silence_threshold,
                config.adaptive_margin,
            ))
        } else {
            Box::new(EnergyClassifier::new(config.silence_threshold))
        };
        Self::new(classifier, format.frames_covering(config.silence_duration_ms))
    }

    pub fn observe(&mut self, frame: &[f32]) -> Observation {
        let activity = self.classifier.classify(frame);

        if self.window.len() == self.window_len {
            self.window.pop_front();
        }
        self.window.push_back(activity);

        if activity == VoiceActivity::Speaking && !self.heard_speech {
            self.heard_speech = true;
            debug!("First speech frame observed");
        }

        let turn_complete = self.heard_speech
            && self.window.len() == self.window_len
            && self.window.iter().all(|a| *a == VoiceActivity::Silent);

        if turn_complete {
            info!("Silence after speech for {} frames", self.window_len);
        }

        Observation {
            activity,
            turn_complete,
        }
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.heard_speech = false;
        self.classifier.reset();
    }

    pub fn heard_speech(&self) -> bool {
        self.heard_speech
    }

    pub fn window_len(&self) -> usize {
        self.window_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector(window_len: usize) -> SilenceDetector {
        SilenceDetector::new(Box::new(EnergyClassifier::new(0.05)), window_len)
    }

    const SPEECH: [f32; 4] = [0.3, -0.3, 0.3, -0.3];
    const QUIET: [f32; 4] = [0.0; 4];

    #[test]
    fn test_silence_without_speech_never_completes() {
        let mut detector = detector(3);
        for _ in 0..100 {
            let observation = detector.observe(&QUIET);
            assert_eq!(observation.activity, VoiceActivity::Silent);
            assert!(!observation.turn_complete);
        }
        assert!(!detector.heard_speech());
    }

    #[test]
    fn test_completes_after_full_silent_window() {
        let mut detector = detector(3);
        assert!(!detector.observe(&SPEECH).turn_complete);
        assert!(!detector.observe(&QUIET).turn_complete);
        assert!(!detector.observe(&QUIET).turn_complete);
        assert!(detector.observe(&QUIET).turn_complete);
    }

    #[test]
    fn test_speech_inside_window_resets_countdown() {
        let mut detector = detector(3);
        detector.observe(&SPEECH);
        detector.observe(&QUIET);
        detector.observe(&QUIET);
        assert!(!detector.observe(&SPEECH).turn_complete);
        assert!(!detector.observe(&QUIET).turn_complete);
        assert!(!detector.observe(&QUIET).turn_complete);
        assert!(detector.observe(&QUIET).turn_complete);
    }

    #[test]
    fn test_reset_forgets_speech() {
        let mut detector = detector(2);
        detector.observe(&SPEECH);
        detector.reset();
        for _ in 0..5 {
            assert!(!detector.observe(&QUIET).turn_complete);
        }
    }

    #[test]
    fn test_window_from_config_covers_two_seconds() {
        let format = AudioFormat {
            sample_rate: 16000,
            channels: 1,
            frame_samples: 1024,
        };
        let detector = SilenceDetector::from_config(&CaptureConfig::default(), &format);
        assert_eq!(detector.window_len(), 32);
    }
}
