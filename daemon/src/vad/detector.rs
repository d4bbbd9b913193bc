use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceActivity {
    Speaking,
    Silent,
}

/// Per-frame speech/silence decision. Implementations may keep state across
/// frames; `reset` is called at the start of every capture.
pub trait ActivityClassifier: Send {
    fn classify(&mut self, frame: &[f32]) -> VoiceActivity;

    fn reset(&mut self) {}

    fn name(&self) -> &'static str;
}

/// Root mean square of a frame in [-1.0, 1.0].
pub fn frame_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Frames louder than a fixed RMS threshold are speech.
pub struct EnergyClassifier {
    threshold: f32,
}

impl EnergyClassifier {
    pub fn new(threshold: f32) -> Self {
        info!("Energy classifier initialized with threshold: {}", threshold);
        Self { threshold }
    }
}

impl ActivityClassifier for EnergyClassifier {
    fn classify(&mut self, frame: &[f32]) -> VoiceActivity {
        let level = frame_rms(frame);
        let activity = if level >= self.threshold {
            VoiceActivity::Speaking
        } else {
            VoiceActivity::Silent
        };

        debug!(
            "Audio level: {:.4}, threshold: {:.4}, activity: {:?}",
            level, self.threshold, activity
        );
        activity
    }

    fn name(&self) -> &'static str {
        "energy"
    }
}

/// Tracks the background noise floor from silent frames and treats frames
/// louder than `margin` times the floor as speech. `min_threshold` keeps a
/// near-silent room from making every breath count as speech.
pub struct AdaptiveEnergyClassifier {
    min_threshold: f32,
    margin: f32,
    noise_floor: Option<f32>,
}

/// Weight of a new silent frame in the running noise-floor average.
const FLOOR_SMOOTHING: f32 = 0.05;

impl AdaptiveEnergyClassifier {
    pub fn new(min_threshold: f32, margin: f32) -> Self {
        info!(
            "Adaptive classifier initialized: min_threshold={:.4}, margin={:.1}",
            min_threshold, margin
        );
        Self {
            min_threshold,
            margin,
            noise_floor: None,
        }
    }

    pub fn threshold(&self) -> f32 {
        match self.noise_floor {
            Some(floor) => (floor * self.margin).max(self.min_threshold),
            None => self.min_threshold,
        }
    }
}

impl ActivityClassifier for AdaptiveEnergyClassifier {
    fn classify(&mut self, frame: &[f32]) -> VoiceActivity {
        let level = frame_rms(frame);
        let threshold = self.threshold();

        if level >= threshold {
            debug!("Audio level: {:.4} above adaptive threshold {:.4}", level, threshold);
            return VoiceActivity::Speaking;
        }

        self.noise_floor = Some(match self.noise_floor {
            Some(floor) if level < floor => level,
            Some(floor) => floor + FLOOR_SMOOTHING * (level - floor),
            None => level,
        });
        VoiceActivity::Silent
    }

    fn reset(&mut self) {
        self.noise_floor = None;
    }

    fn name(&self) -> &'static str {
        "adaptive"
    }
}
