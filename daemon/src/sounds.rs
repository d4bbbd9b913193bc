use rand::seq::SliceRandom;
use std::path::Path;
use tracing::{info, warn};

use crate::audio::AudioClip;

const IMMEDIATE_PREFIX: &str = "immediate_";
const FALLBACK_PREFIX: &str = "fallback_";
const TONE_SAMPLE_RATE: u32 = 16000;

/// Pre-recorded feedback and fallback phrases. When a category has no
/// files a short tone stands in, so a turn is never silent.
#[derive(Debug, Clone, Default)]
pub struct SoundBank {
    immediate: Vec<AudioClip>,
    fallback: Vec<AudioClip>,
}

impl SoundBank {
    pub fn new(immediate: Vec<AudioClip>, fallback: Vec<AudioClip>) -> Self {
        Self {
            immediate,
            fallback,
        }
    }

    /// Loads `immediate_*.wav` and `fallback_*.wav` from `dir`. Unreadable
    /// files are skipped with a warning.
    pub fn load(dir: &Path) -> Self {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Sound directory {:?} unavailable: {}", dir, e);
                return Self::default();
            }
        };

        let mut paths: Vec<_> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("wav")))
            .collect();
        paths.sort();

        let mut bank = Self::default();
        for path in paths {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let target = if name.starts_with(IMMEDIATE_PREFIX) {
                &mut bank.immediate
            } else if name.starts_with(FALLBACK_PREFIX) {
                &mut bank.fallback
            } else {
                continue;
            };

            match AudioClip::load_wav(&path) {
                Ok(clip) => target.push(clip),
                Err(e) => warn!("Skipping sound {:?}: {}", path, e),
            }
        }

        info!(
            "Loaded {} immediate and {} fallback sounds from {:?}",
            bank.immediate.len(),
            bank.fallback.len(),
            dir
        );
        bank
    }

    pub fn immediate_count(&self) -> usize {
        self.immediate.len()
    }

    pub fn fallback_count(&self) -> usize {
        self.fallback.len()
    }

    pub fn immediate(&self) -> AudioClip {
        self.immediate
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(|| AudioClip::tone(880.0, 120, TONE_SAMPLE_RATE))
    }

    pub fn fallback(&self) -> AudioClip {
        self.fallback
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(|| AudioClip::tone(330.0, 400, TONE_SAMPLE_RATE))
    }
}
