use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use super::{RelayError, ResponseRelay};
use crate::audio::AudioClip;
use crate::session::Recording;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("API key not set: export {0}")]
    MissingApiKey(String),

    #[error("{0}")]
    Invalid(String),
}

/// One earlier exchange handed to the language model as context.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub user: String,
    pub assistant: String,
}

/// Transcription, reply generation and speech synthesis. Each stage fails
/// independently.
#[async_trait]
pub trait SpeechPipeline: Send + Sync {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String, PipelineError>;

    async fn generate(&self, text: &str, history: &[Turn]) -> Result<String, PipelineError>;

    /// Returns the audio mime type and bytes.
    async fn synthesize(&self, text: &str) -> Result<(String, Vec<u8>), PipelineError>;
}

/// Calls the speech pipeline from the device, one stage after another.
pub struct DirectRelay {
    pipeline: Arc<dyn SpeechPipeline>,
    timeout: Duration,
}

impl DirectRelay {
    pub fn new(pipeline: Arc<dyn SpeechPipeline>, timeout: Duration) -> Self {
        Self { pipeline, timeout }
    }

    async fn round_trip(&self, recording: Recording) -> Result<AudioClip, RelayError> {
        let wav = recording
            .to_wav_bytes()
            .map_err(|e| RelayError::TranscriptionFailed(e.to_string()))?;
        drop(recording);

        let raw = self
            .pipeline
            .transcribe(wav)
            .await
            .map_err(|e| RelayError::TranscriptionFailed(e.to_string()))?;
        let text = post_process_transcription(&raw);
        if text.is_empty() {
            return Err(RelayError::TranscriptionFailed(
                "no speech recognised".to_string(),
            ));
        }
        info!("Heard: '{}'", text);

        // conversation history is not kept between turns
        let reply = self
            .pipeline
            .generate(&text, &[])
            .await
            .map_err(|e| RelayError::GenerationFailed(e.to_string()))?;
        info!("Reply: '{}'", reply);

        let (mime, bytes) = self
            .pipeline
            .synthesize(&reply)
            .await
            .map_err(|e| RelayError::SynthesisFailed(e.to_string()))?;
        debug!("Synthesized {} bytes of {}", bytes.len(), mime);

        AudioClip::decode(&mime, &bytes).map_err(|e| RelayError::SynthesisFailed(e.to_string()))
    }
}

#[async_trait]
impl ResponseRelay for DirectRelay {
    async fn process(&self, recording: Recording) -> Result<AudioClip, RelayError> {
        match tokio::time::timeout(self.timeout, self.round_trip(recording)).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::Timeout(self.timeout)),
        }
    }

    fn mode(&self) -> &'static str {
        "direct"
    }
}

/// Trims, collapses repeated words and strips bracketed annotations such
/// as `[BLANK_AUDIO]` or `(music)` from a transcript.
pub fn post_process_transcription(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut deduped_words: Vec<&str> = Vec::new();
    for word in words {
        if deduped_words.last() != Some(&word) {
            deduped_words.push(word);
        }
    }
    let mut text = deduped_words.join(" ");

    if let Ok(re) = Regex::new(r"\[.*?\]|\{.*?\}|\(.*?\)") {
        text = re.replace_all(&text, "").to_string();
    }
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");

    debug!("Post-processed transcript: '{}'", text);
    text
}
