//! Hands a finished recording to whatever produces the spoken reply:
//! speech APIs called from the device ([`DirectRelay`]) or a companion peer
//! connected over WebSocket ([`RelayedRelay`]).

pub mod direct;
pub mod hub;
pub mod openai;
pub mod ws;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::audio::AudioClip;
use crate::session::Recording;

pub use direct::{DirectRelay, PipelineError, SpeechPipeline, Turn};
pub use hub::{RelayHub, RelayedRelay};
pub use openai::OpenAiPipeline;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelayError {
    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("Reply generation failed: {0}")]
    GenerationFailed(String),

    #[error("Speech synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("No reply within {0:?}")]
    Timeout(Duration),
}

/// Out-of-band news from the relay that does not answer a request.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    Info(String),
    PeerError(String),
    PeerConnected,
    PeerDisconnected,
}

#[async_trait]
pub trait ResponseRelay: Send + Sync {
    /// Turns one recording into reply audio. Failures are never retried here.
    async fn process(&self, recording: Recording) -> Result<AudioClip, RelayError>;

    /// Status updates for the controller's log, if this relay produces any.
    fn status_updates(&self) -> Option<broadcast::Receiver<StatusUpdate>> {
        None
    }

    fn peer_connected(&self) -> bool {
        false
    }

    fn mode(&self) -> &'static str;
}
