use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

use super::direct::{PipelineError, SpeechPipeline, Turn};
use crate::config::PipelineConfig;

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Serialize, Debug, PartialEq)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'static str,
}

/// OpenAI-compatible HTTP speech pipeline: Whisper transcription, chat
/// completion and text-to-speech.
pub struct OpenAiPipeline {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    config: PipelineConfig,
}

impl OpenAiPipeline {
    pub fn new(api_key: String, config: PipelineConfig) -> Result<Self, PipelineError> {
        if api_key.trim().is_empty() {
            return Err(PipelineError::MissingApiKey(config.api_key_env.clone()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            config,
        })
    }

    /// Reads the API key from the environment variable named in the config.
    pub fn from_env(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| PipelineError::MissingApiKey(config.api_key_env.clone()))?;
        Self::new(api_key, config.clone())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, PipelineError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        error!("Speech API error {}: {}", status, body);
        Err(PipelineError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

fn chat_messages<'a>(
    system_prompt: &'a str,
    history: &'a [Turn],
    text: &'a str,
) -> Vec<ChatMessage<'a>> {
    let mut messages = vec![ChatMessage {
        role: "system",
        content: system_prompt,
    }];
    for turn in history {
        messages.push(ChatMessage {
            role: "user",
            content: &turn.user,
        });
        messages.push(ChatMessage {
            role: "assistant",
            content: &turn.assistant,
        });
    }
    messages.push(ChatMessage {
        role: "user",
        content: text,
    });
    messages
}

#[async_trait]
impl SpeechPipeline for OpenAiPipeline {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String, PipelineError> {
        debug!("Uploading {} bytes for transcription", wav.len());

        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("recording.wav")
            .mime_str("audio/wav")?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.config.transcription_model.clone());

        let response = self
            .client
            .post(self.url("audio/transcriptions"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        let result: TranscriptionResponse = Self::check(response).await?.json().await?;

        if result.text.trim().is_empty() {
            return Err(PipelineError::Invalid("empty transcription".to_string()));
        }
        Ok(result.text)
    }

    async fn generate(&self, text: &str, history: &[Turn]) -> Result<String, PipelineError> {
        let request = ChatRequest {
            model: &self.config.chat_model,
            messages: chat_messages(&self.config.system_prompt, history, text),
        };

        let response = self
            .client
            .post(self.url("chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        let result: ChatResponse = Self::check(response).await?.json().await?;

        result
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| PipelineError::Invalid("completion had no content".to_string()))
    }

    async fn synthesize(&self, text: &str) -> Result<(String, Vec<u8>), PipelineError> {
        let request = SpeechRequest {
            model: &self.config.tts_model,
            input: text,
            voice: &self.config.voice,
            response_format: "wav",
        };

        let response = self
            .client
            .post(self.url("audio/speech"))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        let response = Self::check(response).await?;

        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("audio/wav")
            .to_string();
        let bytes = response.bytes().await?;
        debug!("Received {} bytes of synthesized speech", bytes.len());

        Ok((mime, bytes.to_vec()))
    }
}
