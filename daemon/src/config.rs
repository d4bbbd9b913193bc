use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub sounds: SoundsConfig,
    #[serde(default)]
    pub button: ButtonConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub control: ControlConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
    /// Samples per frame handed to the silence detector.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,
    /// Input endpoints in priority order; "default" is the host default.
    #[serde(default = "default_devices")]
    pub input_devices: Vec<String>,
    #[serde(default = "default_devices")]
    pub output_devices: Vec<String>,
    #[serde(default = "default_max_volume")]
    pub max_volume: f32,
    #[serde(default = "default_frame_timeout_ms")]
    pub frame_timeout_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            chunk_size: default_chunk_size(),
            input_devices: default_devices(),
            output_devices: default_devices(),
            max_volume: default_max_volume(),
            frame_timeout_ms: default_frame_timeout_ms(),
        }
    }
}

fn default_sample_rate() -> u32 {
    16000
}
fn default_channels() -> u16 {
    1
}
fn default_chunk_size() -> u32 {
    1024
}
fn default_devices() -> Vec<String> {
    vec!["default".to_string()]
}
fn default_max_volume() -> f32 {
    1.0
}
fn default_frame_timeout_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CaptureConfig {
    #[serde(default = "default_max_duration_ms")]
    pub max_duration_ms: u64,
    #[serde(default = "default_silence_duration_ms")]
    pub silence_duration_ms: u64,
    #[serde(default = "default_min_recording_ms")]
    pub min_recording_ms: u64,
    /// "energy" (fixed RMS threshold) or "adaptive" (tracks the noise floor).
    #[serde(default = "default_detector")]
    pub detector: String,
    #[serde(default = "default_silence_threshold")]
    pub silence_threshold: f32,
    #[serde(default = "default_adaptive_margin")]
    pub adaptive_margin: f32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_duration_ms: default_max_duration_ms(),
            silence_duration_ms: default_silence_duration_ms(),
            min_recording_ms: default_min_recording_ms(),
            detector: default_detector(),
            silence_threshold: default_silence_threshold(),
            adaptive_margin: default_adaptive_margin(),
        }
    }
}

fn default_max_duration_ms() -> u64 {
    30_000
}
fn default_silence_duration_ms() -> u64 {
    2000
}
fn default_min_recording_ms() -> u64 {
    300
}
fn default_detector() -> String {
    "energy".to_string()
}
fn default_silence_threshold() -> f32 {
    0.03
}
fn default_adaptive_margin() -> f32 {
    3.0
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RelayConfig {
    /// "direct" calls the speech APIs from the device, "relayed" hands
    /// recordings to a companion peer over WebSocket.
    #[serde(default = "default_relay_mode")]
    pub mode: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_relay_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_ping_interval")]
    pub ping_interval_seconds: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            mode: default_relay_mode(),
            host: default_host(),
            port: default_port(),
            timeout_seconds: default_relay_timeout(),
            ping_interval_seconds: default_ping_interval(),
        }
    }
}

fn default_relay_mode() -> String {
    "relayed".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8765
}
fn default_relay_timeout() -> u64 {
    30
}
fn default_ping_interval() -> u64 {
    20
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PipelineConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_tts_model")]
    pub tts_model: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key_env: default_api_key_env(),
            transcription_model: default_transcription_model(),
            chat_model: default_chat_model(),
            tts_model: default_tts_model(),
            voice: default_voice(),
            system_prompt: default_system_prompt(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_transcription_model() -> String {
    "whisper-1".to_string()
}
fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_tts_model() -> String {
    "tts-1".to_string()
}
fn default_voice() -> String {
    "alloy".to_string()
}
fn default_system_prompt() -> String {
    "You are Polly, a talking parrot. Answer in one or two short, friendly sentences.".to_string()
}
fn default_request_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SoundsConfig {
    /// Holds `immediate_*.wav` feedback sounds and `fallback_*.wav` phrases.
    #[serde(default = "default_sounds_dir")]
    pub dir: PathBuf,
}

impl Default for SoundsConfig {
    fn default() -> Self {
        Self {
            dir: default_sounds_dir(),
        }
    }
}

fn default_sounds_dir() -> PathBuf {
    PathBuf::from("audio/responses")
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ButtonConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    200
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RateLimitConfig {
    #[serde(default = "default_commands_per_second")]
    pub commands_per_second: u32,
    #[serde(default = "default_burst_capacity")]
    pub burst_capacity: u32,
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            commands_per_second: default_commands_per_second(),
            burst_capacity: default_burst_capacity(),
            enabled: default_rate_limit_enabled(),
        }
    }
}

fn default_commands_per_second() -> u32 {
    10
}
fn default_burst_capacity() -> u32 {
    20
}
fn default_rate_limit_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ControlConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
        }
    }
}

fn default_socket_path() -> PathBuf {
    match dirs::runtime_dir() {
        Some(runtime_dir) => runtime_dir.join("pollyd.sock"),
        None => PathBuf::from("/tmp/pollyd.sock"),
    }
}

impl CaptureConfig {
    pub fn is_adaptive(&self) -> bool {
        self.detector == "adaptive"
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            anyhow::bail!("audio.sample_rate must be non-zero");
        }
        if self.audio.channels == 0 {
            anyhow::bail!("audio.channels must be non-zero");
        }
        if self.audio.chunk_size == 0 {
            anyhow::bail!("audio.chunk_size must be non-zero");
        }
        if self.audio.input_devices.is_empty() {
            anyhow::bail!("audio.input_devices must list at least one device");
        }
        if self.audio.output_devices.is_empty() {
            anyhow::bail!("audio.output_devices must list at least one device");
        }
        if !(0.0..=1.0).contains(&self.audio.max_volume) {
            anyhow::bail!("audio.max_volume must be between 0.0 and 1.0");
        }
        if self.capture.max_duration_ms < self.capture.silence_duration_ms {
            anyhow::bail!(
                "capture.max_duration_ms ({}) is shorter than capture.silence_duration_ms ({})",
                self.capture.max_duration_ms,
                self.capture.silence_duration_ms
            );
        }
        if self.capture.max_duration_ms < self.capture.min_recording_ms {
            anyhow::bail!(
                "capture.max_duration_ms ({}) is shorter than capture.min_recording_ms ({})",
                self.capture.max_duration_ms,
                self.capture.min_recording_ms
            );
        }
        match self.capture.detector.as_str() {
            "energy" | "adaptive" => {}
            other => anyhow::bail!("Unknown capture.detector '{}': use energy or adaptive", other),
        }
        match self.relay.mode.as_str() {
            "direct" | "relayed" => {}
            other => anyhow::bail!("Unknown relay.mode '{}': use direct or relayed", other),
        }
        if self.relay.timeout_seconds == 0 {
            anyhow::bail!("relay.timeout_seconds must be non-zero");
        }
        if self.rate_limit.enabled
            && (self.rate_limit.commands_per_second == 0 || self.rate_limit.burst_capacity == 0)
        {
            anyhow::bail!("rate_limit values must be non-zero when rate limiting is enabled");
        }
        Ok(())
    }
}

pub fn load_config() -> Result<Config> {
    load_config_from(&get_config_path()?)
}

pub fn load_config_from(config_path: &std::path::Path) -> Result<Config> {
    if !config_path.exists() {
        tracing::info!("Config file not found at {:?}, using defaults", config_path);
        return Ok(Config::default());
    }

    tracing::info!("Loading config from {:?}", config_path);
    let config_str = std::fs::read_to_string(config_path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

    let config: Config = toml::from_str(&config_str)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))?;

    config.validate()?;

    tracing::info!("Config loaded successfully");
    Ok(config)
}

fn get_config_path() -> Result<PathBuf> {
    let dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Failed to get config directory"))?;
    Ok(dir.join("polly").join("config.toml"))
}
