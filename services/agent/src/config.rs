//! Agent configuration, loaded from the environment (and `.env` if present).

use avatar_core::types::Mode;
use avatar_core::config::DEFAULT_GREETING;
use avatar_core::dialogue::DEFAULT_BASE_URL;
use secrecy::SecretString;
use std::env;
use tracing::Level;

pub const DEFAULT_ROOM: &str = "lobby";
pub const DEFAULT_IDENTITY: &str = "avatar-agent";
pub const DEFAULT_DEEPGRAM_MODEL: &str = "nova-2";
pub const DEFAULT_VOICE: &str = "aura-angus-en";
pub const DEFAULT_AUDIO_SAMPLE_RATE: u32 = 48_000;
pub const DEFAULT_AUDIO_CHANNELS: u16 = 1;

#[derive(Debug, Clone)]
pub struct Config {
    pub gateway_url: String,
    pub gateway_token: SecretString,
    pub room_name: String,
    pub agent_identity: String,
    pub deepgram_api_key: SecretString,
    pub deepgram_model: String,
    /// Format of the participant's microphone audio as delivered by the gateway.
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
    pub dialogue_api_url: String,
    pub avatar_id: String,
    pub avatar_voice: String,
    pub initial_mode: Mode,
    /// `None` when the greeting is disabled.
    pub greeting: Option<String>,
    pub record_relayed_turns: bool,
    pub log_level: Level,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
    #[error("Invalid INITIAL_MODE: {0}")]
    InvalidMode(String),
    #[error("Invalid boolean for {name}: {value}")]
    InvalidFlag { name: String, value: String },
    #[error("Invalid number for {name}: {value}")]
    InvalidNumber { name: String, value: String },
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `ROOM_GATEWAY_URL`, `ROOM_GATEWAY_TOKEN`: gateway endpoint and credential. Required.
    // *   `ROOM_NAME`, `AGENT_IDENTITY`: (Optional) room to join and the identity to join as.
    // *   `DEEPGRAM_API_KEY`: Required. `DEEPGRAM_MODEL` defaults to "nova-2".
    // *   `AUDIO_SAMPLE_RATE`, `AUDIO_CHANNELS`: (Optional) incoming audio format. Default 48000 Hz mono.
    // *   `DIALOGUE_API_URL`: (Optional) base url of the dialogue service.
    // *   `AVATAR_ID`: Required. `AVATAR_VOICE` defaults to "aura-angus-en".
    // *   `INITIAL_MODE`: (Optional) "ai" or "human". Defaults to "ai".
    // *   `GREETING`: (Optional) spoken after startup in AI mode; empty disables it.
    // *   `RECORD_RELAYED_TURNS`: (Optional) defaults to true.
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingVar(name.to_string()))
        };
        let optional = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let initial_mode = match lookup("INITIAL_MODE") {
            Some(value) => value
                .parse::<Mode>()
                .map_err(|_| ConfigError::InvalidMode(value))?,
            None => Mode::Ai,
        };

        let greeting = match lookup("GREETING") {
            Some(value) if value.trim().is_empty() => None,
            Some(value) => Some(value),
            None => Some(DEFAULT_GREETING.to_string()),
        };

        let record_relayed_turns = match lookup("RECORD_RELAYED_TURNS") {
            Some(value) => parse_flag("RECORD_RELAYED_TURNS", &value)?,
            None => true,
        };

        let audio_sample_rate = match lookup("AUDIO_SAMPLE_RATE") {
            Some(value) => parse_number("AUDIO_SAMPLE_RATE", &value)?,
            None => DEFAULT_AUDIO_SAMPLE_RATE,
        };
        let audio_channels = match lookup("AUDIO_CHANNELS") {
            Some(value) => parse_number("AUDIO_CHANNELS", &value)?,
            None => DEFAULT_AUDIO_CHANNELS,
        };

        let log_level_str = optional("RUST_LOG", "INFO");
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        Ok(Self {
            gateway_url: required("ROOM_GATEWAY_URL")?,
            gateway_token: SecretString::from(required("ROOM_GATEWAY_TOKEN")?),
            room_name: optional("ROOM_NAME", DEFAULT_ROOM),
            agent_identity: optional("AGENT_IDENTITY", DEFAULT_IDENTITY),
            deepgram_api_key: SecretString::from(required("DEEPGRAM_API_KEY")?),
            deepgram_model: optional("DEEPGRAM_MODEL", DEFAULT_DEEPGRAM_MODEL),
            audio_sample_rate,
            audio_channels,
            dialogue_api_url: optional("DIALOGUE_API_URL", DEFAULT_BASE_URL),
            avatar_id: required("AVATAR_ID")?,
            avatar_voice: optional("AVATAR_VOICE", DEFAULT_VOICE),
            initial_mode,
            greeting,
            record_relayed_turns,
            log_level,
        })
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidFlag {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_number<T>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialEq + Default,
{
    match value.trim().parse::<T>() {
        Ok(number) if number != T::default() => Ok(number),
        _ => Err(ConfigError::InvalidNumber {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}
