//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - A local `.env` file loaded at startup (see `main.rs`)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, DEEPGRAM_API_KEY, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! The one required secret is the Deepgram API credential. It intentionally
//! defaults to a placeholder: a missing credential is a configuration error,
//! not a runtime fault, and must never crash a session (the transcription
//! link refuses to connect instead).

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Placeholder value for an unset Deepgram API key.
/// Matches the value users see in setup instructions, so a copy-pasted
/// template config is detected as "not configured" rather than sent upstream.
pub const PLACEHOLDER_API_KEY: &str = "YOUR_DEEPGRAM_API_KEY_HERE";

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub deepgram: DeepgramConfig,
}

/// HTTP/WebSocket listener settings.
///
/// ## Fields:
/// - `host`: IP address to bind to (`127.0.0.1` for development, `0.0.0.0` in production)
/// - `port`: TCP port to listen on
/// - `stream_path`: URL path Twilio Media Streams connect to (fixed configuration,
///   not a protocol concern of the bridge itself)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub stream_path: String,
}

/// Settings for the outbound connection to the Deepgram transcription service.
///
/// ## Fixed audio parameters:
/// Twilio Media Streams carry 8kHz mono mu-law audio, so `encoding`,
/// `sample_rate` and `channels` are hardcoded in [`DeepgramConfig::listen_url`]
/// rather than configurable — changing them would only break transcription.
///
/// ## Tunable fields:
/// - `api_key`: bearer credential, carried as an `Authorization: Token ...` header
/// - `endpoint`: the listen endpoint (ws:// allowed for local mocks)
/// - `model` / `language`: transcription model selection
/// - `utterance_end_ms`: silence gap after which Deepgram emits UtteranceEnd
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepgramConfig {
    pub api_key: String,
    pub endpoint: String,
    pub model: String,
    pub language: String,
    pub utterance_end_ms: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 5001,
                stream_path: "/media".to_string(),
            },
            deepgram: DeepgramConfig {
                api_key: PLACEHOLDER_API_KEY.to_string(),
                endpoint: "wss://api.deepgram.com/v1/listen".to_string(),
                model: "nova-2".to_string(),
                language: "en-US".to_string(),
                utterance_end_ms: 1000,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST, PORT and DEEPGRAM_API_KEY
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER_HOST=0.0.0.0`: Override server host
    /// - `APP_DEEPGRAM_MODEL=nova-2`: Override transcription model
    /// - `DEEPGRAM_API_KEY=...`: The credential, in the name Deepgram's own
    ///   docs use (and the name the `.env` file carries)
    /// - `HOST` / `PORT`: Special cases for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Well-known variables that don't follow the APP_ prefix convention.
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(key) = env::var("DEEPGRAM_API_KEY") {
            settings = settings.set_override("deepgram.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Note that a placeholder API key is deliberately *not* a validation
    /// failure: the server must start and serve its HTTP surface either way,
    /// and the transcription link handles the missing credential per session.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if !self.server.stream_path.starts_with('/') {
            return Err(anyhow::anyhow!("Stream path must start with '/'"));
        }

        if !self.deepgram.endpoint.starts_with("wss://") && !self.deepgram.endpoint.starts_with("ws://") {
            return Err(anyhow::anyhow!("Deepgram endpoint must be a ws:// or wss:// URL"));
        }

        if self.deepgram.utterance_end_ms == 0 {
            return Err(anyhow::anyhow!("utterance_end_ms must be greater than 0"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// ## Partial updates:
    /// Only the fields present in the JSON are changed; for example
    /// `{"deepgram": {"model": "nova-2"}}` updates just the model.
    ///
    /// The API key is intentionally not updatable this way — the credential is
    /// process configuration, sourced from the environment at startup only.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;
            }
        }

        if let Some(deepgram) = partial_config.get("deepgram") {
            if let Some(model) = deepgram.get("model").and_then(|v| v.as_str()) {
                self.deepgram.model = model.to_string();
            }
            if let Some(language) = deepgram.get("language").and_then(|v| v.as_str()) {
                self.deepgram.language = language.to_string();
            }
            if let Some(ms) = deepgram.get("utterance_end_ms").and_then(|v| v.as_u64()) {
                self.deepgram.utterance_end_ms = ms as u32;
            }
        }

        self.validate()?;
        Ok(())
    }
}

impl DeepgramConfig {
    /// Whether a real credential has been supplied.
    ///
    /// An empty or placeholder key means "not configured": the transcription
    /// link logs the problem and stays disconnected instead of sending a
    /// doomed handshake upstream.
    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && self.api_key != PLACEHOLDER_API_KEY
    }

    /// Build the full listen URL with the query parameters the bridge requires.
    ///
    /// Twilio sends mu-law audio at 8000Hz mono, so the encoding parameters are
    /// fixed. Interim results, punctuation, smart formatting and VAD events are
    /// enabled; diarization and multichannel are not useful for a single call
    /// leg and stay off.
    pub fn listen_url(&self) -> String {
        format!(
            "{}?model={}&language={}\
             &encoding=mulaw&sample_rate=8000&channels=1\
             &interim_results=true&punctuate=true&smart_format=true\
             &diarize=false&multichannel=false\
             &utterance_end_ms={}&vad_events=true",
            self.endpoint, self.model, self.language, self.utterance_end_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 5001);
        assert_eq!(config.server.stream_path, "/media");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_credentials_are_placeholder() {
        let config = AppConfig::default();
        assert!(!config.deepgram.has_credentials());

        let mut configured = config.clone();
        configured.deepgram.api_key = "dg_secret_token".to_string();
        assert!(configured.deepgram.has_credentials());

        let mut empty = config;
        empty.deepgram.api_key = String::new();
        assert!(!empty.deepgram.has_credentials());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.server.stream_path = "media".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.deepgram.endpoint = "https://api.deepgram.com/v1/listen".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_listen_url_parameters() {
        let config = AppConfig::default();
        let url = config.deepgram.listen_url();

        assert!(url.starts_with("wss://api.deepgram.com/v1/listen?"));
        assert!(url.contains("encoding=mulaw"));
        assert!(url.contains("sample_rate=8000"));
        assert!(url.contains("channels=1"));
        assert!(url.contains("interim_results=true"));
        assert!(url.contains("punctuate=true"));
        assert!(url.contains("smart_format=true"));
        assert!(url.contains("diarize=false"));
        assert!(url.contains("multichannel=false"));
        assert!(url.contains("utterance_end_ms=1000"));
        assert!(url.contains("vad_events=true"));
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"deepgram": {"model": "nova-3", "language": "en-GB"}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.deepgram.model, "nova-3");
        assert_eq!(config.deepgram.language, "en-GB");
        // Untouched fields keep their values, including the credential.
        assert_eq!(config.deepgram.api_key, PLACEHOLDER_API_KEY);
        assert_eq!(config.server.port, 5001);
    }

    #[test]
    fn test_config_update_rejects_invalid() {
        let mut config = AppConfig::default();
        let json = r#"{"server": {"port": 0}}"#;
        assert!(config.update_from_json(json).is_err());
    }
}
