use crate::cache::CacheConfig;
use crate::channel::ChannelConfig;
use crate::polling::PollConfig;
use crate::retry::RetryOptions;
use crate::sync::SyncConfig;
use std::env;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid URL in {var}: {reason}")]
    InvalidUrl { var: String, reason: String },
    #[error("Unsupported scheme '{scheme}' in {var} (expected {expected})")]
    BadScheme {
        var: String,
        scheme: String,
        expected: String,
    },
}

impl From<ConfigError> for crate::error::SyncError {
    fn from(err: ConfigError) -> Self {
        crate::error::SyncError::Config(err.to_string())
    }
}

/// Everything the client needs wired at startup. Tunables default to the
/// values the backend is deployed with; base URLs come from the
/// environment.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// HTTP API root, e.g. `http://localhost:8000`.
    pub api_base: String,
    /// WebSocket root, e.g. `ws://localhost:8000/ws`.
    pub ws_base: String,
    pub channel: ChannelConfig,
    pub retry: RetryOptions,
    pub poll: PollConfig,
    pub sync: SyncConfig,
    pub cache: CacheConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8000".to_string(),
            ws_base: "ws://localhost:8000/ws".to_string(),
            channel: ChannelConfig::default(),
            retry: RetryOptions::default(),
            poll: PollConfig::default(),
            sync: SyncConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration, letting `SYNC_API_BASE` / `SYNC_WS_BASE`
    /// override the defaults. Reads a `.env` file when present (for
    /// development).
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Don't error if .env doesn't exist

        let mut config = Self::default();
        if let Ok(api_base) = env::var("SYNC_API_BASE") {
            config.api_base = api_base;
        }
        if let Ok(ws_base) = env::var("SYNC_WS_BASE") {
            config.ws_base = ws_base;
        }

        Self::validate_base(&config.api_base, "SYNC_API_BASE", &["http", "https"])?;
        Self::validate_base(&config.ws_base, "SYNC_WS_BASE", &["ws", "wss"])?;
        Ok(config)
    }

    /// Channel address for one file's processing stream.
    pub fn processing_channel_url(&self, file_id: &str) -> String {
        format!("{}/{}", self.ws_base.trim_end_matches('/'), file_id)
    }

    fn validate_base(value: &str, var: &str, schemes: &[&str]) -> Result<(), ConfigError> {
        let url = Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
            var: var.to_string(),
            reason: e.to_string(),
        })?;
        if !schemes.contains(&url.scheme()) {
            return Err(ConfigError::BadScheme {
                var: var.to_string(),
                scheme: url.scheme().to_string(),
                expected: schemes.join("/"),
            });
        }
        Ok(())
    }
}

/// Load configuration with helpful error messages for development.
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    match ClientConfig::load() {
        Ok(config) => {
            log::info!(
                "Loaded configuration (api: {}, ws: {})",
                config.api_base,
                config.ws_base
            );
            Ok(config)
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            log::error!("Set SYNC_API_BASE (http/https) and SYNC_WS_BASE (ws/wss), e.g.:");
            log::error!("SYNC_API_BASE=http://localhost:8000");
            log::error!("SYNC_WS_BASE=ws://localhost:8000/ws");
            Err(e)
        }
    }
}
