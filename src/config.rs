//! Configuration management with validation and defaults
//!
//! Configuration is read from an optional TOML file, then overridden by
//! `WANCHAT_*` environment variables, then validated as a whole.

use crate::errors::{ConfigurationError, WanchatResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Complete room configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WanchatConfig {
    pub server: ServerConfig,
    pub economy: EconomyConfig,
    pub games: GamesConfig,
    pub appraisal: AppraisalConfig,
    pub generator: GeneratorConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// HTTP / WebSocket listener settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    /// Delay between the shutdown broadcast and the event loop exiting
    pub shutdown_grace_ms: u64,
    /// Capacity of the broadcast fan-out channel
    pub broadcast_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            allowed_origins: vec!["*".to_string()],
            shutdown_grace_ms: 1000,
            broadcast_capacity: 1024,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomyConfig {
    /// Balance a user receives the first time they are looked up
    pub starting_balance: u64,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            starting_balance: 20,
        }
    }
}

/// Timing knobs for the four mini-games
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GamesConfig {
    pub wager_window_secs: u64,
    pub race_tick_ms: u64,
    pub drag_window_secs: u64,
    pub drag_countdown_secs: u32,
    pub drag_tick_ms: u64,
    pub snake_base_tick_ms: u64,
    pub snake_min_tick_ms: u64,
    pub snake_tick_step_ms: u64,
}

impl Default for GamesConfig {
    fn default() -> Self {
        Self {
            wager_window_secs: 30,
            race_tick_ms: 150,
            drag_window_secs: 45,
            drag_countdown_secs: 3,
            drag_tick_ms: 100,
            snake_base_tick_ms: 150,
            snake_min_tick_ms: 80,
            snake_tick_step_ms: 2,
        }
    }
}

impl GamesConfig {
    pub fn wager_window(&self) -> Duration {
        Duration::from_secs(self.wager_window_secs)
    }

    pub fn race_tick(&self) -> Duration {
        Duration::from_millis(self.race_tick_ms)
    }

    pub fn drag_window(&self) -> Duration {
        Duration::from_secs(self.drag_window_secs)
    }

    pub fn drag_tick(&self) -> Duration {
        Duration::from_millis(self.drag_tick_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppraisalConfig {
    /// Fee as a percentage of the catalog price
    pub fee_percent: u64,
    pub min_fee: u64,
    pub min_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for AppraisalConfig {
    fn default() -> Self {
        Self {
            fee_percent: 5,
            min_fee: 10,
            min_delay_secs: 30,
            max_delay_secs: 60,
        }
    }
}

impl AppraisalConfig {
    pub fn fee_for(&self, price: u64) -> u64 {
        (price.saturating_mul(self.fee_percent) / 100).max(self.min_fee)
    }
}

/// External text-generation service (Ollama compatible)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub enabled: bool,
    pub url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub temperature: f32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://127.0.0.1:11434/api/generate".to_string(),
            model: "deepseek-r1:8b".to_string(),
            timeout_secs: 60,
            temperature: 1.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "wanchat=info,tower_http=info".to_string(),
        }
    }
}

/// Configuration loader with environment variable support
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> WanchatResult<WanchatConfig> {
        let mut config = match self.config_path {
            Some(ref path) => self.load_from_file(path)?,
            None => WanchatConfig::default(),
        };

        self.apply_env_overrides(&mut config)?;
        self.validate(&config)?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> WanchatResult<WanchatConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e))
        })?;

        toml::from_str(&content)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)).into())
    }

    fn apply_env_overrides(&self, config: &mut WanchatConfig) -> WanchatResult<()> {
        if let Ok(host) = env::var("WANCHAT_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = env::var("WANCHAT_PORT") {
            config.server.port = parse_env("WANCHAT_PORT", port, "Invalid port number")?;
        }
        if let Ok(dir) = env::var("WANCHAT_DATA_DIR") {
            config.storage.data_dir = dir;
        }
        if let Ok(balance) = env::var("WANCHAT_STARTING_BALANCE") {
            config.economy.starting_balance =
                parse_env("WANCHAT_STARTING_BALANCE", balance, "Invalid balance")?;
        }
        if let Ok(url) = env::var("WANCHAT_GENERATOR_URL") {
            config.generator.url = url;
            config.generator.enabled = true;
        }
        if let Ok(enabled) = env::var("WANCHAT_GENERATOR_ENABLED") {
            config.generator.enabled =
                parse_env("WANCHAT_GENERATOR_ENABLED", enabled, "Invalid boolean value")?;
        }
        Ok(())
    }

    /// Validate a configuration
    pub fn validate(&self, config: &WanchatConfig) -> WanchatResult<()> {
        if config.server.port == 0 {
            return Err(ConfigurationError::ValidationFailed("server.port must be non-zero".into()).into());
        }
        if config.server.broadcast_capacity == 0 {
            return Err(ConfigurationError::ValidationFailed(
                "server.broadcast_capacity must be non-zero".into(),
            )
            .into());
        }
        let games = &config.games;
        if games.race_tick_ms == 0 || games.drag_tick_ms == 0 || games.snake_min_tick_ms == 0 {
            return Err(ConfigurationError::ValidationFailed("tick intervals must be non-zero".into()).into());
        }
        if games.snake_min_tick_ms > games.snake_base_tick_ms {
            return Err(ConfigurationError::ValidationFailed(
                "games.snake_min_tick_ms exceeds games.snake_base_tick_ms".into(),
            )
            .into());
        }
        if config.appraisal.min_delay_secs > config.appraisal.max_delay_secs {
            return Err(ConfigurationError::ValidationFailed(
                "appraisal.min_delay_secs exceeds appraisal.max_delay_secs".into(),
            )
            .into());
        }
        if config.appraisal.fee_percent > 100 {
            return Err(ConfigurationError::InvalidValue {
                field: "appraisal.fee_percent".into(),
                value: config.appraisal.fee_percent.to_string(),
                reason: "must be at most 100".into(),
            }
            .into());
        }
        if config.generator.enabled && config.generator.url.is_empty() {
            return Err(ConfigurationError::ValidationFailed(
                "generator.url is required when the generator is enabled".into(),
            )
            .into());
        }
        Ok(())
    }

    /// Write a configuration as TOML
    pub fn save(&self, config: &WanchatConfig, path: &str) -> WanchatResult<()> {
        let content = toml::to_string_pretty(config)
            .map_err(|e| ConfigurationError::SaveFailed(e.to_string()))?;
        std::fs::write(path, content)
            .map_err(|e| ConfigurationError::SaveFailed(format!("Failed to write {}: {}", path, e)))?;
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(field: &str, value: String, reason: &str) -> WanchatResult<T> {
    value.parse().map_err(|_| {
        ConfigurationError::InvalidValue {
            field: field.to_string(),
            value,
            reason: reason.to_string(),
        }
        .into()
    })
}
