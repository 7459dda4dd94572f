use crate::conversation::ReasoningMarkers;
use crate::error::{Error, Result};
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const BASE_URL_ENV: &str = "PARLEY_BASE_URL";
pub const IDLE_TIMEOUT_ENV: &str = "PARLEY_IDLE_TIMEOUT_SECS";
pub const TOTAL_TIMEOUT_ENV: &str = "PARLEY_TOTAL_TIMEOUT_SECS";

/// What to do with a stream packet whose payload does not decode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MalformedPayloadPolicy {
    /// Record the error and keep reading.
    #[default]
    Skip,
    /// End the turn with an error.
    Abort,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    pub base_url: String,
    pub stream_path: String,
    pub run_tool_path: String,
    pub tool_catalog_path: String,
    pub idle_timeout_secs: u64,
    pub total_timeout_secs: u64,
    pub malformed_payload: MalformedPayloadPolicy,
    /// Open a continuation turn with the tool output after a successful call.
    pub continue_after_tool: bool,
    pub reasoning_markers: ReasoningMarkers,
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:16688".to_string(),
            stream_path: "/api/playground/message/stream".to_string(),
            run_tool_path: "/api/mcp/client/runTool".to_string(),
            tool_catalog_path: "/api/mcp/client/tools".to_string(),
            idle_timeout_secs: 60,
            total_timeout_secs: 120,
            malformed_payload: MalformedPayloadPolicy::default(),
            continue_after_tool: true,
            reasoning_markers: ReasoningMarkers::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(raw)
            .map_err(|e| Error::Configuration(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Apply `PARLEY_*` environment variables on top of the loaded values.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(base_url) = lookup(BASE_URL_ENV) {
            self.base_url = base_url;
        }
        if let Some(raw) = lookup(IDLE_TIMEOUT_ENV) {
            self.idle_timeout_secs = parse_secs(IDLE_TIMEOUT_ENV, &raw)?;
        }
        if let Some(raw) = lookup(TOTAL_TIMEOUT_ENV) {
            self.total_timeout_secs = parse_secs(TOTAL_TIMEOUT_ENV, &raw)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.base_url)
            .map_err(|e| Error::Configuration(format!("Invalid base_url {}: {e}", self.base_url)))?;
        if self.idle_timeout_secs == 0 || self.total_timeout_secs == 0 {
            return Err(Error::Configuration(
                "Timeouts must be at least one second".to_string(),
            ));
        }
        if self.reasoning_markers.open.is_empty() || self.reasoning_markers.close.is_empty() {
            return Err(Error::Configuration(
                "Reasoning markers must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn total_timeout(&self) -> Duration {
        Duration::from_secs(self.total_timeout_secs)
    }

    pub fn stream_url(&self) -> Result<Url> {
        self.endpoint_url(&self.stream_path)
    }

    pub fn run_tool_url(&self) -> Result<Url> {
        self.endpoint_url(&self.run_tool_path)
    }

    pub fn tool_catalog_url(&self) -> Result<Url> {
        self.endpoint_url(&self.tool_catalog_path)
    }

    // Paths are appended to the base URL, keeping any prefix it carries.
    fn endpoint_url(&self, path: &str) -> Result<Url> {
        let joined = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined)
            .map_err(|e| Error::Configuration(format!("Invalid endpoint URL {joined}: {e}")))
    }
}

fn parse_secs(key: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse()
        .map_err(|e| Error::Configuration(format!("{key} must be a number of seconds: {e}")))
}

/// Get the path to the config file
pub fn get_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| Error::Configuration("Could not find config directory".to_string()))?
        .join("parley");

    Ok(config_dir.join("config.toml"))
}

/// Load the configuration: `.env`, then the config file if present, then the
/// environment.
pub fn load_config() -> Result<EngineConfig> {
    dotenvy::dotenv().ok();

    let config_path = get_config_path()?;
    let config = if config_path.exists() {
        EngineConfig::load(&config_path)?
    } else {
        EngineConfig::default()
    };

    config.with_env_overrides()
}
