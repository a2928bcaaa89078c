use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Result, VchatError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub switch: SwitchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_prefix: String,
    pub request_timeout_secs: u64,
    /// Environment variable holding the bearer token, read per request
    pub auth_token_env: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_prefix: "/api".to_string(),
            request_timeout_secs: 60,
            auth_token_env: "VCHAT_AUTH_TOKEN".to_string(),
        }
    }
}

impl GatewayConfig {
    pub fn api_base(&self) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            self.api_prefix.trim_end_matches('/')
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2048,
            stream: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchConfig {
    pub poll_interval_ms: u64,
    pub timeout_secs: u64,
    /// Consecutive failed status queries before giving up
    pub max_poll_failures: u32,
    /// Polls still reporting another profile `running` without ever showing
    /// `switching` before the switch is treated as refused
    pub max_unchanged_polls: u32,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3000,
            timeout_secs: 300,
            max_poll_failures: 5,
            max_unchanged_polls: 3,
        }
    }
}

impl SwitchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ClientConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Defaults plus `VCHAT_*` overrides from the environment and `.env`
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup("VCHAT_BASE_URL") {
            self.gateway.base_url = url;
        }
        if let Some(v) = lookup("VCHAT_TEMPERATURE") {
            self.generation.temperature = parse_var("VCHAT_TEMPERATURE", &v)?;
        }
        if let Some(v) = lookup("VCHAT_MAX_TOKENS") {
            self.generation.max_tokens = parse_var("VCHAT_MAX_TOKENS", &v)?;
        }
        if let Some(v) = lookup("VCHAT_STREAM") {
            self.generation.stream = parse_var("VCHAT_STREAM", &v)?;
        }
        if let Some(v) = lookup("VCHAT_POLL_INTERVAL_MS") {
            self.switch.poll_interval_ms = parse_var("VCHAT_POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("VCHAT_SWITCH_TIMEOUT_SECS") {
            self.switch.timeout_secs = parse_var("VCHAT_SWITCH_TIMEOUT_SECS", &v)?;
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| VchatError::Config(format!("invalid value for {}: '{}'", key, value)))
}
