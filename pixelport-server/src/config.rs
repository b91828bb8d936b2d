// Copyright 2025 Pixelport (https://github.com/pixelport)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use pixelport_cache::CacheConfig;
use pixelport_store::StoreConfig;

/// Pixelport server configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: HttpServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpServerConfig {
    /// HTTP API listen address (e.g., "127.0.0.1:8200")
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Server name reported in error envelopes
    #[serde(default = "default_server_name")]
    pub name: String,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Enable CORS
    #[serde(default = "default_enable_cors")]
    pub enable_cors: bool,

    /// Maintenance mode: mutating routes return 503 with a retry hint
    #[serde(default)]
    pub maintenance: bool,

    /// Retry-after hint (seconds) reported while in maintenance
    #[serde(default = "default_maintenance_retry_secs")]
    pub maintenance_retry_secs: u64,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            name: default_server_name(),
            request_timeout_secs: default_request_timeout(),
            enable_cors: default_enable_cors(),
            maintenance: false,
            maintenance_retry_secs: default_maintenance_retry_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Token lifetime in seconds
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,

    /// Bootstrap admin credentials, created on first start
    #[serde(default = "default_admin_user")]
    pub admin_user: String,
    #[serde(default = "default_admin_password")]
    pub admin_password: String,

    /// Rate limit for the token endpoint
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: default_token_ttl(),
            admin_user: default_admin_user(),
            admin_password: default_admin_password(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,

    /// Maximum requests per window per client
    #[serde(default = "default_rate_limit_max_requests")]
    pub max_requests: u32,

    /// Window in seconds
    #[serde(default = "default_rate_limit_window_secs")]
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: default_rate_limit_max_requests(),
            window_secs: default_rate_limit_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImportConfig {
    /// Seconds between import sweeps; zero disables the worker
    #[serde(default = "default_import_interval")]
    pub interval_secs: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_import_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PromptConfig {
    /// AI service endpoint
    #[serde(default = "default_ai_endpoint")]
    pub ai_endpoint: String,

    /// Model requested from the AI service
    #[serde(default = "default_ai_model")]
    pub ai_model: String,

    /// Request timeout in seconds per AI call
    #[serde(default = "default_ai_timeout")]
    pub ai_timeout_secs: u64,

    /// Concurrent prompts across games
    #[serde(default = "default_prompt_fanout")]
    pub fanout: usize,

    /// Turns of history carried into each request and kept per game
    #[serde(default = "default_prompt_history_size")]
    pub history_size: usize,

    /// Seconds after which a game stuck in `updating` is reconciled
    #[serde(default = "default_watchdog_secs")]
    pub watchdog_secs: u64,

    /// Seconds between reconciler sweeps; zero disables the worker
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            ai_endpoint: default_ai_endpoint(),
            ai_model: default_ai_model(),
            ai_timeout_secs: default_ai_timeout(),
            fanout: default_prompt_fanout(),
            history_size: default_prompt_history_size(),
            watchdog_secs: default_watchdog_secs(),
            reconcile_interval_secs: default_reconcile_interval(),
        }
    }
}

// Default values

fn default_listen_addr() -> String {
    "127.0.0.1:8200".to_string()
}

fn default_server_name() -> String {
    "pixelport".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_enable_cors() -> bool {
    true
}

fn default_maintenance_retry_secs() -> u64 {
    300
}

fn default_token_ttl() -> u64 {
    3600
}

fn default_admin_user() -> String {
    "admin".to_string()
}

fn default_admin_password() -> String {
    "admin".to_string()
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_rate_limit_max_requests() -> u32 {
    30
}

fn default_rate_limit_window_secs() -> u64 {
    60
}

fn default_import_interval() -> u64 {
    300
}

fn default_ai_endpoint() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}

fn default_ai_model() -> String {
    "claude-3-5-sonnet-20241022".to_string()
}

fn default_ai_timeout() -> u64 {
    120
}

fn default_prompt_fanout() -> usize {
    4
}

fn default_prompt_history_size() -> usize {
    10
}

fn default_watchdog_secs() -> u64 {
    600
}

fn default_reconcile_interval() -> u64 {
    60
}

impl ServerConfig {
    /// Load from a TOML file; missing path means all defaults.
    pub fn load(path: Option<std::path::PathBuf>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(&path)?;
                Ok(toml::from_str(&raw)?)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.backend == "sharded" && self.cache.servers.is_empty() {
            anyhow::bail!("sharded cache backend requires at least one server");
        }
        if self.prompt.fanout == 0 {
            anyhow::bail!("prompt fanout must be at least 1");
        }
        Ok(())
    }
}
