//! Configuration for boardsync, read from `boardsync.toml`.
//!
//! Values are layered: file → environment → CLI. Every field has a default,
//! so an empty or missing file is a valid configuration.
//!
//! ```toml
//! [realtime]
//! url = "ws://localhost:3001"
//! reconnect_delay_ms = 1000
//! max_reconnect_attempts = 5
//! handshake_timeout_ms = 20000
//! ack_timeout_ms = 10000
//!
//! [autosave]
//! debounce_ms = 1500
//!
//! [queue]
//! confirmed_grace_ms = 1000
//! failed_grace_ms = 3000
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// File name looked up in the working directory when no `--config` is given.
pub const CONFIG_FILE_NAME: &str = "boardsync.toml";

/// Environment variable that overrides `realtime.url`.
pub const URL_ENV: &str = "BOARDSYNC_URL";

/// Realtime channel settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeSection {
    #[serde(default = "default_url")]
    pub url: String,
    /// Fixed delay between connection attempts
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Attempts (including the first) before the channel gives up
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
}

fn default_url() -> String {
    "ws://localhost:3001".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_handshake_timeout_ms() -> u64 {
    20_000
}

fn default_ack_timeout_ms() -> u64 {
    10_000
}

impl Default for RealtimeSection {
    fn default() -> Self {
        Self {
            url: default_url(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            ack_timeout_ms: default_ack_timeout_ms(),
        }
    }
}

impl RealtimeSection {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutosaveSection {
    /// Quiet period after the last edit before a save fires
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_debounce_ms() -> u64 {
    1500
}

impl Default for AutosaveSection {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl AutosaveSection {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// How long settled optimistic actions stay visible before removal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSection {
    #[serde(default = "default_confirmed_grace_ms")]
    pub confirmed_grace_ms: u64,
    #[serde(default = "default_failed_grace_ms")]
    pub failed_grace_ms: u64,
}

fn default_confirmed_grace_ms() -> u64 {
    1000
}

fn default_failed_grace_ms() -> u64 {
    3000
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            confirmed_grace_ms: default_confirmed_grace_ms(),
            failed_grace_ms: default_failed_grace_ms(),
        }
    }
}

impl QueueSection {
    pub fn confirmed_grace(&self) -> Duration {
        Duration::from_millis(self.confirmed_grace_ms)
    }

    pub fn failed_grace(&self) -> Duration {
        Duration::from_millis(self.failed_grace_ms)
    }
}

/// The complete boardsync.toml structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub realtime: RealtimeSection,
    #[serde(default)]
    pub autosave: AutosaveSection,
    #[serde(default)]
    pub queue: QueueSection,
}

impl SyncConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse boardsync.toml")
    }

    /// Load from `path`, or return defaults if the file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize boardsync.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides (`BOARDSYNC_URL`).
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(URL_ENV)
            && !url.trim().is_empty()
        {
            self.realtime.url = url;
        }
        self
    }

    /// Apply CLI overrides; these win over file and environment.
    pub fn with_cli_overrides(mut self, url: Option<&str>) -> Self {
        if let Some(url) = url {
            self.realtime.url = url.to_string();
        }
        self
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        let url = &self.realtime.url;
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            warnings.push(format!(
                "Invalid realtime.url '{}': expected a ws:// or wss:// URL",
                url
            ));
        }
        if self.realtime.max_reconnect_attempts == 0 {
            warnings.push(
                "realtime.max_reconnect_attempts is 0: treated as a single attempt".to_string(),
            );
        }
        if self.realtime.ack_timeout_ms == 0 {
            warnings.push("realtime.ack_timeout_ms is 0: every save will time out".to_string());
        }
        if self.autosave.debounce_ms == 0 {
            warnings.push("autosave.debounce_ms is 0: every edit is saved separately".to_string());
        }

        warnings
    }
}
