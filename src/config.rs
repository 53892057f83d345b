//! Configuration types for the warden bot.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Result, WardenError};

/// Environment variable that overrides `discord.bot_token`.
pub const TOKEN_ENV_VAR: &str = "WARDEN_DISCORD_TOKEN";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    /// Discord credentials and endpoints.
    pub discord: DiscordConfig,
    /// Database location.
    pub store: StoreConfig,
    /// Reconciliation sweep settings.
    pub scheduler: SchedulerConfig,
    /// XP awards.
    pub progression: ProgressionConfig,
    /// Poll, giveaway and verification markers.
    pub engagement: EngagementConfig,
    /// Log filter and optional file output.
    pub logging: LoggingConfig,
}

/// Discord connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    /// Bot token. Prefer the `WARDEN_DISCORD_TOKEN` environment variable.
    pub bot_token: String,
    /// REST API base URL.
    pub api_base: String,
    /// Gateway websocket URL.
    pub gateway_url: String,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base: "https://discord.com/api/v10".to_owned(),
            gateway_url: "wss://gateway.discord.gg".to_owned(),
        }
    }
}

/// Database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_data_dir().join("warden.db"),
        }
    }
}

/// Reconciliation scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between sweeps of each kind.
    pub sweep_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: crate::scheduler::runner::DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

/// XP award settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressionConfig {
    /// Minimum XP for one rewarded message.
    pub xp_per_message_min: u64,
    /// Maximum XP for one rewarded message.
    pub xp_per_message_max: u64,
    /// Seconds a member must wait between rewarded messages.
    pub xp_cooldown_secs: u64,
}

impl Default for ProgressionConfig {
    fn default() -> Self {
        Self {
            xp_per_message_min: 15,
            xp_per_message_max: 25,
            xp_cooldown_secs: 60,
        }
    }
}

/// Reaction markers used by interactive messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngagementConfig {
    /// Marker members click to enter a giveaway.
    pub giveaway_marker: String,
    /// Marker members click to verify.
    pub verification_marker: String,
    /// Markers assigned to poll choices, in order.
    pub poll_markers: Vec<String>,
}

impl Default for EngagementConfig {
    fn default() -> Self {
        Self {
            giveaway_marker: "🎉".to_owned(),
            verification_marker: "✅".to_owned(),
            poll_markers: ["1️⃣", "2️⃣", "3️⃣", "4️⃣", "5️⃣", "6️⃣", "7️⃣", "8️⃣", "9️⃣", "🔟"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Directory for daily-rolling log files. Stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "warden=info".to_owned(),
            log_dir: None,
        }
    }
}

impl WardenConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| WardenError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| WardenError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load `path` if it exists, otherwise defaults, then apply the
    /// environment override and validate.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };
        if let Ok(token) = std::env::var(TOKEN_ENV_VAR)
            && !token.trim().is_empty()
        {
            config.discord.bot_token = token.trim().to_owned();
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.progression.xp_per_message_min > self.progression.xp_per_message_max {
            return Err(WardenError::Config(format!(
                "xp_per_message_min ({}) exceeds xp_per_message_max ({})",
                self.progression.xp_per_message_min, self.progression.xp_per_message_max
            )));
        }
        if self.scheduler.sweep_interval_secs == 0 {
            return Err(WardenError::Config(
                "sweep_interval_secs must be at least 1".to_owned(),
            ));
        }
        if self.engagement.poll_markers.len() < 2 {
            return Err(WardenError::Config(
                "at least two poll markers are required".to_owned(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path: `~/.config/warden/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("warden").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("warden")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/warden-config/config.toml")
        }
    }
}

fn default_data_dir() -> PathBuf {
    if let Some(data) = std::env::var_os("XDG_DATA_HOME") {
        PathBuf::from(data).join("warden")
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".local").join("share").join("warden")
    } else {
        PathBuf::from("/tmp/warden-data")
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = WardenConfig::default();
        config.validate().unwrap();
        assert_eq!(config.scheduler.sweep_interval_secs, 60);
        assert_eq!(config.engagement.poll_markers.len(), 10);
        assert_eq!(config.discord.api_base, "https://discord.com/api/v10");
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: WardenConfig = toml::from_str(
            r#"
            [progression]
            xp_per_message_max = 40

            [logging]
            filter = "warden=debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.progression.xp_per_message_min, 15);
        assert_eq!(config.progression.xp_per_message_max, 40);
        assert_eq!(config.logging.filter, "warden=debug");
        assert_eq!(config.engagement.giveaway_marker, "🎉");
    }

    #[test]
    fn validate_rejects_inverted_xp_range_and_zero_interval() {
        let mut config = WardenConfig::default();
        config.progression.xp_per_message_min = 30;
        assert!(matches!(config.validate(), Err(WardenError::Config(_))));

        let mut config = WardenConfig::default();
        config.scheduler.sweep_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = WardenConfig::default();
        config.store.path = dir.path().join("db.sqlite");
        config.save_to_file(&path).unwrap();

        let loaded = WardenConfig::from_file(&path).unwrap();
        assert_eq!(loaded.store.path, config.store.path);
        assert_eq!(loaded.engagement.poll_markers, config.engagement.poll_markers);
    }

    #[test]
    fn from_file_invalid_toml_returns_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "this is not valid toml {{{").unwrap();
        assert!(matches!(
            WardenConfig::from_file(&path),
            Err(WardenError::Config(_))
        ));
    }

    #[test]
    fn default_config_path_ends_with_config_toml() {
        let path = WardenConfig::default_config_path();
        let path_str = path.to_string_lossy();
        assert!(path_str.ends_with("config.toml"));
        assert!(path_str.contains("warden"));
    }
}
