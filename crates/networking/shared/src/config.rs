//! Session configuration shared by the transport, the coordinator and the node binary.

use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    lobby::LobbyVisibility,
    steam::{HOST_ADDRESS_KEY, SESSION_NAME_KEY},
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Tunables for one peer's session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub app_id: u32,
    pub visibility: LobbyVisibility,
    /// Delay between activation and the optimistic host attempt.
    pub initial_host_delay_ms: u64,
    /// Delay before re-hosting after the only peer left.
    pub session_restart_delay_ms: u64,
    /// Delay before hosting after this peer was promoted to lobby owner.
    pub migration_delay_ms: u64,
    pub host_address_key: String,
    pub session_name_key: String,
    /// Upper bound on simultaneously open host connections. `None` is unbounded.
    pub max_connections: Option<usize>,
    /// Period of the driving tick used by the node binary.
    pub tick_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            app_id: crate::STEAM_APP_ID,
            visibility: LobbyVisibility::FriendsOnly,
            initial_host_delay_ms: 500,
            session_restart_delay_ms: 1_000,
            migration_delay_ms: 500,
            host_address_key: HOST_ADDRESS_KEY.to_string(),
            session_name_key: SESSION_NAME_KEY.to_string(),
            max_connections: None,
            tick_interval_ms: 16,
        }
    }
}

impl SessionConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_id == 0 {
            return Err(ConfigError::Invalid("app_id must be non-zero"));
        }
        if self.host_address_key.trim().is_empty() {
            return Err(ConfigError::Invalid("host_address_key must not be empty"));
        }
        if self.max_connections == Some(0) {
            return Err(ConfigError::Invalid("max_connections must be at least 1"));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be non-zero"));
        }
        Ok(())
    }

    pub fn initial_host_delay(&self) -> Duration {
        Duration::from_millis(self.initial_host_delay_ms)
    }

    pub fn session_restart_delay(&self) -> Duration {
        Duration::from_millis(self.session_restart_delay_ms)
    }

    pub fn migration_delay(&self) -> Duration {
        Duration::from_millis(self.migration_delay_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_source_yields_defaults() {
        let config = SessionConfig::from_toml_str("").unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.host_address_key, "HostAddress");
        assert_eq!(config.initial_host_delay(), Duration::from_millis(500));
    }

    #[test]
    fn partial_source_overrides_fields() {
        let config = SessionConfig::from_toml_str(
            r#"
            visibility = "public"
            session_restart_delay_ms = 2500
            max_connections = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.visibility, LobbyVisibility::Public);
        assert_eq!(config.session_restart_delay(), Duration::from_millis(2_500));
        assert_eq!(config.max_connections, Some(1));
        assert_eq!(config.migration_delay_ms, 500);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            SessionConfig::from_toml_str("app_id = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SessionConfig::from_toml_str("max_connections = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SessionConfig::from_toml_str("app_id = \"x\""),
            Err(ConfigError::Parse(_))
        ));
    }
}
