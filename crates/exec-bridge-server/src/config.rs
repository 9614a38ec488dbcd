//! Server configuration file and environment overrides.

use std::{collections::HashMap, path::Path};

use anyhow::{Context, Result, bail};
use exec_bridge_transport::RelayConfig;
use serde::{Deserialize, Serialize};

/// Settings resolved once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Per-session limits.
    pub relay: RelayConfig,
    /// Command launched in the pod; an interactive `/bin/sh` when unset.
    pub command: Option<Vec<String>>,
    /// How long kubectl may wait for the API server.
    pub kubectl_request_timeout_secs: Option<u64>,
}

impl ServerConfig {
    /// Load from an optional TOML file, then apply `EXEC_BRIDGE_*` overrides.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed, or the result
    /// is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                Self::from_toml(&content)
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))?
            }
            None => Self::default(),
        };

        let env: HashMap<String, String> = std::env::vars()
            .filter(|(k, _)| k.starts_with("EXEC_BRIDGE_"))
            .collect();
        config.apply_overrides(|key| env.get(key).cloned());
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document.
    ///
    /// # Errors
    /// Returns error if the document is not valid configuration.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply overrides looked up by variable name.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(secs) = number("EXEC_BRIDGE_WRITE_TIMEOUT_SECS") {
            self.relay.write_timeout_secs = secs;
        }
        if let Some(secs) = number("EXEC_BRIDGE_READ_TIMEOUT_SECS") {
            self.relay.read_timeout_secs = secs;
        }
        if let Some(secs) = number("EXEC_BRIDGE_CLOSE_GRACE_PERIOD_SECS") {
            self.relay.close_grace_period_secs = secs;
        }
        if let Some(size) = number("EXEC_BRIDGE_MAX_MESSAGE_SIZE") {
            self.relay.max_message_size = usize::try_from(size).unwrap_or(usize::MAX);
        }
        if let Some(command) = lookup("EXEC_BRIDGE_COMMAND") {
            self.command = shlex::split(&command).filter(|parts| !parts.is_empty());
        }
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    /// Returns error describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.relay.max_message_size == 0 {
            bail!("relay.max_message_size must be greater than zero");
        }
        if self.relay.read_timeout_secs == 0 {
            bail!("relay.read_timeout_secs must be greater than zero");
        }
        if self.relay.output_queue_capacity == 0 {
            bail!("relay.output_queue_capacity must be greater than zero");
        }
        if matches!(&self.command, Some(command) if command.is_empty()) {
            bail!("command must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.relay, RelayConfig::default());
        assert_eq!(config.command, None);
    }

    #[test]
    fn test_parse_file() {
        let config = ServerConfig::from_toml(
            r#"
            command = ["/bin/bash", "-il"]
            kubectl_request_timeout_secs = 20

            [relay]
            read_timeout_secs = 900
            "#,
        )
        .unwrap();

        assert_eq!(
            config.command,
            Some(vec!["/bin/bash".to_string(), "-il".to_string()])
        );
        assert_eq!(config.kubectl_request_timeout_secs, Some(20));
        assert_eq!(config.relay.read_timeout_secs, 900);
        assert_eq!(config.relay.write_timeout_secs, 10);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("EXEC_BRIDGE_READ_TIMEOUT_SECS", "60"),
            ("EXEC_BRIDGE_MAX_MESSAGE_SIZE", "16384"),
            ("EXEC_BRIDGE_WRITE_TIMEOUT_SECS", "soon"),
            ("EXEC_BRIDGE_COMMAND", "/bin/sh -c 'exec bash'"),
        ]
        .into_iter()
        .collect();

        let mut config = ServerConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| (*v).to_string()));

        assert_eq!(config.relay.read_timeout_secs, 60);
        assert_eq!(config.relay.max_message_size, 16384);
        assert_eq!(config.relay.write_timeout_secs, 10);
        assert_eq!(
            config.command,
            Some(vec!["/bin/sh".into(), "-c".into(), "exec bash".into()])
        );
    }

    #[test]
    fn test_validate_rejects_empty_command() {
        let config = ServerConfig {
            command: Some(Vec::new()),
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_file() {
        assert!(ServerConfig::load(Some(Path::new("/no/such/exec-bridge.toml"))).is_err());
    }
}
