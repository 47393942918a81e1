//! Environment-based configuration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use super::{GatewayConfig, LogFormat};
use crate::error::{GatewayError, Result};

/// Environment configuration prefix.
pub const DEFAULT_PREFIX: &str = "TERMGATE";

/// Variables read by [`EnvConfig::apply`], without the prefix.
pub mod vars {
    /// Listen address.
    pub const LISTEN: &str = "LISTEN";
    /// Host key path.
    pub const HOST_KEY: &str = "HOST_KEY";
    /// Generate a missing host key.
    pub const GENERATE_HOST_KEY: &str = "GENERATE_HOST_KEY";
    /// Program command line, split on whitespace.
    pub const COMMAND: &str = "COMMAND";
    /// Connection log path.
    pub const LOG_PATH: &str = "LOG_PATH";
    /// Log level filter.
    pub const LOG_LEVEL: &str = "LOG_LEVEL";
    /// Log output format.
    pub const LOG_FORMAT: &str = "LOG_FORMAT";
    /// Output drain timeout in milliseconds.
    pub const DRAIN_TIMEOUT_MS: &str = "DRAIN_TIMEOUT_MS";
}

/// Environment variable reader.
///
/// Reads the process environment, or a fixed set of variables supplied with
/// [`with_vars`](Self::with_vars).
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// Prefix for environment variables.
    prefix: String,
    /// Variables used instead of the process environment.
    fixed: Option<HashMap<String, String>>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl EnvConfig {
    /// Create a new environment config reader.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            fixed: None,
        }
    }

    /// Read from `vars` instead of the process environment. Keys are full
    /// variable names, prefix included.
    #[must_use]
    pub fn with_vars<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.fixed = Some(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Build the full environment variable name.
    fn var_name(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_uppercase()
        } else {
            format!("{}_{}", self.prefix, name.to_uppercase())
        }
    }

    /// Get a string value. Empty values count as unset.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        let var_name = self.var_name(name);
        let value = match &self.fixed {
            Some(vars) => vars.get(&var_name).cloned(),
            None => std::env::var(&var_name).ok(),
        };
        value.filter(|v| !v.is_empty())
    }

    /// Get a parsed value, failing on values that do not parse.
    pub fn parse<T>(&self, name: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(name)
            .map(|v| {
                v.parse().map_err(|e| {
                    GatewayError::config(format!("{}={v:?}: {e}", self.var_name(name)))
                })
            })
            .transpose()
    }

    /// Get a boolean value.
    pub fn bool(&self, name: &str) -> Result<Option<bool>> {
        self.get(name)
            .map(|v| match v.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" | "enabled" => Ok(true),
                "0" | "false" | "no" | "off" | "disabled" => Ok(false),
                _ => Err(GatewayError::config(format!(
                    "{}={v:?}: expected a boolean",
                    self.var_name(name)
                ))),
            })
            .transpose()
    }

    /// Check if a variable is set.
    #[must_use]
    pub fn is_set(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Overlay every variable that is set onto `config`.
    pub fn apply(&self, config: &mut GatewayConfig) -> Result<()> {
        if let Some(listen) = self.parse(vars::LISTEN)? {
            config.server.listen = listen;
        }
        if let Some(path) = self.get(vars::HOST_KEY) {
            config.server.host_key = PathBuf::from(path);
        }
        if let Some(generate) = self.bool(vars::GENERATE_HOST_KEY)? {
            config.server.generate_host_key = generate;
        }
        if let Some(command) = self.get(vars::COMMAND) {
            config.session.set_command_line(command.split_whitespace());
        }
        if let Some(path) = self.get(vars::LOG_PATH) {
            config.accounting.log_path = PathBuf::from(path);
        }
        if let Some(level) = self.get(vars::LOG_LEVEL) {
            config.logging.level = level;
        }
        if let Some(format) = self.parse::<LogFormat>(vars::LOG_FORMAT)? {
            config.logging.format = format;
        }
        if let Some(ms) = self.parse(vars::DRAIN_TIMEOUT_MS)? {
            config.session.drain_timeout_ms = ms;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_config_prefix() {
        let config = EnvConfig::new("TEST");
        assert_eq!(config.var_name("foo"), "TEST_FOO");
        assert_eq!(config.var_name("bar_baz"), "TEST_BAR_BAZ");
    }

    #[test]
    fn env_bool_parsing() {
        let env = EnvConfig::default().with_vars([
            ("TERMGATE_ENABLED", "yes"),
            ("TERMGATE_DISABLED", "off"),
            ("TERMGATE_BROKEN", "maybe"),
        ]);
        assert_eq!(env.bool("enabled").unwrap(), Some(true));
        assert_eq!(env.bool("disabled").unwrap(), Some(false));
        assert_eq!(env.bool("missing").unwrap(), None);
        assert!(env.bool("broken").is_err());
    }

    #[test]
    fn overlay_applies_set_variables() {
        let env = EnvConfig::default().with_vars([
            ("TERMGATE_LISTEN", "127.0.0.1:2022"),
            ("TERMGATE_GENERATE_HOST_KEY", "true"),
            ("TERMGATE_COMMAND", "/usr/games/robots -a"),
            ("TERMGATE_LOG_FORMAT", "compact"),
            ("TERMGATE_DRAIN_TIMEOUT_MS", "50"),
            ("TERMGATE_LOG_PATH", ""),
        ]);
        let mut config = GatewayConfig::default();
        env.apply(&mut config).unwrap();

        assert_eq!(config.server.listen, "127.0.0.1:2022".parse().unwrap());
        assert!(config.server.generate_host_key);
        assert_eq!(config.session.command, "/usr/games/robots");
        assert_eq!(config.session.args, vec!["-a"]);
        assert_eq!(config.logging.format, LogFormat::Compact);
        assert_eq!(config.session.drain_timeout_ms, 50);
        assert_eq!(
            config.accounting.log_path,
            GatewayConfig::default().accounting.log_path
        );
    }

    #[test]
    fn overlay_reports_bad_values() {
        let env = EnvConfig::default().with_vars([("TERMGATE_LISTEN", "not an address")]);
        let err = env.apply(&mut GatewayConfig::default()).unwrap_err();
        assert!(err.to_string().contains("TERMGATE_LISTEN"));
    }
}
