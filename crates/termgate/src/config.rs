//! Gateway configuration.
//!
//! Typed configuration with defaults, loaded in layers:
//! defaults < TOML file ([`file`]) < environment ([`env`]) < command line.
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:22"
//! host_key = "/etc/ssh/ssh_host_rsa_key"
//!
//! [session]
//! command = "python3"
//! args = ["/home/ubuntu/asciigames/flight_sim.py"]
//!
//! [accounting]
//! log_path = "/home/ubuntu/asciigames/connections.log"
//! ```

pub mod env;
pub mod file;

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use termgate_pty::LaunchConfig;

use crate::error::{GatewayError, Result};
use crate::relay::{DEFAULT_BUFFER_SIZE, RelayConfig};
use crate::session::{DEFAULT_NO_TERMINAL_MESSAGE, DEFAULT_TERM, SessionSettings};

pub use env::EnvConfig;
pub use file::ConfigLoader;

/// Default listen address.
pub const DEFAULT_LISTEN: &str = "0.0.0.0:22";

/// Default host key path.
pub const DEFAULT_HOST_KEY: &str = "/etc/ssh/ssh_host_rsa_key";

/// Default program.
pub const DEFAULT_COMMAND: &str = "python3";

/// Default program arguments.
pub const DEFAULT_ARGS: &[&str] = &["/home/ubuntu/asciigames/flight_sim.py"];

/// Default connection log path.
pub const DEFAULT_LOG_PATH: &str = "/home/ubuntu/asciigames/connections.log";

/// Default log level filter.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Complete gateway configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// SSH server settings.
    pub server: ServerConfig,
    /// Per-session settings.
    pub session: SessionConfig,
    /// Connection log settings.
    pub accounting: AccountingConfig,
    /// Diagnostic logging settings.
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    /// Parse a TOML document. Missing fields keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| GatewayError::config(e.to_string()))
    }

    /// Check the configuration for values the gateway cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.session.command.trim().is_empty() {
            return Err(GatewayError::config("session.command must not be empty"));
        }
        if self.accounting.log_path.as_os_str().is_empty() {
            return Err(GatewayError::config("accounting.log_path must not be empty"));
        }
        if self.session.hangup_grace_ms == 0 {
            return Err(GatewayError::config("session.hangup_grace_ms must be positive"));
        }
        if self.session.default_term.is_empty() {
            return Err(GatewayError::config("session.default_term must not be empty"));
        }
        Ok(())
    }

    /// Session settings derived from this configuration.
    #[must_use]
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings::new(self.session.launch_config())
            .default_term(self.session.default_term.clone())
            .no_terminal_message(self.session.no_terminal_message.clone())
            .relay(self.session.relay_config())
    }
}

/// SSH server settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to listen on.
    pub listen: SocketAddr,
    /// OpenSSH private host key.
    pub host_key: PathBuf,
    /// Generate an Ed25519 host key when the file is missing.
    pub generate_host_key: bool,
    /// Disconnect idle clients after this many seconds; 0 disables.
    pub inactivity_timeout_secs: u64,
    /// Send keepalives at this interval in seconds; 0 disables.
    pub keepalive_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 22)),
            host_key: PathBuf::from(DEFAULT_HOST_KEY),
            generate_host_key: false,
            inactivity_timeout_secs: 0,
            keepalive_interval_secs: 0,
        }
    }
}

impl ServerConfig {
    /// The inactivity timeout, if enabled.
    #[must_use]
    pub const fn inactivity_timeout(&self) -> Option<Duration> {
        secs_or_none(self.inactivity_timeout_secs)
    }

    /// The keepalive interval, if enabled.
    #[must_use]
    pub const fn keepalive_interval(&self) -> Option<Duration> {
        secs_or_none(self.keepalive_interval_secs)
    }
}

const fn secs_or_none(secs: u64) -> Option<Duration> {
    if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}

/// Per-session settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Program to run for every session.
    pub command: String,
    /// Program arguments.
    pub args: Vec<String>,
    /// `TERM` for clients that negotiate an empty terminal type.
    pub default_term: String,
    /// Start the program from the server's environment.
    pub inherit_env: bool,
    /// Working directory of the program.
    pub working_directory: Option<PathBuf>,
    /// Extra environment variables for the program.
    pub env: BTreeMap<String, String>,
    /// Output drained after the program exits, in milliseconds.
    pub drain_timeout_ms: u64,
    /// Wait for the program after its terminal closes, in milliseconds.
    pub exit_grace_ms: u64,
    /// Time between SIGHUP and SIGKILL, in milliseconds.
    pub hangup_grace_ms: u64,
    /// Line sent to clients that did not request a terminal.
    pub no_terminal_message: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let relay = RelayConfig::default();
        Self {
            command: DEFAULT_COMMAND.to_string(),
            args: DEFAULT_ARGS.iter().map(ToString::to_string).collect(),
            default_term: DEFAULT_TERM.to_string(),
            inherit_env: true,
            working_directory: None,
            env: BTreeMap::new(),
            drain_timeout_ms: relay.drain_timeout.as_millis() as u64,
            exit_grace_ms: relay.exit_grace.as_millis() as u64,
            hangup_grace_ms: relay.hangup_grace.as_millis() as u64,
            no_terminal_message: DEFAULT_NO_TERMINAL_MESSAGE.to_string(),
        }
    }
}

impl SessionConfig {
    /// Replace the program and its arguments with a command line.
    pub fn set_command_line<I, S>(&mut self, words: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut words = words.into_iter().map(Into::into);
        if let Some(command) = words.next() {
            self.command = command;
            self.args = words.collect();
        }
    }

    /// The launch configuration, without `TERM`.
    #[must_use]
    pub fn launch_config(&self) -> LaunchConfig {
        let mut builder = LaunchConfig::builder(&self.command)
            .args(&self.args)
            .envs(&self.env);
        if !self.inherit_env {
            builder = builder.env_clear();
        }
        if let Some(dir) = &self.working_directory {
            builder = builder.working_directory(dir);
        }
        builder.build()
    }

    /// Relay timing.
    #[must_use]
    pub const fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            drain_timeout: Duration::from_millis(self.drain_timeout_ms),
            exit_grace: Duration::from_millis(self.exit_grace_ms),
            hangup_grace: Duration::from_millis(self.hangup_grace_ms),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Connection log settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AccountingConfig {
    /// Append-only connection log.
    pub log_path: PathBuf,
}

impl Default for AccountingConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
        }
    }
}

/// Diagnostic logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Level filter, in `EnvFilter` syntax.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            format: LogFormat::default(),
        }
    }
}

/// Diagnostic log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line human-readable output.
    #[default]
    Pretty,
    /// Single-line human-readable output.
    Compact,
    /// Newline-delimited JSON.
    Json,
}

impl FromStr for LogFormat {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(GatewayError::config(format!(
                "unknown log format {other:?}, expected pretty, compact or json"
            ))),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Compact => write!(f, "compact"),
            Self::Json => write!(f, "json"),
        }
    }
}
