//! Configuration types for launching a child on a PTY.
//!
//! This module provides [`LaunchConfig`] describing the program to run,
//! [`PtySignal`] for the signals a supervisor may deliver, and [`WindowSize`]
//! for terminal dimensions.

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::path::PathBuf;

/// Configuration for launching a child process on a PTY slave.
///
/// # Example
///
/// ```
/// use termgate_pty::LaunchConfig;
///
/// let config = LaunchConfig::builder("python3")
///     .arg("/home/ubuntu/asciigames/flight_sim.py")
///     .env("TERM", "xterm-256color")
///     .working_directory("/home/ubuntu/asciigames")
///     .build();
/// assert_eq!(config.program_name(), "python3");
/// ```
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Program to execute. Resolved through `PATH` when it has no slash.
    pub program: OsString,

    /// Command-line arguments, not including the program name.
    pub args: Vec<OsString>,

    /// Working directory for the child process.
    pub working_directory: Option<PathBuf>,

    /// Whether the child starts from the server's own environment.
    pub inherit_env: bool,

    /// Additional environment variables, applied over the base environment.
    pub env_add: HashMap<OsString, OsString>,

    /// Environment variables to remove from the base environment.
    pub env_remove: Vec<OsString>,
}

impl LaunchConfig {
    /// Create a configuration for `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_directory: None,
            inherit_env: true,
            env_add: HashMap::new(),
            env_remove: Vec::new(),
        }
    }

    /// Create a new builder for `LaunchConfig`.
    #[must_use]
    pub fn builder(program: impl Into<OsString>) -> LaunchConfigBuilder {
        LaunchConfigBuilder::new(program)
    }

    /// The program name as a lossy UTF-8 string, for diagnostics.
    #[must_use]
    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    /// Get the effective environment for the child process.
    ///
    /// This starts from the inherited environment (or an empty one), adds
    /// variables from `env_add`, and removes variables from `env_remove`.
    #[must_use]
    pub fn effective_env(&self) -> HashMap<OsString, OsString> {
        let mut env: HashMap<OsString, OsString> = if self.inherit_env {
            std::env::vars_os().collect()
        } else {
            HashMap::new()
        };

        env.extend(self.env_add.clone());

        for key in &self.env_remove {
            env.remove(key);
        }

        env
    }

    /// Look up a variable in the effective environment.
    #[must_use]
    pub fn env_value(&self, key: impl AsRef<OsStr>) -> Option<OsString> {
        self.effective_env().remove(key.as_ref())
    }
}

/// Builder for [`LaunchConfig`].
#[derive(Debug, Clone)]
pub struct LaunchConfigBuilder {
    config: LaunchConfig,
}

impl LaunchConfigBuilder {
    /// Create a new builder for `program`.
    #[must_use]
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            config: LaunchConfig::new(program),
        }
    }

    /// Append a single argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.config.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.config.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory for the child process.
    #[must_use]
    pub fn working_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.working_directory = Some(path.into());
        self
    }

    /// Start from an empty environment instead of the server's.
    #[must_use]
    pub const fn env_clear(mut self) -> Self {
        self.config.inherit_env = false;
        self
    }

    /// Add an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.config.env_add.insert(key.into(), value.into());
        self
    }

    /// Add several environment variables.
    #[must_use]
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        self.config
            .env_add
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Remove an environment variable.
    #[must_use]
    pub fn env_remove(mut self, key: impl Into<OsString>) -> Self {
        self.config.env_remove.push(key.into());
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> LaunchConfig {
        self.config
    }
}

/// Signals a supervisor may deliver to a PTY child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum PtySignal {
    /// Hangup (SIGHUP): the terminal went away.
    Hangup,
    /// Interrupt (SIGINT).
    Interrupt,
    /// Terminate (SIGTERM).
    Terminate,
    /// Kill (SIGKILL), cannot be caught.
    Kill,
    /// Window size change (SIGWINCH).
    WindowChange,
}

impl PtySignal {
    /// Get the Unix signal number.
    #[must_use]
    pub const fn as_unix_signal(self) -> i32 {
        match self {
            Self::Hangup => libc::SIGHUP,
            Self::Interrupt => libc::SIGINT,
            Self::Terminate => libc::SIGTERM,
            Self::Kill => libc::SIGKILL,
            Self::WindowChange => libc::SIGWINCH,
        }
    }
}

impl std::fmt::Display for PtySignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Hangup => "SIGHUP",
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Kill => "SIGKILL",
            Self::WindowChange => "SIGWINCH",
        };
        f.write_str(name)
    }
}

/// Window size for the PTY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowSize {
    /// Number of columns (characters per line).
    pub cols: u16,
    /// Number of rows (lines).
    pub rows: u16,
    /// Pixel width (optional, often 0).
    pub xpixel: u16,
    /// Pixel height (optional, often 0).
    pub ypixel: u16,
}

impl WindowSize {
    /// Create a new window size with the given dimensions.
    #[must_use]
    pub const fn new(cols: u16, rows: u16) -> Self {
        Self {
            cols,
            rows,
            xpixel: 0,
            ypixel: 0,
        }
    }

    /// Create a window size with pixel dimensions.
    #[must_use]
    pub const fn with_pixels(cols: u16, rows: u16, xpixel: u16, ypixel: u16) -> Self {
        Self {
            cols,
            rows,
            xpixel,
            ypixel,
        }
    }

    /// Build a size from the `u32` fields SSH carries, saturating at `u16::MAX`.
    #[must_use]
    pub fn from_ssh(cols: u32, rows: u32, xpixel: u32, ypixel: u32) -> Self {
        let clamp = |v: u32| u16::try_from(v).unwrap_or(u16::MAX);
        Self::with_pixels(clamp(cols), clamp(rows), clamp(xpixel), clamp(ypixel))
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

impl From<(u16, u16)> for WindowSize {
    fn from((cols, rows): (u16, u16)) -> Self {
        Self::new(cols, rows)
    }
}

impl std::fmt::Display for WindowSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let config = LaunchConfig::builder("/bin/sh")
            .args(["-c", "exit 0"])
            .working_directory("/tmp")
            .env("FOO", "bar")
            .build();

        assert_eq!(config.working_directory, Some(PathBuf::from("/tmp")));
        assert_eq!(config.args, vec![OsString::from("-c"), OsString::from("exit 0")]);
        assert!(config.env_add.contains_key(&OsString::from("FOO")));
        assert!(config.inherit_env);
    }

    #[test]
    fn effective_env_overrides_and_removes() {
        let config = LaunchConfig::builder("true")
            .env_clear()
            .env("TERM", "vt100")
            .env("GONE", "x")
            .env_remove("GONE")
            .build();

        let env = config.effective_env();
        assert_eq!(env.len(), 1);
        assert_eq!(env.get(OsStr::new("TERM")), Some(&OsString::from("vt100")));
    }

    #[test]
    fn effective_env_inherits_parent() {
        let config = LaunchConfig::builder("true").env("TERM", "screen").build();
        let env = config.effective_env();

        if let Some(path) = std::env::var_os("PATH") {
            assert_eq!(env.get(OsStr::new("PATH")), Some(&path));
        }
        assert_eq!(config.env_value("TERM"), Some(OsString::from("screen")));
    }

    #[test]
    fn window_size_default() {
        let size = WindowSize::default();
        assert_eq!(size.cols, 80);
        assert_eq!(size.rows, 24);
    }

    #[test]
    fn window_size_from_ssh_saturates() {
        let size = WindowSize::from_ssh(100_000, 50, 0, 0);
        assert_eq!(size.cols, u16::MAX);
        assert_eq!(size.rows, 50);
        assert_eq!(size.to_string(), "65535x50");
    }

    #[test]
    fn signal_numbers() {
        assert_eq!(PtySignal::Hangup.as_unix_signal(), libc::SIGHUP);
        assert_eq!(PtySignal::Kill.as_unix_signal(), libc::SIGKILL);
        assert_eq!(PtySignal::Terminate.to_string(), "SIGTERM");
    }

    proptest::proptest! {
        #[test]
        fn from_ssh_never_wraps(cols in 0u32..200_000, rows in 0u32..200_000) {
            let size = WindowSize::from_ssh(cols, rows, 0, 0);
            proptest::prop_assert_eq!(u32::from(size.cols), cols.min(u32::from(u16::MAX)));
            proptest::prop_assert_eq!(u32::from(size.rows), rows.min(u32::from(u16::MAX)));
        }
    }
}
