//! Error types for termgate.
//!
//! Two layers of errors exist:
//!
//! - [`SessionError`]: everything that can go wrong inside one session. These
//!   are handled by the session itself and never reach other sessions.
//! - [`GatewayError`]: server-level failures. Only binding the listener is
//!   fatal to the process.

use std::net::SocketAddr;
use std::path::PathBuf;

use termgate_pty::PtyError;
use thiserror::Error;

/// Failures within a single session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The client did not request a pseudo-terminal.
    #[error("no terminal was requested")]
    NoTerminalRequested,

    /// The PTY could not be allocated.
    #[error("failed to allocate terminal: {0}")]
    Allocation(#[source] PtyError),

    /// The interactive program could not be started.
    #[error("failed to start program: {0}")]
    Launch(#[source] PtyError),

    /// A relay direction failed mid-session.
    #[error("relay I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection log could not be written.
    #[error("failed to write connection log {path}: {source}")]
    LogWrite {
        /// The log file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl SessionError {
    /// The single diagnostic line shown to the client before disconnecting,
    /// if this error is reported to the client at all.
    ///
    /// Errors raised during the relay or while accounting are silent.
    #[must_use]
    pub fn client_message(&self, no_terminal_message: &str) -> Option<String> {
        match self {
            Self::NoTerminalRequested => Some(format!("{no_terminal_message}\n")),
            Self::Allocation(e) => Some(format!("Error allocating terminal: {}\n", pty_cause(e))),
            Self::Launch(e) => Some(format!("Error starting terminal: {}\n", pty_cause(e))),
            Self::Io(_) | Self::LogWrite { .. } => None,
        }
    }

    /// Build a log write error.
    pub fn log_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::LogWrite {
            path: path.into(),
            source,
        }
    }
}

/// The innermost OS-level cause of a PTY error, for client-facing text.
fn pty_cause(err: &PtyError) -> String {
    match err {
        PtyError::Allocation(e)
        | PtyError::Launch { source: e, .. }
        | PtyError::Io(e)
        | PtyError::Resize(e)
        | PtyError::WindowSize(e)
        | PtyError::Signal(e)
        | PtyError::Wait(e) => e.to_string(),
        other => other.to_string(),
    }
}

/// Server-level failures.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Configuration was invalid or could not be read.
    #[error("configuration error: {0}")]
    Config(String),

    /// The host key could not be loaded or generated.
    #[error("host key {path}: {reason}")]
    HostKey {
        /// The host key path.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address that was requested.
        addr: SocketAddr,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// SSH protocol error.
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// A session failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a host key error.
    pub fn host_key(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::HostKey {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for server-level operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    const MESSAGE: &str = "A terminal is required to play this game.";

    #[test]
    fn no_terminal_message() {
        let err = SessionError::NoTerminalRequested;
        assert_eq!(
            err.client_message(MESSAGE).as_deref(),
            Some("A terminal is required to play this game.\n")
        );
    }

    #[test]
    fn launch_message_uses_os_error() {
        let err = SessionError::Launch(PtyError::Launch {
            program: "python3".into(),
            source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
        });
        let msg = err.client_message(MESSAGE).unwrap();
        assert!(msg.starts_with("Error starting terminal: "));
        assert!(msg.ends_with('\n'));
        assert_eq!(msg.lines().count(), 1);
        assert!(!msg.contains("python3"));
        assert_eq!(msg, "Error starting terminal: No such file or directory\n");
    }

    #[test]
    fn allocation_message() {
        let err = SessionError::Allocation(PtyError::Allocation(io::Error::other("no ptys")));
        assert_eq!(
            err.client_message(MESSAGE).as_deref(),
            Some("Error allocating terminal: no ptys\n")
        );
    }

    #[test]
    fn relay_errors_are_silent() {
        let err = SessionError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert!(err.client_message(MESSAGE).is_none());

        let err = SessionError::log_write("/var/log/x", io::Error::other("disk full"));
        assert!(err.client_message(MESSAGE).is_none());
        assert_eq!(
            err.to_string(),
            "failed to write connection log /var/log/x: disk full"
        );
    }

    #[test]
    fn gateway_error_display() {
        let err = GatewayError::host_key("/etc/ssh/key", "missing");
        assert_eq!(err.to_string(), "host key /etc/ssh/key: missing");

        let err = GatewayError::config("empty command");
        assert_eq!(err.to_string(), "configuration error: empty command");
    }
}
