//! Error types for the termgate-pty crate.
//!
//! This module provides a unified error type [`PtyError`] that covers every
//! failure mode of allocating a pseudo-terminal, launching a child on it and
//! controlling the pair afterwards.

use std::io;

/// The error type for PTY operations.
#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    /// The host could not provide a pseudo-terminal pair.
    #[error("failed to allocate PTY: {0}")]
    Allocation(#[source] io::Error),

    /// The child process could not be started on the PTY slave.
    #[error("failed to launch {program}: {source}")]
    Launch {
        /// The program that was being launched.
        program: String,
        /// The underlying spawn error.
        #[source]
        source: io::Error,
    },

    /// An I/O error occurred during PTY operations.
    #[error("PTY I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failed to resize the PTY.
    #[error("failed to resize PTY: {0}")]
    Resize(#[source] io::Error),

    /// Failed to read the PTY window size.
    #[error("failed to read PTY window size: {0}")]
    WindowSize(#[source] io::Error),

    /// The PTY master has been closed.
    #[error("PTY has been closed")]
    Closed,

    /// The child process has already been reaped.
    #[error("child process is no longer running")]
    NotRunning,

    /// Failed to send a signal to the child process.
    #[error("failed to send signal: {0}")]
    Signal(#[source] io::Error),

    /// Failed to wait for the child process.
    #[error("failed to wait for child: {0}")]
    Wait(#[source] io::Error),
}

impl PtyError {
    /// Whether the error only reports that the PTY or child is already gone.
    ///
    /// Such errors are expected when control calls race with teardown.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed | Self::NotRunning)
    }
}

/// A specialized Result type for PTY operations.
pub type Result<T> = std::result::Result<T, PtyError>;

impl From<rustix::io::Errno> for PtyError {
    fn from(errno: rustix::io::Errno) -> Self {
        Self::Io(errno_to_io(errno))
    }
}

/// Convert a rustix errno into a standard I/O error.
pub(crate) fn errno_to_io(errno: rustix::io::Errno) -> io::Error {
    io::Error::from_raw_os_error(errno.raw_os_error())
}
