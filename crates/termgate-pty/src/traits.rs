//! Core traits for PTY abstraction.
//!
//! This module defines the two seams the session layer is written against:
//!
//! - [`PtyControl`]: the control path of a PTY master (resizing, closing).
//! - [`PtyChild`]: handle for the child process bound to the slave.
//!
//! Both are implemented by the Unix types in [`crate::unix`], and by fakes in
//! tests of the crates built on top of this one.

use std::future::Future;
use std::pin::Pin;

use crate::config::{PtySignal, WindowSize};
use crate::error::Result;

/// The control path of a pseudo-terminal master.
///
/// Control calls are `ioctl`-style operations on the master descriptor. They
/// never go through the data stream, so they are safe to issue while another
/// task is blocked reading or writing the same master.
pub trait PtyControl: Send + Sync {
    /// Resize the PTY to the given window size.
    ///
    /// The kernel delivers SIGWINCH to the foreground process group of the
    /// slave. Fails with [`PtyError::Closed`](crate::PtyError::Closed) once
    /// [`close`](Self::close) has been called.
    fn resize(&self, size: WindowSize) -> Result<()>;

    /// Get the current window size.
    fn window_size(&self) -> Result<WindowSize>;

    /// Stop accepting control calls.
    ///
    /// Idempotent. The descriptor itself is released when the last handle
    /// sharing it is dropped.
    fn close(&self);

    /// Check if the PTY is still open for control calls.
    fn is_open(&self) -> bool;
}

/// Handle for a child process spawned in a PTY.
pub trait PtyChild: Send {
    /// Get the process ID of the child.
    fn pid(&self) -> u32;

    /// Check if the child process has not been reaped yet.
    fn is_running(&self) -> bool;

    /// Wait for the child process to exit.
    ///
    /// Returns the cached status when the child has already been reaped.
    fn wait(&mut self) -> Pin<Box<dyn Future<Output = Result<ExitStatus>> + Send + '_>>;

    /// Try to get the exit status without blocking.
    ///
    /// Returns `None` if the process is still running.
    fn try_wait(&mut self) -> Result<Option<ExitStatus>>;

    /// Send a signal to the child process.
    fn signal(&self, signal: PtySignal) -> Result<()>;

    /// Kill the child process with SIGKILL.
    fn kill(&mut self) -> Result<()> {
        self.signal(PtySignal::Kill)
    }
}

/// Exit status of a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// The process exited normally with the given exit code.
    Exited(i32),

    /// The process was terminated by a signal.
    Signaled(i32),
}

impl ExitStatus {
    /// Check if the process exited successfully (exit code 0).
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    /// Get the exit code, if available.
    #[must_use]
    pub const fn code(&self) -> Option<i32> {
        match self {
            Self::Exited(code) => Some(*code),
            Self::Signaled(_) => None,
        }
    }

    /// Get the signal number that terminated the process.
    #[must_use]
    pub const fn signal(&self) -> Option<i32> {
        match self {
            Self::Signaled(sig) => Some(*sig),
            Self::Exited(_) => None,
        }
    }

    /// The status as a shell would report it: the exit code, or 128 plus the
    /// signal number for a signal death.
    #[must_use]
    pub const fn shell_code(&self) -> i32 {
        match self {
            Self::Exited(code) => *code,
            Self::Signaled(sig) => 128 + *sig,
        }
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with code {code}"),
            Self::Signaled(sig) => write!(f, "terminated by signal {sig}"),
        }
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        if let Some(code) = status.code() {
            Self::Exited(code)
        } else if let Some(signal) = status.signal() {
            Self::Signaled(signal)
        } else {
            Self::Exited(-1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_status_success() {
        let status = ExitStatus::Exited(0);
        assert!(status.success());
        assert_eq!(status.code(), Some(0));
        assert_eq!(status.shell_code(), 0);
    }

    #[test]
    fn exit_status_failure() {
        let status = ExitStatus::Exited(1);
        assert!(!status.success());
        assert_eq!(status.code(), Some(1));
    }

    #[test]
    fn exit_status_signaled() {
        let status = ExitStatus::Signaled(9);
        assert!(!status.success());
        assert_eq!(status.code(), None);
        assert_eq!(status.signal(), Some(9));
        assert_eq!(status.shell_code(), 137);
        assert_eq!(status.to_string(), "terminated by signal 9");
    }

    #[test]
    fn exit_status_from_std() {
        use std::os::unix::process::ExitStatusExt;

        assert_eq!(
            ExitStatus::from(std::process::ExitStatus::from_raw(3 << 8)),
            ExitStatus::Exited(3)
        );
        assert_eq!(
            ExitStatus::from(std::process::ExitStatus::from_raw(libc::SIGHUP)),
            ExitStatus::Signaled(libc::SIGHUP)
        );
    }
}
