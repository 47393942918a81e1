//! Unix platform implementation for PTY operations.
//!
//! This module provides:
//!
//! - PTY master/slave pair allocation via openpt/grantpt/unlockpt
//! - Async I/O on the master through tokio's `AsyncFd`
//! - Child launching with a new session and the slave as controlling terminal
//!
//! # Example
//!
//! ```ignore
//! use termgate_pty::{LaunchConfig, WindowSize, unix};
//!
//! let config = LaunchConfig::builder("/bin/sh").env("TERM", "xterm").build();
//! let (master, child) = unix::spawn(&config, WindowSize::new(80, 24))?;
//! ```

mod child;
mod pty;

pub use child::{UnixPtyChild, launch};
pub use pty::{PtyPair, PtyReader, PtyResizer, PtyWriter, UnixPtyMaster, open_slave};

use crate::config::{LaunchConfig, WindowSize};
use crate::error::Result;

/// Allocate a PTY of the given size and launch `config` on it.
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns [`PtyError::Allocation`](crate::PtyError::Allocation) or
/// [`PtyError::Launch`](crate::PtyError::Launch).
pub fn spawn(config: &LaunchConfig, size: WindowSize) -> Result<(UnixPtyMaster, UnixPtyChild)> {
    let (master, slave) = PtyPair::allocate(size)?.into_parts();
    let child = launch(config, slave)?;
    Ok((master, child))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::PtyControl;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn spawn_echo() {
        let config = LaunchConfig::builder("echo").arg("hello").build();
        let (mut master, mut child) = spawn(&config, WindowSize::new(80, 24)).unwrap();

        let mut output = Vec::new();
        let mut buf = [0u8; 64];
        while let Ok(n) = master.read(&mut buf).await {
            if n == 0 {
                break;
            }
            output.extend_from_slice(&buf[..n]);
        }

        assert!(String::from_utf8_lossy(&output).contains("hello"));
        assert!(child.wait().await.unwrap().success());
    }

    #[tokio::test]
    async fn spawn_sees_window_size() {
        let config = LaunchConfig::builder("/bin/sh")
            .args(["-c", "stty size"])
            .build();
        let (mut master, mut child) = spawn(&config, WindowSize::new(100, 30)).unwrap();

        let mut output = String::new();
        let _ = master.read_to_string(&mut output).await;

        assert!(output.contains("30 100"), "unexpected stty output: {output:?}");
        assert_eq!(master.window_size().unwrap(), WindowSize::new(100, 30));
        child.wait().await.unwrap();
    }
}
