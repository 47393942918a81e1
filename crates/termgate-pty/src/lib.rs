//! termgate-pty: async Unix PTY allocation and subprocess launching
//!
//! This crate provides the two leaf components of a terminal gateway:
//!
//! - **Allocation**: [`PtyPair::allocate`] creates a pseudo-terminal pair with
//!   an initial [`WindowSize`]. The master is registered with tokio and can be
//!   split into reader, writer and resize handles.
//! - **Launching**: [`launch`] starts a program on the slave side as a session
//!   leader with the slave as its controlling terminal.
//!
//! # Quick Start
//!
//! ```ignore
//! use termgate_pty::{LaunchConfig, PtyChild, PtyControl, PtyPair, WindowSize, launch};
//! use tokio::io::AsyncReadExt;
//!
//! let pair = PtyPair::allocate(WindowSize::new(80, 24))?;
//! let (master, slave) = pair.into_parts();
//! let mut child = launch(&LaunchConfig::builder("top").env("TERM", "xterm").build(), slave)?;
//!
//! let (mut reader, _writer, resizer) = master.into_split();
//! resizer.resize(WindowSize::new(120, 40))?;
//!
//! let mut buf = [0u8; 1024];
//! let n = reader.read(&mut buf).await?;
//! child.kill()?;
//! ```
//!
//! # Platform Support
//!
//! Unix only (Linux, macOS, BSDs), on `rustix`.

#[cfg(not(unix))]
compile_error!("termgate-pty only supports Unix platforms");

pub mod config;
pub mod error;
pub mod traits;
pub mod unix;

// Re-export primary types
pub use config::{LaunchConfig, LaunchConfigBuilder, PtySignal, WindowSize};
pub use error::{PtyError, Result};
pub use traits::{ExitStatus, PtyChild, PtyControl};
pub use unix::{
    PtyPair, PtyReader, PtyResizer, PtyWriter, UnixPtyChild, UnixPtyMaster, launch, spawn,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_size_conversion() {
        let size = WindowSize::from((120, 40));
        assert_eq!(size.cols, 120);
        assert_eq!(size.rows, 40);
    }

    #[test]
    fn default_launch_config_inherits_env() {
        let config = LaunchConfig::new("/bin/sh");
        assert!(config.inherit_env);
        assert!(config.args.is_empty());
    }
}
