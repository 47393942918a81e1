//! Recording client transport.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::client::ClientSink;

#[derive(Debug, Default)]
struct Recorded {
    output: Vec<u8>,
    exit_code: Option<u32>,
}

/// A [`ClientSink`] that records output and the exit status.
///
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    recorded: Arc<Mutex<Recorded>>,
    disconnected: Arc<AtomicBool>,
}

impl RecordingSink {
    /// Create a connected sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every later send, as if the client went away.
    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    /// Everything sent to the client so far.
    #[must_use]
    pub fn output(&self) -> Vec<u8> {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .output
            .clone()
    }

    /// Output decoded lossily as UTF-8.
    #[must_use]
    pub fn output_str(&self) -> String {
        String::from_utf8_lossy(&self.output()).into_owned()
    }

    /// The exit status delivered to the client, if any.
    #[must_use]
    pub fn exit_code(&self) -> Option<u32> {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .exit_code
    }

    fn check_connected(&self) -> io::Result<()> {
        if self.disconnected.load(Ordering::SeqCst) {
            Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "client disconnected",
            ))
        } else {
            Ok(())
        }
    }
}

impl ClientSink for RecordingSink {
    async fn send_data(&self, data: &[u8]) -> io::Result<()> {
        self.check_connected()?;
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .output
            .extend_from_slice(data);
        Ok(())
    }

    async fn send_exit(&self, code: u32) -> io::Result<()> {
        self.check_connected()?;
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .exit_code = Some(code);
        Ok(())
    }
}
