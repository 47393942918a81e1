//! Fake PTY control path.

use std::sync::{Arc, Mutex, PoisonError};

use termgate_pty::{PtyControl, PtyError, WindowSize};
use tokio::sync::watch;

#[derive(Debug)]
struct State {
    size: WindowSize,
    applied: Vec<WindowSize>,
    open: bool,
}

/// A [`PtyControl`] that records every applied size.
///
/// Clones share state, so a test can keep one handle while the code under
/// test owns another.
#[derive(Debug, Clone)]
pub struct FakeControl {
    state: Arc<Mutex<State>>,
    last: Arc<watch::Sender<Option<WindowSize>>>,
}

impl FakeControl {
    /// Create an open control reporting `size`.
    #[must_use]
    pub fn new(size: WindowSize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                size,
                applied: Vec::new(),
                open: true,
            })),
            last: Arc::new(watch::Sender::new(None)),
        }
    }

    /// Every size applied so far, oldest first.
    #[must_use]
    pub fn applied(&self) -> Vec<WindowSize> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .applied
            .clone()
    }

    /// Wait until `size` is the most recently applied size.
    pub async fn wait_for(&self, size: WindowSize) {
        let mut rx = self.last.subscribe();
        let _ = rx.wait_for(|last| *last == Some(size)).await;
    }
}

impl PtyControl for FakeControl {
    fn resize(&self, size: WindowSize) -> termgate_pty::Result<()> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if !state.open {
                return Err(PtyError::Closed);
            }
            state.size = size;
            state.applied.push(size);
        }
        self.last.send_replace(Some(size));
        Ok(())
    }

    fn window_size(&self) -> termgate_pty::Result<WindowSize> {
        Ok(self.state.lock().unwrap_or_else(PoisonError::into_inner).size)
    }

    fn close(&self) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).open = false;
    }

    fn is_open(&self) -> bool {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).open
    }
}
