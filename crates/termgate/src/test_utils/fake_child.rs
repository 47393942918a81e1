//! Fake child process.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use termgate_pty::{ExitStatus, PtyChild, PtyError, PtySignal};
use tokio::sync::watch;

/// A [`PtyChild`] whose exit is driven by the test.
///
/// The child runs until [`exit`](Self::exit) is called or it receives the
/// signal configured with [`exit_on`](Self::exit_on), in which case it dies
/// of that signal. Clones share state.
#[derive(Debug, Clone)]
pub struct FakeChild {
    status: Arc<watch::Sender<Option<ExitStatus>>>,
    signals: Arc<Mutex<Vec<PtySignal>>>,
    exit_on: Option<PtySignal>,
}

impl FakeChild {
    /// Process ID reported by every fake child.
    pub const PID: u32 = 4242;

    /// Create a running child that ignores every signal.
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: Arc::new(watch::Sender::new(None)),
            signals: Arc::new(Mutex::new(Vec::new())),
            exit_on: None,
        }
    }

    /// Die when `signal` is received.
    #[must_use]
    pub const fn exit_on(mut self, signal: PtySignal) -> Self {
        self.exit_on = Some(signal);
        self
    }

    /// Make the child exit with `status`.
    pub fn exit(&self, status: ExitStatus) {
        self.status.send_replace(Some(status));
    }

    /// Signals received so far, oldest first.
    #[must_use]
    pub fn signals(&self) -> Vec<PtySignal> {
        self.signals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for FakeChild {
    fn default() -> Self {
        Self::new()
    }
}

impl PtyChild for FakeChild {
    fn pid(&self) -> u32 {
        Self::PID
    }

    fn is_running(&self) -> bool {
        self.status.borrow().is_none()
    }

    fn wait(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = termgate_pty::Result<ExitStatus>> + Send + '_>> {
        let mut rx = self.status.subscribe();
        Box::pin(async move {
            let status = *rx
                .wait_for(Option::is_some)
                .await
                .map_err(|_| PtyError::NotRunning)?;
            status.ok_or(PtyError::NotRunning)
        })
    }

    fn try_wait(&mut self) -> termgate_pty::Result<Option<ExitStatus>> {
        Ok(*self.status.borrow())
    }

    fn signal(&self, signal: PtySignal) -> termgate_pty::Result<()> {
        if !self.is_running() {
            return Err(PtyError::NotRunning);
        }
        self.signals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(signal);
        if self.exit_on == Some(signal) {
            self.exit(ExitStatus::Signaled(signal.as_unix_signal()));
        }
        Ok(())
    }
}
