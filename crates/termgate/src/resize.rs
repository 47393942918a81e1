//! Resize bridge.
//!
//! Applies the client's window-change notifications to the PTY. Events arrive
//! through a [`watch`] channel, which holds only the latest size: when several
//! resizes land before the bridge gets to run, only the last one is applied.
//!
//! The bridge stops when the event source closes, when the session's
//! cancellation token fires, or when the PTY reports it is closed, whichever
//! happens first.

use std::sync::Arc;

use termgate_pty::{PtyControl, WindowSize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::metrics::GatewayMetrics;

/// Why the bridge stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeExit {
    /// The session was torn down.
    Cancelled,
    /// The transport dropped its end of the event channel.
    SourceClosed,
    /// The PTY stopped accepting control calls.
    PtyClosed,
}

/// Summary of a finished bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeReport {
    /// Number of sizes applied to the PTY.
    pub applied: u64,
    /// The last size applied, if any.
    pub last: Option<WindowSize>,
    /// Why the bridge stopped.
    pub exit: BridgeExit,
}

/// Consumes size notifications and applies them to a PTY.
pub struct ResizeBridge<C> {
    control: C,
    events: watch::Receiver<WindowSize>,
    cancel: CancellationToken,
    metrics: Option<Arc<GatewayMetrics>>,
}

impl<C> std::fmt::Debug for ResizeBridge<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResizeBridge")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl<C> ResizeBridge<C>
where
    C: PtyControl + 'static,
{
    /// Create a bridge from `events` to `control`, stopped by `cancel`.
    #[must_use]
    pub const fn new(
        control: C,
        events: watch::Receiver<WindowSize>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            control,
            events,
            cancel,
            metrics: None,
        }
    }

    /// Count applied resizes in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run until the source closes, the token fires, or the PTY closes.
    pub async fn run(mut self) -> BridgeReport {
        let mut applied = 0;
        let mut last = None;

        let exit = loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => break BridgeExit::Cancelled,

                changed = self.events.changed() => {
                    if changed.is_err() {
                        break BridgeExit::SourceClosed;
                    }

                    let size = *self.events.borrow_and_update();
                    match self.control.resize(size) {
                        Ok(()) => {
                            applied += 1;
                            last = Some(size);
                            if let Some(metrics) = &self.metrics {
                                metrics.resizes_applied.inc();
                            }
                            tracing::trace!(rows = size.rows, cols = size.cols, "applied resize");
                        }
                        Err(e) if e.is_closed() => {
                            tracing::debug!("PTY closed, stopping resize bridge");
                            break BridgeExit::PtyClosed;
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, rows = size.rows, cols = size.cols, "resize failed");
                        }
                    }
                }
            }
        };

        BridgeReport {
            applied,
            last,
            exit,
        }
    }

    /// Run the bridge on its own task.
    pub fn spawn(self) -> JoinHandle<BridgeReport> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeControl;
    use std::time::Duration;

    #[tokio::test]
    async fn applies_latest_size_only() {
        let control = FakeControl::new(WindowSize::new(80, 24));
        let (tx, rx) = watch::channel(WindowSize::new(80, 24));

        tx.send_replace(WindowSize::new(120, 40));
        tx.send_replace(WindowSize::new(50, 10));
        drop(tx);

        let report = ResizeBridge::new(control.clone(), rx, CancellationToken::new())
            .run()
            .await;

        assert_eq!(report.applied, 1);
        assert_eq!(report.last, Some(WindowSize::new(50, 10)));
        assert_eq!(report.exit, BridgeExit::SourceClosed);
        assert_eq!(control.applied(), vec![WindowSize::new(50, 10)]);
        assert_eq!(control.window_size().unwrap(), WindowSize::new(50, 10));
    }

    #[tokio::test]
    async fn applies_each_event_when_paced() {
        let control = FakeControl::new(WindowSize::new(80, 24));
        let (tx, rx) = watch::channel(WindowSize::new(80, 24));
        let handle = ResizeBridge::new(control.clone(), rx, CancellationToken::new()).spawn();

        for size in [WindowSize::new(100, 30), WindowSize::new(90, 20)] {
            tx.send_replace(size);
            control.wait_for(size).await;
        }
        drop(tx);

        let report = handle.await.unwrap();
        assert_eq!(report.applied, 2);
        assert_eq!(control.applied().last(), Some(&WindowSize::new(90, 20)));
    }

    #[tokio::test]
    async fn cancel_stops_bridge_without_applying() {
        let control = FakeControl::new(WindowSize::new(80, 24));
        let (tx, rx) = watch::channel(WindowSize::new(80, 24));
        let cancel = CancellationToken::new();

        cancel.cancel();
        tx.send_replace(WindowSize::new(10, 5));

        let report = ResizeBridge::new(control.clone(), rx, cancel).run().await;
        assert_eq!(report.exit, BridgeExit::Cancelled);
        assert_eq!(report.applied, 0);
        assert!(control.applied().is_empty());
        drop(tx);
    }

    #[tokio::test]
    async fn cancel_unblocks_idle_bridge() {
        let control = FakeControl::new(WindowSize::default());
        let (_tx, rx) = watch::channel(WindowSize::default());
        let cancel = CancellationToken::new();
        let handle = ResizeBridge::new(control, rx, cancel.clone()).spawn();

        cancel.cancel();
        let report = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.exit, BridgeExit::Cancelled);
    }

    #[tokio::test]
    async fn closed_pty_stops_bridge() {
        let control = FakeControl::new(WindowSize::default());
        let (tx, rx) = watch::channel(WindowSize::default());
        control.close();

        tx.send_replace(WindowSize::new(132, 43));
        let report = ResizeBridge::new(control.clone(), rx, CancellationToken::new())
            .run()
            .await;

        assert_eq!(report.exit, BridgeExit::PtyClosed);
        assert_eq!(report.applied, 0);
        drop(tx);
    }

    #[tokio::test]
    async fn counts_resizes_in_metrics() {
        let metrics = Arc::new(GatewayMetrics::new());
        let control = FakeControl::new(WindowSize::default());
        let (tx, rx) = watch::channel(WindowSize::default());
        tx.send_replace(WindowSize::new(100, 50));
        drop(tx);

        ResizeBridge::new(control, rx, CancellationToken::new())
            .with_metrics(Arc::clone(&metrics))
            .run()
            .await;
        assert_eq!(metrics.resizes_applied.get(), 1);
    }

    proptest::proptest! {
        #[test]
        fn last_write_wins(sizes in proptest::collection::vec((1u16..500, 1u16..200), 1..20)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let control = FakeControl::new(WindowSize::default());
                let (tx, rx) = watch::channel(WindowSize::default());
                for &(cols, rows) in &sizes {
                    tx.send_replace(WindowSize::new(cols, rows));
                }
                drop(tx);

                let report = ResizeBridge::new(control.clone(), rx, CancellationToken::new())
                    .run()
                    .await;

                let &(cols, rows) = sizes.last().unwrap();
                assert_eq!(report.applied, 1);
                assert_eq!(control.window_size().unwrap(), WindowSize::new(cols, rows));
            });
        }
    }
}
