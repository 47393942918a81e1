//! Relay engine.
//!
//! Copies bytes between a client stream and a PTY master in both directions at
//! once, while waiting on the child process and applying resize events through
//! a [`ResizeBridge`]. The copy loops start before the child can produce any
//! output, so a program that prints and exits immediately is still relayed.
//!
//! The first of these events ends the relay. A child exit wins ties.
//!
//! | event | follow-up |
//! |---|---|
//! | the child exits | drain PTY output for up to `drain_timeout` |
//! | the PTY side closes | wait up to `exit_grace` for the child |
//! | the client side closes | nothing, the child is reaped |
//! | shutdown is requested | nothing, the child is reaped |
//!
//! Teardown then cancels the resize bridge and closes the PTY control path,
//! so no resize is ever applied after the relay has ended, and finally reaps
//! the child with [`supervisor::reap`](crate::supervisor::reap).

use std::io;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use termgate_pty::{ExitStatus, PtyChild, PtyControl, WindowSize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::metrics::{Counter, GatewayMetrics};
use crate::resize::ResizeBridge;
use crate::supervisor;

/// Default time allowed to drain PTY output after the child exits.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Default time allowed for the child to exit once its PTY output closed.
pub const DEFAULT_EXIT_GRACE: Duration = Duration::from_millis(500);

/// Default time between SIGHUP and SIGKILL when reaping.
pub const DEFAULT_HANGUP_GRACE: Duration = Duration::from_secs(2);

/// Default copy buffer size per direction.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Relay timing and buffering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    /// How long PTY output is drained after the child exits.
    pub drain_timeout: Duration,
    /// How long to wait for the child once PTY output has closed.
    pub exit_grace: Duration,
    /// Time between SIGHUP and SIGKILL when reaping a running child.
    pub hangup_grace: Duration,
    /// Copy buffer size per direction.
    pub buffer_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            exit_grace: DEFAULT_EXIT_GRACE,
            hangup_grace: DEFAULT_HANGUP_GRACE,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl RelayConfig {
    /// Set the drain timeout.
    #[must_use]
    pub const fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Set the exit grace period.
    #[must_use]
    pub const fn exit_grace(mut self, grace: Duration) -> Self {
        self.exit_grace = grace;
        self
    }

    /// Set the hangup grace period.
    #[must_use]
    pub const fn hangup_grace(mut self, grace: Duration) -> Self {
        self.hangup_grace = grace;
        self
    }

    /// Set the copy buffer size.
    #[must_use]
    pub const fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }
}

/// The event that ended a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// The child process exited.
    ChildExited,
    /// The PTY stopped producing output or accepting input.
    OutputClosed,
    /// The client closed its input or stopped accepting output.
    InputClosed,
    /// The server is shutting down.
    Shutdown,
}

impl std::fmt::Display for RelayEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChildExited => write!(f, "child exited"),
            Self::OutputClosed => write!(f, "terminal closed"),
            Self::InputClosed => write!(f, "client closed"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Result of a finished relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOutcome {
    /// What ended the relay.
    pub end: RelayEnd,
    /// The child's exit status, if it was collected.
    pub exit_status: Option<ExitStatus>,
    /// Bytes copied from the PTY to the client.
    pub bytes_to_client: u64,
    /// Bytes copied from the client to the PTY.
    pub bytes_from_client: u64,
    /// Resize events applied to the PTY.
    pub resizes_applied: u64,
}

impl RelayOutcome {
    /// The exit status to report to the client.
    ///
    /// A signal death maps to 128 plus the signal number. An unknown status
    /// maps to 1.
    #[must_use]
    pub fn exit_code(&self) -> u32 {
        self.exit_status
            .and_then(|status| u32::try_from(status.shell_code()).ok())
            .unwrap_or(1)
    }
}

/// How one copy direction ended.
#[derive(Debug)]
enum PumpEnd {
    SourceClosed,
    SourceError(io::Error),
    SinkError(io::Error),
}

/// Copy from `reader` to `writer` until end-of-stream or an error, flushing
/// after every chunk.
async fn pump<R, W>(
    mut reader: R,
    mut writer: W,
    buffer_size: usize,
    total: &mut u64,
    counter: Option<&Counter>,
) -> PumpEnd
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return PumpEnd::SourceClosed,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return PumpEnd::SourceError(e),
        };

        if let Err(e) = writer.write_all(&buf[..n]).await {
            return PumpEnd::SinkError(e);
        }
        if let Err(e) = writer.flush().await {
            return PumpEnd::SinkError(e);
        }

        *total += n as u64;
        if let Some(counter) = counter {
            counter.add(n as u64);
        }
    }
}

/// Bidirectional relay between a client and a PTY.
///
/// `C` is the PTY's control handle, shared with the resize bridge.
pub struct Relay<C> {
    config: RelayConfig,
    control: C,
    resizes: watch::Receiver<WindowSize>,
    shutdown: CancellationToken,
    metrics: Option<Arc<GatewayMetrics>>,
}

impl<C> std::fmt::Debug for Relay<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("config", &self.config)
            .finish()
    }
}

impl<C> Relay<C>
where
    C: PtyControl + Clone + 'static,
{
    /// Create a relay.
    ///
    /// `resizes` carries the client's window size; `shutdown` ends the relay
    /// early when the server stops.
    #[must_use]
    pub const fn new(
        config: RelayConfig,
        control: C,
        resizes: watch::Receiver<WindowSize>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            control,
            resizes,
            shutdown,
            metrics: None,
        }
    }

    /// Count relayed bytes and resizes in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Relay until the session ends, then reap `child`.
    pub async fn run<S, PR, PW, K>(
        self,
        client: S,
        pty_reader: PR,
        pty_writer: PW,
        child: &mut K,
    ) -> RelayOutcome
    where
        S: AsyncRead + AsyncWrite + Unpin,
        PR: AsyncRead + Unpin,
        PW: AsyncWrite + Unpin,
        K: PtyChild + ?Sized,
    {
        let Self {
            config,
            control,
            resizes,
            shutdown,
            metrics,
        } = self;

        let session = shutdown.child_token();
        let mut bridge = ResizeBridge::new(control.clone(), resizes, session.clone());
        if let Some(metrics) = &metrics {
            bridge = bridge.with_metrics(Arc::clone(metrics));
        }
        let bridge = bridge.spawn();

        let (client_reader, client_writer) = tokio::io::split(client);
        let mut to_client = 0u64;
        let mut from_client = 0u64;

        let (end, mut exit_status) = {
            let mut output = pin!(pump(
                pty_reader,
                client_writer,
                config.buffer_size,
                &mut to_client,
                metrics.as_deref().map(|m| &m.bytes_to_clients),
            ));
            let mut input = pin!(pump(
                client_reader,
                pty_writer,
                config.buffer_size,
                &mut from_client,
                metrics.as_deref().map(|m| &m.bytes_from_clients),
            ));

            let (end, status) = tokio::select! {
                biased;

                status = child.wait() => {
                    match status {
                        Ok(status) => {
                            tracing::debug!(%status, "child exited");
                            (RelayEnd::ChildExited, Some(status))
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to wait for child");
                            (RelayEnd::ChildExited, None)
                        }
                    }
                }
                ended = output.as_mut() => {
                    match ended {
                        PumpEnd::SourceClosed => {
                            tracing::debug!("terminal output closed");
                            (RelayEnd::OutputClosed, None)
                        }
                        PumpEnd::SourceError(e) => {
                            tracing::debug!(error = %e, "terminal read failed");
                            (RelayEnd::OutputClosed, None)
                        }
                        PumpEnd::SinkError(e) => {
                            tracing::debug!(error = %e, "client write failed");
                            (RelayEnd::InputClosed, None)
                        }
                    }
                }
                ended = input.as_mut() => {
                    match ended {
                        PumpEnd::SourceClosed => {
                            tracing::debug!("client input closed");
                            (RelayEnd::InputClosed, None)
                        }
                        PumpEnd::SourceError(e) => {
                            tracing::debug!(error = %e, "client read failed");
                            (RelayEnd::InputClosed, None)
                        }
                        PumpEnd::SinkError(e) => {
                            tracing::debug!(error = %e, "terminal write failed");
                            (RelayEnd::OutputClosed, None)
                        }
                    }
                }
                () = shutdown.cancelled() => {
                    tracing::debug!("shutdown requested");
                    (RelayEnd::Shutdown, None)
                }
            };

            session.cancel();
            control.close();

            let status = match end {
                RelayEnd::ChildExited => {
                    if tokio::time::timeout(config.drain_timeout, output.as_mut())
                        .await
                        .is_err()
                    {
                        tracing::debug!("terminal output still open after drain timeout");
                    }
                    status
                }
                RelayEnd::OutputClosed => {
                    match tokio::time::timeout(config.exit_grace, child.wait()).await {
                        Ok(Ok(status)) => Some(status),
                        Ok(Err(e)) => {
                            tracing::debug!(error = %e, "failed to wait for child");
                            None
                        }
                        Err(_) => None,
                    }
                }
                RelayEnd::InputClosed | RelayEnd::Shutdown => None,
            };

            (end, status)
        };

        let resizes_applied = match bridge.await {
            Ok(report) => report.applied,
            Err(e) => {
                tracing::warn!(error = %e, "resize bridge task failed");
                0
            }
        };

        if exit_status.is_none() {
            exit_status = supervisor::reap(child, config.hangup_grace).await.status();
        }

        tracing::debug!(
            %end,
            bytes_out = to_client,
            bytes_in = from_client,
            resizes = resizes_applied,
            "relay finished"
        );

        RelayOutcome {
            end,
            exit_status,
            bytes_to_client: to_client,
            bytes_from_client: from_client,
            resizes_applied,
        }
    }
}
