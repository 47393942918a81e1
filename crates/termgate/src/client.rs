//! Client channel plumbing.
//!
//! A transport delivers client bytes through callbacks and accepts output
//! through async sends. [`open_port`] turns that into a single byte stream
//! the relay can read and write, plus the handles the transport keeps:
//!
//! - [`ClientInput`] feeds received bytes into the stream. Dropping it is
//!   end-of-stream for the session.
//! - [`PortExit`] finishes the session: it waits until every byte the session
//!   wrote has been handed to the transport, then reports the exit status.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Default capacity of the in-memory stream between a port and its session.
pub const DEFAULT_PORT_CAPACITY: usize = 64 * 1024;

/// The transport-side operations a session needs.
pub trait ClientSink: Send + Sync + 'static {
    /// Send program output to the client.
    fn send_data(&self, data: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Report the exit status and close the channel.
    fn send_exit(&self, code: u32) -> impl Future<Output = io::Result<()>> + Send;
}

/// Ends a session from the session's side.
pub trait ClientExit: Send {
    /// Report `code` to the client and close the channel.
    fn exit(self, code: u32) -> impl Future<Output = ()> + Send;
}

/// What happened to bytes handed to [`ClientInput::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued for the session.
    Queued,
    /// Dropped: the session has not consumed earlier input yet.
    Overflow,
    /// Dropped: the session has stopped reading input.
    Closed,
}

impl Delivery {
    /// Whether the bytes were queued.
    #[must_use]
    pub const fn is_queued(self) -> bool {
        matches!(self, Self::Queued)
    }
}

/// Feeds bytes received from the client into a session.
///
/// Never blocks: the transport's callback must not wait on the session,
/// whose output goes back through the same transport. Queued bytes are
/// bounded by a budget; input arriving while the budget is used up is
/// dropped, as keystrokes typed at a program that does not read them.
#[derive(Debug, Clone)]
pub struct ClientInput {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    queued: Arc<AtomicUsize>,
    budget: usize,
}

impl ClientInput {
    /// Queue `data` for the session.
    pub fn send(&self, data: &[u8]) -> Delivery {
        if self.tx.is_closed() {
            return Delivery::Closed;
        }

        let reserved = self
            .queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |queued| {
                queued
                    .checked_add(data.len())
                    .filter(|&total| total <= self.budget)
            });
        if reserved.is_err() {
            return Delivery::Overflow;
        }

        if self.tx.send(data.to_vec()).is_err() {
            self.queued.fetch_sub(data.len(), Ordering::AcqRel);
            return Delivery::Closed;
        }
        Delivery::Queued
    }

    /// Bytes queued but not yet written to the session's stream.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }
}

/// Connect `sink` to a new session stream with room for `capacity` bytes in
/// each direction.
///
/// Client input is additionally queued up to `capacity` bytes; a single
/// chunk larger than that is always dropped.
///
/// Returns the session's end of the stream, the input handle for the
/// transport and the exit handle for the session. Must be called inside a
/// tokio runtime.
pub fn open_port<K: ClientSink>(
    sink: K,
    capacity: usize,
) -> (DuplexStream, ClientInput, PortExit<K>) {
    let (session_end, port_end) = tokio::io::duplex(capacity);
    let (mut port_reader, mut port_writer) = tokio::io::split(port_end);
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let queued = Arc::new(AtomicUsize::new(0));
    let sink = Arc::new(sink);

    let inbound = tokio::spawn({
        let queued = Arc::clone(&queued);
        async move {
            while let Some(data) = rx.recv().await {
                let written = port_writer.write_all(&data).await;
                queued.fetch_sub(data.len(), Ordering::AcqRel);
                if written.is_err() {
                    rx.close();
                    return;
                }
            }
            let _ = port_writer.shutdown().await;
        }
    });

    let outbound = tokio::spawn({
        let sink = Arc::clone(&sink);
        async move {
            let mut buf = vec![0u8; 8192];
            let mut connected = true;
            loop {
                let n = match port_reader.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                // Keep draining after the client is gone so the session
                // never blocks on a full stream.
                if connected {
                    if let Err(e) = sink.send_data(&buf[..n]).await {
                        tracing::debug!(error = %e, "client stopped accepting output");
                        connected = false;
                    }
                }
            }
        }
    });

    (
        session_end,
        ClientInput {
            tx,
            queued,
            budget: capacity,
        },
        PortExit {
            sink,
            inbound,
            outbound,
        },
    )
}

/// Exit handle returned by [`open_port`].
pub struct PortExit<K> {
    sink: Arc<K>,
    inbound: JoinHandle<()>,
    outbound: JoinHandle<()>,
}

impl<K> std::fmt::Debug for PortExit<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortExit")
            .field("flushed", &self.outbound.is_finished())
            .finish()
    }
}

impl<K: ClientSink> ClientExit for PortExit<K> {
    /// The session must have dropped its end of the stream, otherwise this
    /// waits until it does.
    async fn exit(self, code: u32) {
        if let Err(e) = self.outbound.await {
            tracing::warn!(error = %e, "client output task failed");
        }
        self.inbound.abort();
        let _ = self.inbound.await;

        if let Err(e) = self.sink.send_exit(code).await {
            tracing::debug!(error = %e, exit_code = code, "failed to deliver exit status");
        }
    }
}
