//! Client sink for an SSH session channel.

use std::io;

use russh::server::Handle;
use russh::{ChannelId, CryptoVec};

use crate::client::ClientSink;

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "SSH channel closed")
}

/// Sends session output and the exit status over one SSH channel.
#[derive(Clone)]
pub struct SshChannel {
    handle: Handle,
    channel: ChannelId,
}

impl SshChannel {
    /// Wrap `channel` of the connection behind `handle`.
    #[must_use]
    pub const fn new(handle: Handle, channel: ChannelId) -> Self {
        Self { handle, channel }
    }
}

impl std::fmt::Debug for SshChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshChannel")
            .field("channel", &self.channel)
            .finish()
    }
}

impl ClientSink for SshChannel {
    async fn send_data(&self, data: &[u8]) -> io::Result<()> {
        self.handle
            .data(self.channel, CryptoVec::from_slice(data))
            .await
            .map_err(|_| closed())
    }

    async fn send_exit(&self, code: u32) -> io::Result<()> {
        self.handle
            .exit_status_request(self.channel, code)
            .await
            .map_err(|_| closed())?;
        self.handle.eof(self.channel).await.map_err(|_| closed())?;
        self.handle.close(self.channel).await.map_err(|_| closed())
    }
}
