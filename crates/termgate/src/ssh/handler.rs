//! Per-connection SSH handler.

use std::collections::HashMap;
use std::net::SocketAddr;

use russh::keys::PublicKey;
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId};
use termgate_pty::WindowSize;
use tokio::sync::watch;
use tokio_util::task::TaskTracker;

use super::channel::SshChannel;
use crate::client::{ClientInput, DEFAULT_PORT_CAPACITY, Delivery, open_port};
use crate::error::GatewayError;
use crate::session::{SessionHandler, SessionRequest, TerminalRequest};

/// State of one session channel.
#[derive(Debug)]
struct ChannelState {
    terminal: Option<TerminalRequest>,
    resizes: watch::Sender<WindowSize>,
    input: Option<ClientInput>,
    started: bool,
}

impl ChannelState {
    fn new() -> Self {
        Self {
            terminal: None,
            resizes: watch::Sender::new(WindowSize::default()),
            input: None,
            started: false,
        }
    }
}

/// Handles the requests of one SSH connection.
///
/// Sessions run on the server's [`TaskTracker`], so shutdown waits for them
/// even after the connection itself is gone.
pub struct ConnectionHandler {
    sessions: SessionHandler,
    tracker: TaskTracker,
    peer_addr: SocketAddr,
    channels: HashMap<ChannelId, ChannelState>,
}

impl ConnectionHandler {
    /// Create a handler for a connection from `peer_addr`.
    #[must_use]
    pub fn new(sessions: SessionHandler, tracker: TaskTracker, peer_addr: SocketAddr) -> Self {
        Self {
            sessions,
            tracker,
            peer_addr,
            channels: HashMap::new(),
        }
    }

    fn start_session(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), GatewayError> {
        let Some(state) = self.channels.get_mut(&channel) else {
            tracing::debug!(?channel, "start request on unknown channel");
            session.channel_failure(channel)?;
            return Ok(());
        };
        if state.started {
            tracing::debug!(?channel, "session already started on channel");
            session.channel_failure(channel)?;
            return Ok(());
        }

        let (stream, input, exit) = open_port(
            SshChannel::new(session.handle(), channel),
            DEFAULT_PORT_CAPACITY,
        );
        state.input = Some(input);
        state.started = true;

        let request = SessionRequest {
            remote_addr: self.peer_addr.to_string(),
            terminal: state.terminal.clone(),
            resizes: state.resizes.subscribe(),
        };
        session.channel_success(channel)?;

        let sessions = self.sessions.clone();
        self.tracker.spawn(async move {
            sessions.run(request, stream, exit).await;
        });
        Ok(())
    }
}

impl std::fmt::Debug for ConnectionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandler")
            .field("peer_addr", &self.peer_addr)
            .field("channels", &self.channels.len())
            .finish()
    }
}

impl Handler for ConnectionHandler {
    type Error = GatewayError;

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        tracing::debug!(remote = %self.peer_addr, user, method = "none", "authenticated");
        Ok(Auth::Accept)
    }

    async fn auth_password(&mut self, user: &str, _password: &str) -> Result<Auth, Self::Error> {
        tracing::debug!(remote = %self.peer_addr, user, method = "password", "authenticated");
        Ok(Auth::Accept)
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        _public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        tracing::debug!(remote = %self.peer_addr, user, method = "publickey", "authenticated");
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        tracing::debug!(remote = %self.peer_addr, channel = ?channel.id(), "session channel opened");
        self.channels.insert(channel.id(), ChannelState::new());
        Ok(true)
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let size = WindowSize::from_ssh(col_width, row_height, pix_width, pix_height);
        tracing::debug!(
            remote = %self.peer_addr,
            term,
            rows = size.rows,
            cols = size.cols,
            "terminal requested"
        );

        match self.channels.get_mut(&channel) {
            Some(state) if !state.started => {
                state.terminal = Some(TerminalRequest::new(term, size));
                state.resizes.send_replace(size);
                session.channel_success(channel)?;
            }
            _ => session.channel_failure(channel)?,
        }
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let size = WindowSize::from_ssh(col_width, row_height, pix_width, pix_height);
        if let Some(state) = self.channels.get_mut(&channel) {
            tracing::trace!(rows = size.rows, cols = size.cols, "window changed");
            if !state.started {
                if let Some(terminal) = &mut state.terminal {
                    terminal.size = size;
                }
            }
            state.resizes.send_replace(size);
        }
        Ok(())
    }

    async fn env_request(
        &mut self,
        _channel: ChannelId,
        variable_name: &str,
        _variable_value: &str,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::trace!(variable = variable_name, "ignoring env request");
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.start_session(channel, session)
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!(
            remote = %self.peer_addr,
            command = %String::from_utf8_lossy(data),
            "ignoring exec command, starting the configured program"
        );
        self.start_session(channel, session)
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(state) = self.channels.get_mut(&channel) {
            if let Some(input) = &state.input {
                match input.send(data) {
                    Delivery::Queued => {}
                    Delivery::Overflow => {
                        tracing::debug!(?channel, bytes = data.len(), "input queue full, dropping input");
                    }
                    Delivery::Closed => {
                        tracing::trace!(?channel, "session no longer reading input");
                    }
                }
            }
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!(?channel, "client sent EOF");
        if let Some(state) = self.channels.get_mut(&channel) {
            state.input = None;
        }
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!(?channel, "channel closed");
        self.channels.remove(&channel);
        Ok(())
    }
}
