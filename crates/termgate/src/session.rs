//! Session handler.
//!
//! Runs one client session from start to finish:
//!
//! 1. Start the accounting record, so every path below produces exactly one
//!    log entry.
//! 2. Refuse the session when the client did not request a terminal.
//! 3. Allocate a PTY at the requested size and launch the program on it.
//! 4. Relay until the session ends, then reap the program.
//! 5. Report the exit status to the client and write the log entry.
//!
//! Failures before the relay starts are reported to the client as a single
//! line of text and exit status 1. Failures during the relay are silent.

use std::sync::Arc;

use termgate_pty::{LaunchConfig, PtyChild, PtyPair, WindowSize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::accounting::{Accountant, LogEntry, format_duration};
use crate::client::ClientExit;
use crate::error::SessionError;
use crate::metrics::GatewayMetrics;
use crate::relay::{Relay, RelayConfig, RelayOutcome};

/// Terminal type used when the client negotiates an empty one.
pub const DEFAULT_TERM: &str = "xterm-256color";

/// Line sent to clients that did not request a terminal.
pub const DEFAULT_NO_TERMINAL_MESSAGE: &str = "A terminal is required to play this game.";

/// Exit status reported for sessions that fail before the relay starts.
pub const FAILURE_EXIT_CODE: u32 = 1;

/// Allocates the PTY for a session.
pub type AllocateFn = fn(WindowSize) -> termgate_pty::Result<PtyPair>;

/// The terminal a client asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalRequest {
    /// Negotiated terminal type, such as `xterm-256color`.
    pub term: String,
    /// Initial window size.
    pub size: WindowSize,
}

impl TerminalRequest {
    /// Create a terminal request.
    pub fn new(term: impl Into<String>, size: WindowSize) -> Self {
        Self {
            term: term.into(),
            size,
        }
    }
}

/// Everything the transport supplies for one session.
#[derive(Debug)]
pub struct SessionRequest {
    /// Remote identity, used in the connection log.
    pub remote_addr: String,
    /// The requested terminal, if any.
    pub terminal: Option<TerminalRequest>,
    /// Latest window size reported by the client.
    pub resizes: watch::Receiver<WindowSize>,
}

/// What the session handler launches and how it relays.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// The program to run. `TERM` is added per session.
    pub launch: LaunchConfig,
    /// Terminal type used when the client sends an empty one.
    pub default_term: String,
    /// Line sent to clients that did not request a terminal.
    pub no_terminal_message: String,
    /// Relay timing.
    pub relay: RelayConfig,
}

impl SessionSettings {
    /// Settings that run `launch` with default terminal and relay settings.
    #[must_use]
    pub fn new(launch: LaunchConfig) -> Self {
        Self {
            launch,
            default_term: DEFAULT_TERM.to_string(),
            no_terminal_message: DEFAULT_NO_TERMINAL_MESSAGE.to_string(),
            relay: RelayConfig::default(),
        }
    }

    /// Set the fallback terminal type.
    #[must_use]
    pub fn default_term(mut self, term: impl Into<String>) -> Self {
        self.default_term = term.into();
        self
    }

    /// Set the message for clients without a terminal.
    #[must_use]
    pub fn no_terminal_message(mut self, message: impl Into<String>) -> Self {
        self.no_terminal_message = message.into();
        self
    }

    /// Set the relay configuration.
    #[must_use]
    pub const fn relay(mut self, relay: RelayConfig) -> Self {
        self.relay = relay;
        self
    }

    /// The launch configuration for a client that negotiated `term`.
    #[must_use]
    pub fn launch_config(&self, term: &str) -> LaunchConfig {
        let term = if term.is_empty() {
            self.default_term.as_str()
        } else {
            term
        };
        let mut config = self.launch.clone();
        config.env_add.insert("TERM".into(), term.into());
        config
    }
}

/// How a session ended.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    /// Exit status reported to the client.
    pub exit_code: u32,
    /// The relay outcome, when the relay ran.
    pub relay: Option<RelayOutcome>,
    /// The log entry, when it was written.
    pub log_entry: Option<LogEntry>,
}

/// Runs sessions.
///
/// Cheap to clone; every clone shares settings, metrics and the shutdown
/// token.
#[derive(Debug, Clone)]
pub struct SessionHandler {
    settings: Arc<SessionSettings>,
    accountant: Accountant,
    metrics: Arc<GatewayMetrics>,
    shutdown: CancellationToken,
    allocate: AllocateFn,
}

impl SessionHandler {
    /// Create a handler. Cancelling `shutdown` ends every running session.
    #[must_use]
    pub fn new(
        settings: SessionSettings,
        accountant: Accountant,
        metrics: Arc<GatewayMetrics>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            accountant,
            metrics,
            shutdown,
            allocate: PtyPair::allocate,
        }
    }

    /// Allocate PTYs with `allocate` instead of [`PtyPair::allocate`].
    #[must_use]
    pub const fn with_allocator(mut self, allocate: AllocateFn) -> Self {
        self.allocate = allocate;
        self
    }

    /// The handler's settings.
    #[must_use]
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// The shared metrics.
    #[must_use]
    pub const fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    /// Run one session over `client`, reporting the exit status through
    /// `exit`.
    ///
    /// Never fails: every error is handled inside the session.
    pub async fn run<S, E>(&self, request: SessionRequest, client: S, exit: E) -> SessionSummary
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
        E: ClientExit,
    {
        let span = tracing::info_span!("session", remote = %request.remote_addr);
        self.run_inner(request, client, exit).instrument(span).await
    }

    async fn run_inner<S, E>(&self, request: SessionRequest, mut client: S, exit: E) -> SessionSummary
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
        E: ClientExit,
    {
        let record = self.accountant.begin(request.remote_addr.as_str());
        self.metrics.sessions_started.inc();
        let active = self.metrics.sessions_active.track();
        tracing::info!("session started");

        let relay = match self.serve(request, &mut client).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::warn!(error = %e, "session refused");
                if let Some(message) = e.client_message(&self.settings.no_terminal_message) {
                    if let Err(e) = write_message(&mut client, &message).await {
                        tracing::debug!(error = %e, "failed to send message to client");
                    }
                }
                None
            }
        };

        let exit_code = relay.map_or(FAILURE_EXIT_CODE, |outcome| outcome.exit_code());
        drop(client);
        exit.exit(exit_code).await;
        drop(active);

        let log_entry = match tokio::task::spawn_blocking(move || record.finish()).await {
            Ok(Ok(entry)) => {
                tracing::info!(
                    exit_code,
                    duration = %format_duration(entry.duration().as_secs()),
                    "session ended"
                );
                Some(entry)
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, exit_code, "session ended, connection log not written");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, exit_code, "session ended, connection log task failed");
                None
            }
        };

        SessionSummary {
            exit_code,
            relay,
            log_entry,
        }
    }

    async fn serve<S>(
        &self,
        request: SessionRequest,
        client: &mut S,
    ) -> Result<RelayOutcome, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let Some(terminal) = request.terminal else {
            self.metrics.sessions_refused.inc();
            return Err(SessionError::NoTerminalRequested);
        };

        let pair = (self.allocate)(terminal.size).map_err(|e| {
            self.metrics.allocation_failures.inc();
            SessionError::Allocation(e)
        })?;
        let (master, slave) = pair.into_parts();

        let launch = self.settings.launch_config(&terminal.term);
        let mut child = termgate_pty::launch(&launch, slave).map_err(|e| {
            self.metrics.launch_failures.inc();
            SessionError::Launch(e)
        })?;
        tracing::info!(
            pid = child.pid(),
            program = %launch.program_name(),
            term = %terminal.term,
            rows = terminal.size.rows,
            cols = terminal.size.cols,
            "program started"
        );

        let (reader, writer, resizer) = master.into_split();
        let outcome = Relay::new(
            self.settings.relay,
            resizer,
            request.resizes,
            self.shutdown.clone(),
        )
        .with_metrics(Arc::clone(&self.metrics))
        .run(client, reader, writer, &mut child)
        .await;

        tracing::info!(
            end = %outcome.end,
            exit_code = outcome.exit_code(),
            bytes_out = outcome.bytes_to_client,
            bytes_in = outcome.bytes_from_client,
            resizes = outcome.resizes_applied,
            "program finished"
        );
        Ok(outcome)
    }
}

async fn write_message<S>(client: &mut S, message: &str) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    client.write_all(message.as_bytes()).await?;
    client.flush().await
}
