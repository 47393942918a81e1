//! termgate: SSH gateway to an interactive terminal program
//!
//! Every SSH client that connects gets a fresh pseudo-terminal running a
//! single configured program (by default a Python flight simulator). The
//! gateway relays bytes in both directions, forwards window resizes, reports
//! the program's exit status and appends one line per session to a
//! connection log.
//!
//! # Components
//!
//! - [`ssh`]: listener, host key and per-connection request handling
//! - [`session`]: one session from terminal request to log entry
//! - [`relay`]: byte pumps between client and PTY, and end-of-session
//!   ordering
//! - [`resize`]: applies window-change events to the PTY
//! - [`supervisor`]: reaps the program (hangup, then kill)
//! - [`accounting`]: the connection log
//! - [`config`]: file, environment and command-line configuration
//!
//! The PTY itself lives in the `termgate-pty` crate.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use termgate::{Accountant, GatewayConfig, GatewayMetrics, GatewayServer, SessionHandler};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = GatewayConfig::default();
//! let metrics = Arc::new(GatewayMetrics::new());
//! let shutdown = CancellationToken::new();
//! let accountant = Accountant::new(&config.accounting.log_path).with_metrics(Arc::clone(&metrics));
//! let sessions = SessionHandler::new(config.session_settings(), accountant, metrics, shutdown.clone());
//!
//! let key = termgate::ssh::load_or_generate_host_key(&config.server.host_key, true)?;
//! let listener = termgate::ssh::bind(config.server.listen).await?;
//! GatewayServer::new(&config.server, key, sessions, shutdown).serve(listener).await?;
//! ```

#[cfg(not(unix))]
compile_error!("termgate only supports Unix platforms");

pub mod accounting;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod relay;
pub mod resize;
pub mod session;
pub mod ssh;
pub mod supervisor;

/// Fakes for exercising sessions without a PTY or an SSH connection.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use accounting::{Accountant, LogEntry, SessionRecord};
pub use client::{ClientExit, ClientInput, ClientSink, Delivery, PortExit, open_port};
pub use config::{ConfigLoader, EnvConfig, GatewayConfig, LogFormat};
pub use error::{GatewayError, Result, SessionError};
pub use metrics::{GatewayMetrics, MetricsSnapshot};
pub use relay::{Relay, RelayConfig, RelayEnd, RelayOutcome};
pub use resize::{BridgeExit, BridgeReport, ResizeBridge};
pub use session::{SessionHandler, SessionRequest, SessionSettings, SessionSummary, TerminalRequest};
pub use ssh::{ConnectionHandler, GatewayServer};
pub use supervisor::{ReapOutcome, reap};
