//! SSH connection dispatcher.
//!
//! Accepts SSH connections with `russh` and starts one session per session
//! channel that asks for a shell or a command. Authentication always
//! succeeds; the gateway serves a single public program.
//!
//! # Channel requests
//!
//! | request | effect |
//! |---|---|
//! | `pty-req` | records the terminal type and initial size |
//! | `window-change` | publishes the new size to the resize bridge |
//! | `shell`, `exec` | starts the session (the `exec` command is ignored) |
//! | `env` | ignored |
//!
//! When the session ends the channel receives `exit-status`, then EOF, then
//! close.

mod channel;
mod handler;
mod host_key;
mod server;

pub use channel::SshChannel;
pub use handler::ConnectionHandler;
pub use host_key::{generate_host_key, load_host_key, load_or_generate_host_key};
pub use server::{GatewayServer, bind};
