//! Test utilities for termgate.
//!
//! Fakes for the seams a session is written against: the PTY control path,
//! the child process and the client transport. They let the resize bridge,
//! the relay and the session handler be exercised without a real PTY or SSH
//! connection.

mod fake_child;
mod fake_control;
mod recording_sink;

pub use fake_child::FakeChild;
pub use fake_control::FakeControl;
pub use recording_sink::RecordingSink;
