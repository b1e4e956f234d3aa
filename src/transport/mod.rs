//! Transport layer for talking to the agent process
//!
//! A transport moves newline-delimited lines in both directions and reports
//! when the other side has gone away. The client never sees raw bytes.

pub mod subprocess;

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::Result;

/// Item produced by a transport's read side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One complete line, without the trailing newline
    Line(String),
    /// The read side ended; always the last event
    Closed {
        /// Exit code of the process, when known
        exit_code: Option<i32>,
    },
}

/// How to shut a transport down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// Close stdin, wait up to `grace` for the process to exit, then kill it
    Graceful {
        /// How long the process gets to exit on its own
        grace: Duration,
    },
    /// Kill immediately
    Force,
}

/// Transport trait for communicating with the agent
///
/// Implementations must be usable from a single owning task; the client never
/// shares a transport between tasks.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to the transport
    ///
    /// # Errors
    /// Returns `CliNotFound` when the program cannot be found, `Connection` for
    /// other spawn failures and `InvalidConfig` for rejected environment
    /// variables.
    async fn connect(&mut self) -> Result<()>;

    /// Write one line; the newline is appended by the transport
    ///
    /// # Errors
    /// Returns error if the write fails or the transport is not ready
    async fn write(&mut self, line: &str) -> Result<()>;

    /// End the input stream (close stdin)
    ///
    /// # Errors
    /// Returns error if closing fails
    async fn end_input(&mut self) -> Result<()>;

    /// Take the event receiver
    ///
    /// Spawns the background reader. The receiver yields lines in arrival
    /// order followed by exactly one [`TransportEvent::Closed`].
    ///
    /// # Errors
    /// Returns error if not connected or the receiver was already taken
    fn read_events(&mut self) -> Result<mpsc::UnboundedReceiver<TransportEvent>>;

    /// Check if transport is ready for communication
    fn is_ready(&self) -> bool;

    /// Close the transport and clean up resources
    ///
    /// # Errors
    /// Returns error if cleanup fails
    async fn close(&mut self, mode: CloseMode) -> Result<()>;
}

pub use subprocess::SubprocessTransport;
