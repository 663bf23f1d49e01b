//! Transport abstraction traits.
//!
//! Sessions only see these traits, which keeps them independent of the
//! WebSocket library and lets tests drive them in memory.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Something read from a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// One encoded message.
    Frame(Bytes),
    /// Transport-level keepalive (ping or pong). Carries no message but
    /// proves the peer is alive.
    Heartbeat,
}

/// The read half of a connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Receive the next item from the connection.
    ///
    /// Returns `None` if the connection was closed cleanly.
    async fn recv(&mut self) -> Result<Option<Incoming>, TransportError>;
}

/// The write half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one pre-encoded frame.
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError>;

    /// Send a transport-level ping.
    async fn ping(&mut self) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;
}
