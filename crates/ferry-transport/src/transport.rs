//! Transport trait abstraction.
//!
//! The pipelines in `ferry-core` only ever push whole multi-part messages
//! into a [`MessageSink`] or pull them out of a [`MessageSource`]. The ZMTP
//! sockets implement both sides; tests substitute in-memory recorders.

use crate::message::Message;
use async_trait::async_trait;
use std::io;

/// Transport layer errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// I/O error from underlying transport
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Transport is closed
    #[error("Transport is closed")]
    Closed,

    /// Send queue is at its watermark
    #[error("Send queue is full")]
    Full,

    /// Address binding failed
    #[error("Failed to bind to address: {0}")]
    BindFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Greeting or READY exchange failed
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Peer violated the wire protocol
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// Peer socket type cannot talk to ours
    #[error("Incompatible peer: {local} cannot talk to {remote}")]
    IncompatibleSocket {
        /// Local socket type
        local: &'static str,
        /// Socket type announced by the peer
        remote: String,
    },

    /// Gave up waiting for the peer
    #[error("Timed out: {0}")]
    Timeout(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Outbound side of a channel.
///
/// `send` hands over one complete multi-part message. Implementations may
/// suspend the caller to apply backpressure, but must keep message order.
#[async_trait]
pub trait MessageSink: Send {
    /// Queue a message for delivery.
    ///
    /// # Errors
    /// Returns `TransportError::Closed` once the sink can no longer deliver.
    async fn send(&mut self, msg: Message) -> TransportResult<()>;

    /// Get transport statistics (optional).
    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

/// Inbound side of a channel.
#[async_trait]
pub trait MessageSource: Send {
    /// Receive the next complete message.
    ///
    /// Returns `Ok(None)` when the peer closed the connection cleanly
    /// between messages.
    ///
    /// # Errors
    /// Returns `TransportError` on I/O failure or a malformed stream.
    async fn recv(&mut self) -> TransportResult<Option<Message>>;

    /// Get transport statistics (optional).
    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

/// Transport statistics
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    /// Total payload bytes sent
    pub bytes_sent: u64,
    /// Total payload bytes received
    pub bytes_received: u64,
    /// Total messages sent
    pub messages_sent: u64,
    /// Total messages received
    pub messages_received: u64,
    /// Peers accepted or connected after the first one
    pub reconnects: u64,
}

impl TransportStats {
    /// Create new empty statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful send
    pub fn record_send(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
        self.messages_sent += 1;
    }

    /// Record a successful receive
    pub fn record_recv(&mut self, bytes: usize) {
        self.bytes_received += bytes as u64;
        self.messages_received += 1;
    }

    /// Record a peer change
    pub fn record_reconnect(&mut self) {
        self.reconnects += 1;
    }
}
