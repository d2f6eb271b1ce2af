//! # FERRY Transport
//!
//! Network transport layer for the FERRY protocol.
//!
//! This crate provides:
//! - A ZMTP 3.0 codec (greeting, READY handshake, multi-part frames)
//! - A bound PUSH socket with a bounded outstanding-message watermark
//! - A connecting PULL socket for the receiving side
//! - An explicit [`Context`] that owns socket background tasks and
//!   enforces close-then-terminate teardown

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod message;
pub mod pull;
pub mod push;
pub mod transport;
pub mod zmtp;

use std::net::SocketAddr;
use std::time::Duration;

pub use context::Context;
pub use message::Message;
pub use pull::PullSocket;
pub use push::PushSocket;
pub use transport::{MessageSink, MessageSource, TransportError, TransportResult, TransportStats};

/// Default port senders bind and receivers connect to
pub const DEFAULT_PORT: u16 = 5555;

/// Default outstanding-message watermark
pub const DEFAULT_SEND_WATERMARK: usize = 1000;

/// Upper bound accepted for the watermark
pub const MAX_SEND_WATERMARK: usize = 1_000_000;

/// Channel configuration
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Address the push side listens on
    pub bind_addr: SocketAddr,
    /// Address the pull side connects to
    pub connect_addr: SocketAddr,
    /// Messages queued before `send` blocks
    pub send_watermark: usize,
    /// How long terminating the context waits for queued messages
    /// (`None` = until delivered)
    pub linger: Option<Duration>,
    /// Delay between connection attempts on the pull side
    pub reconnect_interval: Duration,
    /// Give up connecting after this long (`None` = keep trying)
    pub connect_timeout: Option<Duration>,
    /// Largest single frame accepted from a peer
    pub max_frame_size: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            connect_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            send_watermark: DEFAULT_SEND_WATERMARK,
            linger: None,
            reconnect_interval: Duration::from_millis(100),
            connect_timeout: None,
            max_frame_size: 1024 * 1024 * 1024,
        }
    }
}

impl ChannelConfig {
    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidConfig` for out-of-range values.
    pub fn validate(&self) -> TransportResult<()> {
        if self.send_watermark == 0 || self.send_watermark > MAX_SEND_WATERMARK {
            return Err(TransportError::InvalidConfig(format!(
                "send watermark must be between 1 and {MAX_SEND_WATERMARK}, got {}",
                self.send_watermark
            )));
        }

        if self.reconnect_interval.is_zero() {
            return Err(TransportError::InvalidConfig(
                "reconnect interval must be non-zero".into(),
            ));
        }

        if self.max_frame_size == 0 {
            return Err(TransportError::InvalidConfig(
                "max frame size must be non-zero".into(),
            ));
        }

        Ok(())
    }
}
