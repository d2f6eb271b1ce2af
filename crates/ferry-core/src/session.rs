//! Transfer session state machine.
//!
//! ```text
//! Init ──► Streaming ──► Finalizing ──► Done
//!   │          │             │
//!   └──────────┴─────────────┴────────► Failed
//! ```
//!
//! The sentinel may only be sent while `Finalizing`, which is reachable
//! only after the source has been read to the end without error.

use std::time::{Duration, Instant};

use crate::error::SessionError;

/// Sender pipeline states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    /// Opening the source and the channel
    Init,
    /// Sending data frames
    Streaming,
    /// Sending the sentinel
    Finalizing,
    /// Session complete, resources released
    Done,
    /// Fatal error; no sentinel will be sent
    Failed,
}

impl SenderState {
    /// True for `Done` and `Failed`
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Aggregate statistics of one sender session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferStats {
    /// Data frames sent
    pub chunks: u64,
    /// Payload bytes sent
    pub bytes: u64,
    /// Wall-clock time from `Init` to the end of the session
    pub elapsed: Duration,
    /// Source size if it could be queried
    pub source_size: Option<u64>,
}

impl TransferStats {
    /// Payload throughput in bytes per second
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 { self.bytes as f64 / secs } else { 0.0 }
    }
}

/// One sender session
#[derive(Debug)]
pub struct TransferSession {
    state: SenderState,
    started_at: Instant,
    finished_at: Option<Instant>,
    chunks: u64,
    bytes: u64,
    source_size: Option<u64>,
}

impl Default for TransferSession {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferSession {
    /// Start a session in `Init`
    pub fn new() -> Self {
        Self {
            state: SenderState::Init,
            started_at: Instant::now(),
            finished_at: None,
            chunks: 0,
            bytes: 0,
            source_size: None,
        }
    }

    /// Current state
    pub fn state(&self) -> SenderState {
        self.state
    }

    /// Check whether `to` is reachable from the current state
    pub fn can_transition(&self, to: SenderState) -> bool {
        use SenderState::*;

        match (self.state, to) {
            (Init, Streaming) | (Streaming, Finalizing) | (Finalizing, Done) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Move to a new state
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidTransition` if the transition is not
    /// allowed from the current state.
    pub fn transition_to(&mut self, to: SenderState) -> Result<(), SessionError> {
        if !self.can_transition(to) {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to,
            });
        }

        tracing::debug!(from = ?self.state, ?to, "sender state");
        self.state = to;
        if to.is_terminal() {
            self.finished_at = Some(Instant::now());
        }
        Ok(())
    }

    /// Enter `Failed` unless already terminal
    pub fn fail(&mut self) {
        if self.can_transition(SenderState::Failed) {
            // can_transition just confirmed this is allowed
            let _ = self.transition_to(SenderState::Failed);
        }
    }

    /// Record the best-effort source size
    pub fn set_source_size(&mut self, size: Option<u64>) {
        self.source_size = size;
    }

    /// Account for one data frame handed to the channel
    pub fn record_chunk(&mut self, len: usize) {
        self.chunks += 1;
        self.bytes += len as u64;
    }

    /// Payload bytes handed to the channel so far
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Snapshot of the session's counters
    pub fn stats(&self) -> TransferStats {
        let end = self.finished_at.unwrap_or_else(Instant::now);
        TransferStats {
            chunks: self.chunks,
            bytes: self.bytes,
            elapsed: end.duration_since(self.started_at),
            source_size: self.source_size,
        }
    }
}
