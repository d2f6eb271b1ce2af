//! Error types for the FERRY core protocol.
//!
//! Every error is fatal to the transfer session it occurs in. Nothing is
//! retried; the caller reports the error and exits.

use std::io;
use std::path::PathBuf;

use ferry_files::ChunkError;
use ferry_transport::TransportError;
use thiserror::Error;

use crate::session::SenderState;

/// Result alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core protocol errors
#[derive(Debug, Error)]
pub enum Error {
    /// Source file does not exist or is unreadable
    #[error("cannot open source {}: {source}", path.display())]
    SourceOpen {
        /// Path that failed to open
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Reading a chunk failed or its buffer could not be allocated
    #[error("chunk error: {0}")]
    Chunk(#[from] ChunkError),

    /// Channel bind, connect or send failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Malformed frame
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Session state machine misuse
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Invalid configuration
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// A chunk's payload does not match its digest
    #[error("digest mismatch in chunk {chunk}: expected {expected:016x}, computed {actual:016x}")]
    DigestMismatch {
        /// Index of the offending chunk
        chunk: u64,
        /// Digest carried by the frame
        expected: u64,
        /// Digest computed over the payload
        actual: u64,
    },

    /// Sender went away before the END sentinel
    #[error("transfer incomplete: connection closed after {chunks_received} chunks without END")]
    Incomplete {
        /// Data frames received before the connection dropped
        chunks_received: u64,
    },

    /// Writing the received output failed
    #[error("cannot write output {}: {source}", path.display())]
    Output {
        /// Output path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },
}

/// Frame-level errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Data frame with a zero-length payload
    #[error("data frame with empty payload")]
    EmptyPayload,

    /// Digest part is not exactly 8 bytes
    #[error("digest part is {0} bytes, expected 8")]
    BadDigestLength(usize),

    /// Message is neither a two-part data frame nor the END sentinel
    #[error("unexpected message shape: {parts} part(s)")]
    UnexpectedShape {
        /// Number of parts in the message
        parts: usize,
    },
}

/// Session-level errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Transition not allowed from the current state
    #[error("invalid transition {from:?} -> {to:?}")]
    InvalidTransition {
        /// Current state
        from: SenderState,
        /// Requested state
        to: SenderState,
    },
}

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Chunk size out of range
    #[error("chunk size must be between 1 and {max} bytes, got {got}")]
    ChunkSize {
        /// Configured value
        got: usize,
        /// Largest allowed value
        max: usize,
    },

    /// Output path unusable
    #[error("invalid output path: {0}")]
    OutputPath(String),

    /// Unknown digest mismatch policy
    #[error("unknown mismatch policy {0:?} (expected \"abort\" or \"skip\")")]
    MismatchPolicy(String),
}
