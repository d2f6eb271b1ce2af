//! # FERRY Core
//!
//! Core protocol implementation for FERRY, a one-way chunked file
//! transfer over a PUSH/PULL message channel.
//!
//! This crate provides:
//! - Frame encoding and decoding (data frames and the END sentinel)
//! - Sender session state machine
//! - Sender and receiver pipelines
//! - Error types and handling
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  data frames, END  ┌───────────────┐
//! │    Sender    │ ─────────────────► │   Receiver    │
//! │ (PUSH, bind) │                    │(PULL, connect)│
//! ├──────────────┤                    ├───────────────┤
//! │ ChunkReader  │                    │ digest check  │
//! │ XXH64 digest │                    │ .part → out   │
//! └──────────────┘                    └───────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod frame;
pub mod receiver;
pub mod sender;
pub mod session;

pub use config::{
    DEFAULT_OUTPUT_PATH, DEFAULT_SOURCE_PATH, MismatchPolicy, ReceiverConfig, SenderConfig,
};
pub use error::{ConfigError, Error, FrameError, Result, SessionError};
pub use frame::{END_MARKER, Frame};
pub use receiver::{ReceiveStats, Receiver};
pub use sender::{ChunkEvent, Sender};
pub use session::{SenderState, TransferSession, TransferStats};
