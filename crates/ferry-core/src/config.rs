//! Pipeline configuration.
//!
//! Both ends must agree on the chunk size out of band; nothing here is
//! negotiated over the wire.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use ferry_files::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};

use crate::error::ConfigError;

/// Source used when none is given on the command line
pub const DEFAULT_SOURCE_PATH: &str = "testfile.bin";

/// Where the receiver writes a completed transfer
pub const DEFAULT_OUTPUT_PATH: &str = "received_output.bin";

/// Sender pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderConfig {
    /// Chunk size in bytes (default 64 MiB)
    pub chunk_size: usize,
    /// Read and hash the next chunk while the current one is sent
    pub read_ahead: bool,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            read_ahead: false,
        }
    }
}

impl SenderConfig {
    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ChunkSize` outside `1..=MAX_CHUNK_SIZE`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_chunk_size(self.chunk_size)
    }
}

/// What the receiver does with a chunk whose digest does not match
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MismatchPolicy {
    /// Fail the session; no output is written
    #[default]
    Abort,
    /// Drop the chunk, log it and keep going
    Skip,
}

impl FromStr for MismatchPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "skip" => Ok(Self::Skip),
            _ => Err(ConfigError::MismatchPolicy(s.to_string())),
        }
    }
}

impl fmt::Display for MismatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Abort => "abort",
            Self::Skip => "skip",
        })
    }
}

/// Receiver pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverConfig {
    /// Final location of the received file
    pub output_path: PathBuf,
    /// Digest mismatch handling
    pub mismatch_policy: MismatchPolicy,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
            mismatch_policy: MismatchPolicy::default(),
        }
    }
}

impl ReceiverConfig {
    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::OutputPath` for an empty path or one naming a
    /// directory.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output_path.as_os_str().is_empty() {
            return Err(ConfigError::OutputPath("empty path".into()));
        }
        if self.output_path.file_name().is_none() || self.output_path.is_dir() {
            return Err(ConfigError::OutputPath(format!(
                "{} is not a file path",
                self.output_path.display()
            )));
        }
        Ok(())
    }
}

fn validate_chunk_size(size: usize) -> Result<(), ConfigError> {
    if size == 0 || size > MAX_CHUNK_SIZE {
        return Err(ConfigError::ChunkSize {
            got: size,
            max: MAX_CHUNK_SIZE,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let sender = SenderConfig::default();
        assert_eq!(sender.chunk_size, 64 * 1024 * 1024);
        assert!(!sender.read_ahead);
        assert!(sender.validate().is_ok());

        let receiver = ReceiverConfig::default();
        assert_eq!(receiver.output_path, PathBuf::from("received_output.bin"));
        assert_eq!(receiver.mismatch_policy, MismatchPolicy::Abort);
        assert!(receiver.validate().is_ok());
    }

    #[test]
    fn test_chunk_size_bounds() {
        let mut config = SenderConfig::default();
        config.chunk_size = 0;
        assert!(config.validate().is_err());

        config.chunk_size = MAX_CHUNK_SIZE + 1;
        assert!(config.validate().is_err());

        config.chunk_size = MAX_CHUNK_SIZE;
        assert!(config.validate().is_ok());

        config.chunk_size = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_output_path_validation() {
        let dir = tempfile::tempdir().unwrap();

        let config = ReceiverConfig {
            output_path: dir.path().to_path_buf(),
            ..ReceiverConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ReceiverConfig {
            output_path: PathBuf::new(),
            ..ReceiverConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mismatch_policy_parse() {
        assert_eq!("abort".parse::<MismatchPolicy>(), Ok(MismatchPolicy::Abort));
        assert_eq!("SKIP".parse::<MismatchPolicy>(), Ok(MismatchPolicy::Skip));
        assert!("retry".parse::<MismatchPolicy>().is_err());
        assert_eq!(MismatchPolicy::Skip.to_string(), "skip");
    }
}
