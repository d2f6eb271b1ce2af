//! Configuration system for FERRY CLI.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use ferry_core::{
    DEFAULT_OUTPUT_PATH, DEFAULT_SOURCE_PATH, MismatchPolicy, ReceiverConfig, SenderConfig,
};
use ferry_transport::{ChannelConfig, MAX_SEND_WATERMARK};

/// FERRY configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Sender configuration
    pub transfer: TransferConfig,
    /// Channel configuration
    pub channel: ChannelSection,
    /// Receiver configuration
    pub receive: ReceiveConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Sender configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Chunk size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Read the next chunk while the current one is sent
    #[serde(default)]
    pub read_ahead: bool,
    /// File sent when none is named on the command line
    #[serde(default = "default_source")]
    pub source: PathBuf,
}

/// Channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSection {
    /// Sender listen address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Receiver connect address
    #[serde(default = "default_connect_addr")]
    pub connect_addr: String,
    /// Messages queued before sends block
    #[serde(default = "default_send_watermark")]
    pub send_watermark: usize,
    /// Shutdown flush limit in milliseconds; unset waits forever
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linger_ms: Option<u64>,
    /// Delay between receiver connection attempts
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    /// Give up connecting after this long; unset retries forever
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
}

/// Receiver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveConfig {
    /// Output file
    #[serde(default = "default_output")]
    pub output: PathBuf,
    /// `abort` or `skip`
    #[serde(default = "default_mismatch_policy")]
    pub mismatch_policy: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_chunk_size() -> usize {
    SenderConfig::default().chunk_size
}

fn default_source() -> PathBuf {
    PathBuf::from(DEFAULT_SOURCE_PATH)
}

fn default_bind_addr() -> String {
    ChannelConfig::default().bind_addr.to_string()
}

fn default_connect_addr() -> String {
    ChannelConfig::default().connect_addr.to_string()
}

fn default_send_watermark() -> usize {
    ChannelConfig::default().send_watermark
}

fn default_reconnect_interval_ms() -> u64 {
    100
}

fn default_output() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_PATH)
}

fn default_mismatch_policy() -> String {
    MismatchPolicy::default().to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            read_ahead: false,
            source: default_source(),
        }
    }
}

impl Default for ChannelSection {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            connect_addr: default_connect_addr(),
            send_watermark: default_send_watermark(),
            linger_ms: None,
            reconnect_interval_ms: default_reconnect_interval_ms(),
            connect_timeout_ms: None,
        }
    }
}

impl Default for ReceiveConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            mismatch_policy: default_mismatch_policy(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = self.to_toml()?;

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Render as TOML
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("ferry/config.toml")
    }

    /// Load config from default path, or create default if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.sender_config().validate()?;
        self.receiver_config()?.validate()?;
        self.channel_config()?;

        // Validate log level
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Sender pipeline settings
    #[must_use]
    pub fn sender_config(&self) -> SenderConfig {
        SenderConfig {
            chunk_size: self.transfer.chunk_size,
            read_ahead: self.transfer.read_ahead,
        }
    }

    /// Receiver pipeline settings
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown mismatch policy.
    pub fn receiver_config(&self) -> anyhow::Result<ReceiverConfig> {
        Ok(ReceiverConfig {
            output_path: self.receive.output.clone(),
            mismatch_policy: self.receive.mismatch_policy.parse()?,
        })
    }

    /// Channel settings
    ///
    /// # Errors
    ///
    /// Returns an error if an address does not parse or a bound is
    /// violated.
    pub fn channel_config(&self) -> anyhow::Result<ChannelConfig> {
        let section = &self.channel;

        if section.send_watermark == 0 || section.send_watermark > MAX_SEND_WATERMARK {
            anyhow::bail!("Send watermark must be between 1 and {MAX_SEND_WATERMARK}");
        }

        let config = ChannelConfig {
            bind_addr: parse_addr(&section.bind_addr, "bind_addr")?,
            connect_addr: parse_addr(&section.connect_addr, "connect_addr")?,
            send_watermark: section.send_watermark,
            linger: section.linger_ms.map(Duration::from_millis),
            reconnect_interval: Duration::from_millis(section.reconnect_interval_ms),
            connect_timeout: section.connect_timeout_ms.map(Duration::from_millis),
            ..ChannelConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}

fn parse_addr(addr: &str, name: &str) -> anyhow::Result<SocketAddr> {
    addr.parse()
        .with_context(|| format!("{name} '{addr}' is not an ip:port address"))
}
