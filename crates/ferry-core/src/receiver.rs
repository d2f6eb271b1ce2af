//! Receiver pipeline.
//!
//! Pulls frames until the END sentinel, verifying each chunk's digest
//! and appending verified payloads to a `.part` file next to the output.
//! The temporary file is renamed onto the output path only once END has
//! arrived, so an interrupted transfer never leaves a truncated output
//! behind.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use ferry_files::digest;
use ferry_transport::{ChannelConfig, Context, MessageSource};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, error, info, warn};

use crate::config::{MismatchPolicy, ReceiverConfig};
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::sender::ChunkEvent;

/// Outcome of a completed receive
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveStats {
    /// Verified chunks written to the output
    pub chunks: u64,
    /// Verified payload bytes written
    pub bytes: u64,
    /// Chunks dropped on digest mismatch
    pub skipped: u64,
    /// Messages that were not valid frames
    pub malformed: u64,
    /// Time from the first receive call to END
    pub elapsed: Duration,
}

type Observer = Box<dyn FnMut(&ChunkEvent) + Send>;

/// Reassembles one transfer into the configured output file
pub struct Receiver {
    config: ReceiverConfig,
    observer: Option<Observer>,
}

impl Receiver {
    /// Create a receiver
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the output path is unusable.
    pub fn new(config: ReceiverConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            observer: None,
        })
    }

    /// Call `f` after every chunk written to the output
    #[must_use]
    pub fn on_chunk(mut self, f: impl FnMut(&ChunkEvent) + Send + 'static) -> Self {
        self.observer = Some(Box::new(f));
        self
    }

    /// Output path
    pub fn output_path(&self) -> &Path {
        &self.config.output_path
    }

    /// Connect a PULL socket and receive one transfer over it
    ///
    /// # Errors
    ///
    /// See [`receive`](Self::receive); also `Error::Transport` if the
    /// sender cannot be reached.
    pub async fn receive_from(&mut self, channel: &ChannelConfig) -> Result<ReceiveStats> {
        let ctx = Context::new();
        let mut socket = match ctx.connect_pull(channel).await {
            Ok(socket) => socket,
            Err(e) => {
                ctx.term().await;
                error!(error = %e, "cannot reach sender");
                return Err(e.into());
            }
        };

        let result = self.receive(&mut socket).await;

        drop(socket);
        ctx.term().await;
        result
    }

    /// Receive frames from `source` until END
    ///
    /// # Errors
    ///
    /// - `Error::Incomplete` if the source closes before END
    /// - `Error::DigestMismatch` under [`MismatchPolicy::Abort`]
    /// - `Error::Output` if the output cannot be written
    /// - `Error::Transport` on channel failure
    ///
    /// No output file exists after an error.
    pub async fn receive<S: MessageSource>(&mut self, source: &mut S) -> Result<ReceiveStats> {
        let temp = part_path(&self.config.output_path);
        let file = File::create(&temp).await.map_err(|source| Error::Output {
            path: temp.clone(),
            source,
        })?;
        let mut out = BufWriter::new(file);

        let started = Instant::now();
        let result = self.pump(source, &mut out, &temp).await;

        match result {
            Ok(mut stats) => {
                drop(out);
                fs::rename(&temp, &self.config.output_path)
                    .await
                    .map_err(|source| Error::Output {
                        path: self.config.output_path.clone(),
                        source,
                    })?;
                stats.elapsed = started.elapsed();
                info!(
                    path = %self.config.output_path.display(),
                    chunks = stats.chunks,
                    bytes = stats.bytes,
                    skipped = stats.skipped,
                    "transfer received"
                );
                Ok(stats)
            }
            Err(e) => {
                drop(out);
                if let Err(rm) = fs::remove_file(&temp).await {
                    debug!(path = %temp.display(), error = %rm, "cannot remove partial output");
                }
                error!(error = %e, "receive failed");
                Err(e)
            }
        }
    }

    async fn pump<S: MessageSource>(
        &mut self,
        source: &mut S,
        out: &mut BufWriter<File>,
        temp: &Path,
    ) -> Result<ReceiveStats> {
        let mut stats = ReceiveStats::default();
        let mut index = 0u64;
        let write_err = |source: std::io::Error| Error::Output {
            path: temp.to_path_buf(),
            source,
        };

        loop {
            let Some(msg) = source.recv().await? else {
                return Err(Error::Incomplete {
                    chunks_received: index,
                });
            };

            let (payload, expected) = match Frame::decode(msg) {
                Ok(Frame::End) => break,
                Ok(Frame::Data { payload, digest }) => (payload, digest),
                Err(e) => {
                    warn!(error = %e, "skipping malformed frame");
                    stats.malformed += 1;
                    continue;
                }
            };

            let chunk = index;
            index += 1;

            let actual = digest(&payload);
            if actual != expected {
                match self.config.mismatch_policy {
                    MismatchPolicy::Abort => {
                        return Err(Error::DigestMismatch {
                            chunk,
                            expected,
                            actual,
                        });
                    }
                    MismatchPolicy::Skip => {
                        warn!(
                            chunk,
                            expected = %format_args!("{expected:016x}"),
                            actual = %format_args!("{actual:016x}"),
                            "digest mismatch, chunk dropped"
                        );
                        stats.skipped += 1;
                        continue;
                    }
                }
            }

            out.write_all(&payload).await.map_err(write_err)?;
            stats.chunks += 1;
            stats.bytes += payload.len() as u64;
            debug!(chunk, bytes = payload.len(), "chunk verified");

            if let Some(observer) = self.observer.as_mut() {
                observer(&ChunkEvent {
                    index: chunk,
                    len: payload.len(),
                    digest: actual,
                    total_bytes: stats.bytes,
                });
            }
        }

        out.flush().await.map_err(write_err)?;
        out.get_ref().sync_all().await.map_err(write_err)?;
        Ok(stats)
    }
}

/// `<output>.part`
fn part_path(output: &Path) -> PathBuf {
    let mut name = OsString::from(output.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}
