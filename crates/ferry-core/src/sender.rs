//! Sender pipeline.
//!
//! Reads the source chunk by chunk, digests each chunk, encodes it as a
//! data frame and pushes it onto the channel, then finishes with exactly
//! one END sentinel. Every step for a chunk completes before the next
//! chunk is read unless read-ahead is enabled, in which case a producer
//! task reads and digests one chunk ahead through a single-slot handoff.
//! The producer claims the slot before it reads, so at most two chunks are
//! resident: the one being sent and the one waiting in the slot.
//!
//! Any error moves the session to [`SenderState::Failed`] and the
//! sentinel is never sent.

use std::io;
use std::path::Path;
use std::time::{Duration, Instant};

use ferry_files::{Chunk, ChunkError, ChunkReader, digest};
use ferry_transport::{ChannelConfig, Context, MessageSink};
use tokio::fs::File;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::SenderConfig;
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::session::{SenderState, TransferSession, TransferStats};

/// Emitted after each data frame is handed to the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkEvent {
    /// Chunk index
    pub index: u64,
    /// Payload length
    pub len: usize,
    /// Payload digest
    pub digest: u64,
    /// Payload bytes so far, this chunk included
    pub total_bytes: u64,
}

type Observer = Box<dyn FnMut(&ChunkEvent) + Send>;

/// A chunk with its digest and the time hashing took
struct Digested {
    chunk: Chunk,
    digest: u64,
    hash_time: Duration,
}

impl Digested {
    fn of(chunk: Chunk) -> Self {
        let start = Instant::now();
        let value = digest(&chunk.data);
        Self {
            chunk,
            digest: value,
            hash_time: start.elapsed(),
        }
    }
}

/// Drives one transfer session at a time
pub struct Sender {
    config: SenderConfig,
    session: TransferSession,
    observer: Option<Observer>,
}

impl Sender {
    /// Create a sender
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the configuration is invalid.
    pub fn new(config: SenderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            session: TransferSession::new(),
            observer: None,
        })
    }

    /// Call `f` after every data frame
    #[must_use]
    pub fn on_chunk(mut self, f: impl FnMut(&ChunkEvent) + Send + 'static) -> Self {
        self.observer = Some(Box::new(f));
        self
    }

    /// State of the current (or last) session
    pub fn state(&self) -> SenderState {
        self.session.state()
    }

    /// Counters of the current (or last) session
    pub fn stats(&self) -> TransferStats {
        self.session.stats()
    }

    /// Run a complete session over a freshly bound PUSH channel.
    ///
    /// The source is opened before the channel is bound. The socket is
    /// closed and the context terminated on every path out of the
    /// session, in that order. A failed session discards whatever is still
    /// queued instead of waiting for a receiver to drain it.
    ///
    /// # Errors
    ///
    /// Returns `Error::SourceOpen` if the source cannot be opened,
    /// `Error::Transport` if the channel cannot be bound or fed, and
    /// `Error::Chunk` if reading fails.
    pub async fn send_file(&mut self, path: &Path, channel: &ChannelConfig) -> Result<TransferStats> {
        self.session = TransferSession::new();

        let file = match self.open_source(path).await {
            Ok(file) => file,
            Err(e) => return Err(self.abort(e)),
        };

        self.serve(file, channel).await
    }

    async fn serve<R>(&mut self, source: R, channel: &ChannelConfig) -> Result<TransferStats>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let ctx = Context::new();
        let mut socket = match ctx.bind_push(channel).await {
            Ok(socket) => socket,
            Err(e) => {
                drop(source);
                ctx.term().await;
                return Err(self.abort(e.into()));
            }
        };
        info!(addr = %socket.local_addr(), "channel ready");

        let result = self.stream(source, &mut socket).await;

        socket.close();
        match result {
            Ok(()) => {
                ctx.term().await;
                self.finish()
            }
            Err(e) => {
                // No END will follow, so a receiver ends up incomplete either way
                ctx.term_now();
                Err(e)
            }
        }
    }

    /// Open `path` and stream it into `sink`
    ///
    /// # Errors
    ///
    /// See [`send_file`](Self::send_file); no channel is set up here.
    pub async fn send_path<S: MessageSink>(&mut self, path: &Path, sink: &mut S) -> Result<TransferStats> {
        self.session = TransferSession::new();

        let file = match self.open_source(path).await {
            Ok(file) => file,
            Err(e) => return Err(self.abort(e)),
        };

        self.stream(file, sink).await?;
        self.finish()
    }

    /// Stream an already open source into `sink`
    ///
    /// # Errors
    ///
    /// Returns `Error::Chunk` on read failure and `Error::Transport` if the
    /// sink rejects a frame.
    pub async fn send_reader<R, S>(&mut self, source: R, sink: &mut S) -> Result<TransferStats>
    where
        R: AsyncRead + Unpin + Send + 'static,
        S: MessageSink,
    {
        self.session = TransferSession::new();
        self.stream(source, sink).await?;
        self.finish()
    }

    async fn open_source(&mut self, path: &Path) -> Result<File> {
        let open_err = |source: io::Error| Error::SourceOpen {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).await.map_err(open_err)?;

        let size = match file.metadata().await {
            Ok(meta) if meta.is_dir() => {
                return Err(open_err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "source is a directory",
                )));
            }
            Ok(meta) => Some(meta.len()),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot query source size");
                None
            }
        };
        self.session.set_source_size(size);

        info!(path = %path.display(), size = ?size, "source opened");
        Ok(file)
    }

    async fn stream<R, S>(&mut self, source: R, sink: &mut S) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        S: MessageSink,
    {
        let result = self.stream_frames(source, sink).await;
        match result {
            Ok(()) => Ok(()),
            Err(e) => Err(self.abort(e)),
        }
    }

    async fn stream_frames<R, S>(&mut self, source: R, sink: &mut S) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        S: MessageSink,
    {
        let reader = ChunkReader::with_chunk_size(source, self.config.chunk_size)?;
        self.session.transition_to(SenderState::Streaming)?;

        if self.config.read_ahead {
            self.pump_read_ahead(reader, sink).await?;
        } else {
            self.pump_sequential(reader, sink).await?;
        }

        self.session.transition_to(SenderState::Finalizing)?;
        sink.send(Frame::End.encode()).await?;
        info!(chunks = self.session.stats().chunks, "END sentinel sent");
        Ok(())
    }

    async fn pump_sequential<R, S>(&mut self, mut reader: ChunkReader<R>, sink: &mut S) -> Result<()>
    where
        R: AsyncRead + Unpin,
        S: MessageSink,
    {
        while let Some(chunk) = reader.next_chunk().await? {
            self.send_chunk(sink, Digested::of(chunk)).await?;
        }
        Ok(())
    }

    async fn pump_read_ahead<R, S>(&mut self, mut reader: ChunkReader<R>, sink: &mut S) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        S: MessageSink,
    {
        let (tx, mut rx) = mpsc::channel::<std::result::Result<Digested, ChunkError>>(1);

        let producer = tokio::spawn(async move {
            loop {
                // Hold the slot before reading so only one chunk waits in it
                let Ok(permit) = tx.reserve().await else {
                    return;
                };
                match reader.next_chunk().await {
                    Ok(Some(chunk)) => permit.send(Ok(Digested::of(chunk))),
                    Ok(None) => return,
                    Err(e) => {
                        permit.send(Err(e));
                        return;
                    }
                }
            }
        });

        let mut result = Ok(());
        while let Some(item) = rx.recv().await {
            let sent = match item {
                Ok(digested) => self.send_chunk(sink, digested).await,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = sent {
                result = Err(e);
                break;
            }
        }
        drop(rx);

        if result.is_ok() {
            // A dead producer also closes the handoff; that is not exhaustion
            if let Err(e) = producer.await {
                return Err(ChunkError::Read {
                    offset: self.session.bytes(),
                    source: io::Error::other(e.to_string()),
                }
                .into());
            }
        } else {
            producer.abort();
        }
        result
    }

    async fn send_chunk<S: MessageSink>(&mut self, sink: &mut S, digested: Digested) -> Result<()> {
        let Digested {
            chunk,
            digest: d,
            hash_time,
        } = digested;
        let index = chunk.index;
        let len = chunk.len();

        sink.send(Frame::data(chunk.data, d).encode()).await?;
        self.session.record_chunk(len);

        debug!(
            chunk = index,
            bytes = len,
            digest = %format_args!("{d:016x}"),
            hash_us = hash_time.as_micros() as u64,
            "chunk sent"
        );

        if let Some(observer) = self.observer.as_mut() {
            observer(&ChunkEvent {
                index,
                len,
                digest: d,
                total_bytes: self.session.bytes(),
            });
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<TransferStats> {
        self.session.transition_to(SenderState::Done)?;
        let stats = self.session.stats();
        info!(
            chunks = stats.chunks,
            bytes = stats.bytes,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "transfer complete"
        );
        Ok(stats)
    }

    fn abort(&mut self, e: Error) -> Error {
        self.session.fail();
        error!(error = %e, chunks = self.session.stats().chunks, "transfer failed");
        e
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ferry_files::verify;
    use ferry_transport::{Message, TransportError, TransportResult};
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::task::{Context as TaskContext, Poll};
    use tokio::io::ReadBuf;

    #[derive(Default)]
    struct RecordingSink {
        messages: Vec<Message>,
        accept: Option<usize>,
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn send(&mut self, msg: Message) -> TransportResult<()> {
            if self.accept.is_some_and(|n| self.messages.len() >= n) {
                return Err(TransportError::Closed);
            }
            self.messages.push(msg);
            Ok(())
        }
    }

    impl RecordingSink {
        fn frames(&self) -> Vec<Frame> {
            self.messages
                .iter()
                .cloned()
                .map(|m| Frame::decode(m).unwrap())
                .collect()
        }
    }

    /// Yields `good` bytes, then fails
    struct Broken {
        good: usize,
    }

    impl AsyncRead for Broken {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut TaskContext<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.good == 0 {
                return Poll::Ready(Err(io::Error::other("bad sector")));
            }
            let n = self.good.min(buf.remaining());
            buf.put_slice(&vec![0x11; n]);
            self.good -= n;
            Poll::Ready(Ok(()))
        }
    }

    /// Serves `remaining` bytes, counting how many were handed out
    struct Counting {
        remaining: usize,
        served: Arc<AtomicUsize>,
    }

    impl AsyncRead for Counting {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut TaskContext<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            let n = self.remaining.min(buf.remaining());
            buf.put_slice(&vec![0x22; n]);
            self.remaining -= n;
            self.served.fetch_add(n, Ordering::SeqCst);
            Poll::Ready(Ok(()))
        }
    }

    /// Never accepts a frame
    struct StalledSink;

    #[async_trait]
    impl MessageSink for StalledSink {
        async fn send(&mut self, _msg: Message) -> TransportResult<()> {
            std::future::pending().await
        }
    }

    fn sender(chunk_size: usize, read_ahead: bool) -> Sender {
        Sender::new(SenderConfig {
            chunk_size,
            read_ahead,
        })
        .unwrap()
    }

    fn payload_lens(frames: &[Frame]) -> Vec<usize> {
        frames
            .iter()
            .filter_map(|f| match f {
                Frame::Data { payload, .. } => Some(payload.len()),
                Frame::End => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_empty_source_sends_only_end() {
        for read_ahead in [false, true] {
            let mut sink = RecordingSink::default();
            let stats = sender(4, read_ahead)
                .send_reader(std::io::Cursor::new(Vec::new()), &mut sink)
                .await
                .unwrap();

            assert_eq!(sink.frames(), vec![Frame::End]);
            assert_eq!(stats.chunks, 0);
        }
    }

    #[tokio::test]
    async fn test_exact_chunk() {
        let mut sink = RecordingSink::default();
        let mut s = sender(4, false);
        s.send_reader(std::io::Cursor::new(b"abcd".to_vec()), &mut sink)
            .await
            .unwrap();

        let frames = sink.frames();
        assert_eq!(payload_lens(&frames), vec![4]);
        assert_eq!(frames.last(), Some(&Frame::End));
        assert_eq!(s.state(), SenderState::Done);
    }

    #[tokio::test]
    async fn test_one_byte_over() {
        for read_ahead in [false, true] {
            let mut sink = RecordingSink::default();
            sender(4, read_ahead)
                .send_reader(std::io::Cursor::new(b"abcde".to_vec()), &mut sink)
                .await
                .unwrap();

            let frames = sink.frames();
            assert_eq!(payload_lens(&frames), vec![4, 1]);
            assert_eq!(frames.len(), 3);
            assert!(frames[2].is_end());
        }
    }

    #[tokio::test]
    async fn test_digests_match_payloads() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i * 7) as u8).collect();
        let mut sink = RecordingSink::default();
        sender(64, false)
            .send_reader(std::io::Cursor::new(data.clone()), &mut sink)
            .await
            .unwrap();

        let mut joined = Vec::new();
        for frame in sink.frames() {
            if let Frame::Data { payload, digest } = frame {
                assert!(verify(&payload, digest));
                joined.extend_from_slice(&payload);
            }
        }
        assert_eq!(joined, data);
    }

    #[tokio::test]
    async fn test_read_failure_suppresses_end() {
        for read_ahead in [false, true] {
            let mut sink = RecordingSink::default();
            let mut s = sender(4, read_ahead);
            let err = s
                .send_reader(Broken { good: 9 }, &mut sink)
                .await
                .unwrap_err();

            assert!(matches!(err, Error::Chunk(ChunkError::Read { offset: 8, .. })));
            assert_eq!(s.state(), SenderState::Failed);

            let frames = sink.frames();
            assert_eq!(payload_lens(&frames), vec![4, 4]);
            assert!(!frames.iter().any(Frame::is_end));
        }
    }

    #[tokio::test]
    async fn test_unreadable_path_sends_nothing() {
        let mut sink = RecordingSink::default();
        let mut s = sender(4, false);
        let err = s
            .send_path(Path::new("/nonexistent/ferry/source.bin"), &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::SourceOpen { .. }));
        assert!(sink.messages.is_empty());
        assert_eq!(s.state(), SenderState::Failed);
    }

    #[tokio::test]
    async fn test_directory_is_not_a_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = RecordingSink::default();
        let err = sender(4, false)
            .send_path(dir.path(), &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::SourceOpen { .. }));
        assert!(sink.messages.is_empty());
    }

    #[tokio::test]
    async fn test_sink_failure_is_fatal() {
        let mut sink = RecordingSink {
            accept: Some(1),
            ..RecordingSink::default()
        };
        let mut s = sender(2, false);
        let err = s
            .send_reader(std::io::Cursor::new(vec![0u8; 10]), &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Transport(TransportError::Closed)));
        assert_eq!(sink.messages.len(), 1);
        assert_eq!(s.state(), SenderState::Failed);
    }

    #[tokio::test]
    async fn test_source_size_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("source.bin");
        std::fs::write(&path, vec![1u8; 10]).unwrap();

        let mut sink = RecordingSink::default();
        let stats = sender(3, false).send_path(&path, &mut sink).await.unwrap();

        assert_eq!(stats.source_size, Some(10));
        assert_eq!(stats.bytes, 10);
        assert_eq!(stats.chunks, 4);
    }

    #[tokio::test]
    async fn test_observer_sees_every_chunk() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let mut s = sender(3, true).on_chunk(move |event| {
            sink_seen.lock().unwrap().push(*event);
        });

        let mut sink = RecordingSink::default();
        s.send_reader(std::io::Cursor::new(vec![5u8; 7]), &mut sink)
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        let indexes: Vec<u64> = seen.iter().map(|e| e.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
        assert_eq!(seen.last().map(|e| e.total_bytes), Some(7));
    }

    #[tokio::test]
    async fn test_read_ahead_holds_one_chunk_in_the_slot() {
        let served = Arc::new(AtomicUsize::new(0));
        let source = Counting {
            remaining: 160,
            served: Arc::clone(&served),
        };

        let mut s = sender(16, true);
        let mut sink = StalledSink;
        let stalled =
            tokio::time::timeout(Duration::from_millis(200), s.send_reader(source, &mut sink)).await;
        assert!(stalled.is_err());

        // Chunk 0 is stuck in the sink and chunk 1 waits in the slot
        assert_eq!(served.load(Ordering::SeqCst), 32);
    }

    #[tokio::test]
    async fn test_failed_session_does_not_wait_for_receiver() {
        let channel = ChannelConfig {
            bind_addr: std::net::SocketAddr::from(([127, 0, 0, 1], 0)),
            ..ChannelConfig::default()
        };
        assert!(channel.linger.is_none());

        let mut s = sender(4, false);
        let result = tokio::time::timeout(
            Duration::from_secs(3),
            s.serve(Broken { good: 9 }, &channel),
        )
        .await
        .expect("teardown after a failure must not wait for a receiver");

        assert!(matches!(result, Err(Error::Chunk(ChunkError::Read { offset: 8, .. }))));
        assert_eq!(s.state(), SenderState::Failed);
    }

    #[test]
    fn test_digested_carries_digest_and_hash_time() {
        let data = vec![9u8; 4096];
        let start = Instant::now();
        let digested = Digested::of(Chunk {
            index: 3,
            offset: 0,
            data: data.clone(),
        });
        let outer = start.elapsed();

        assert_eq!(digested.digest, digest(&data));
        assert_eq!(digested.chunk.index, 3);
        assert!(digested.hash_time <= outer);
    }

    #[test]
    fn test_rejects_bad_config() {
        assert!(Sender::new(SenderConfig {
            chunk_size: 0,
            read_ahead: false,
        })
        .is_err());
    }
}
