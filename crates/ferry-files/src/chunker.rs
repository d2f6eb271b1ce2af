//! Sequential file chunking.
//!
//! [`ChunkReader`] pulls fixed-size chunks from a source one after another.
//! Every chunk except the last is exactly `chunk_size` bytes; the last one
//! holds whatever remains. Short reads from the underlying source are
//! retried until the chunk is full or the source is exhausted, so chunk
//! boundaries never depend on how the OS happens to split reads.

use std::io;
use std::path::Path;

use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};

/// Chunk reading errors
#[derive(Debug, Error)]
pub enum ChunkError {
    /// Reading from the source failed
    #[error("read failed at offset {offset}: {source}")]
    Read {
        /// Byte offset of the chunk being filled
        offset: u64,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The chunk buffer could not be allocated
    #[error("cannot allocate {requested} byte chunk buffer")]
    OutOfMemory {
        /// Requested buffer size
        requested: usize,
    },

    /// Chunk size outside `1..=MAX_CHUNK_SIZE`
    #[error("invalid chunk size {0}")]
    InvalidChunkSize(usize),
}

/// One contiguous slice of the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Zero-based position in the stream
    pub index: u64,
    /// Byte offset of the first byte in the stream
    pub offset: u64,
    /// Chunk bytes (never empty)
    pub data: Vec<u8>,
}

impl Chunk {
    /// Chunk length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always false for chunks produced by [`ChunkReader`]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Lazily reads a source as a finite, non-restartable sequence of chunks
pub struct ChunkReader<R> {
    inner: R,
    chunk_size: usize,
    next_index: u64,
    offset: u64,
    exhausted: bool,
}

impl ChunkReader<File> {
    /// Open a file for chunked reading
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be opened.
    pub async fn open<P: AsRef<Path>>(path: P, chunk_size: usize) -> io::Result<Self> {
        let file = File::open(path).await?;
        Self::with_chunk_size(file, chunk_size)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
    }
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    /// Wrap a source with the default chunk size
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            chunk_size: DEFAULT_CHUNK_SIZE,
            next_index: 0,
            offset: 0,
            exhausted: false,
        }
    }

    /// Wrap a source with a custom chunk size
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::InvalidChunkSize`] for zero or oversized chunks.
    pub fn with_chunk_size(inner: R, chunk_size: usize) -> Result<Self, ChunkError> {
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(ChunkError::InvalidChunkSize(chunk_size));
        }

        Ok(Self {
            chunk_size,
            ..Self::new(inner)
        })
    }

    /// Get chunk size
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Read the next chunk, or `None` once the source is exhausted.
    ///
    /// After `None` or an error the reader stays exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::Read`] if the source fails mid-chunk and
    /// [`ChunkError::OutOfMemory`] if the buffer cannot be allocated.
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>, ChunkError> {
        if self.exhausted {
            return Ok(None);
        }

        let mut buf = Vec::new();
        if buf.try_reserve_exact(self.chunk_size).is_err() {
            self.exhausted = true;
            return Err(ChunkError::OutOfMemory {
                requested: self.chunk_size,
            });
        }

        while buf.len() < self.chunk_size {
            let remaining = (self.chunk_size - buf.len()) as u64;
            let n = match (&mut self.inner).take(remaining).read_buf(&mut buf).await {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    self.exhausted = true;
                    return Err(ChunkError::Read {
                        offset: self.offset,
                        source,
                    });
                }
            };
            if n == 0 {
                self.exhausted = true;
                break;
            }
        }

        if buf.is_empty() {
            return Ok(None);
        }

        let chunk = Chunk {
            index: self.next_index,
            offset: self.offset,
            data: buf,
        };
        self.next_index += 1;
        self.offset += chunk.len() as u64;

        tracing::trace!(chunk = chunk.index, bytes = chunk.len(), "chunk read");
        Ok(Some(chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Hands out at most `step` bytes per read
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl AsyncRead for Trickle {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            let n = self
                .step
                .min(buf.remaining())
                .min(self.data.len() - self.pos);
            let start = self.pos;
            buf.put_slice(&self.data[start..start + n]);
            self.pos += n;
            Poll::Ready(Ok(()))
        }
    }

    /// Yields `good` bytes, then fails
    struct Broken {
        good: usize,
    }

    impl AsyncRead for Broken {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.good == 0 {
                return Poll::Ready(Err(io::Error::other("disk on fire")));
            }
            let n = self.good.min(buf.remaining());
            buf.put_slice(&vec![0xAB; n]);
            self.good -= n;
            Poll::Ready(Ok(()))
        }
    }

    async fn collect<R: AsyncRead + Unpin>(mut reader: ChunkReader<R>) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        while let Some(chunk) = reader.next_chunk().await.unwrap() {
            chunks.push(chunk);
        }
        chunks
    }

    #[tokio::test]
    async fn test_empty_source() {
        let reader = ChunkReader::with_chunk_size(&b""[..], 4).unwrap();
        assert!(collect(reader).await.is_empty());
    }

    #[tokio::test]
    async fn test_exact_multiple() {
        let reader = ChunkReader::with_chunk_size(&b"abcdefgh"[..], 4).unwrap();
        let chunks = collect(reader).await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].data, b"abcd");
        assert_eq!(chunks[1].data, b"efgh");
        assert_eq!(chunks[1].offset, 4);
        assert_eq!(chunks[1].index, 1);
    }

    #[tokio::test]
    async fn test_short_tail() {
        let reader = ChunkReader::with_chunk_size(&b"abcde"[..], 4).unwrap();
        let chunks = collect(reader).await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].data, b"e");
    }

    #[tokio::test]
    async fn test_short_reads_fill_chunks() {
        let data: Vec<u8> = (0..100u8).collect();
        let source = Trickle {
            data: data.clone(),
            pos: 0,
            step: 3,
        };
        let chunks = collect(ChunkReader::with_chunk_size(source, 16).unwrap()).await;

        assert_eq!(chunks.len(), 7);
        assert!(chunks[..6].iter().all(|c| c.len() == 16));
        assert_eq!(chunks[6].len(), 4);
        let joined: Vec<u8> = chunks.into_iter().flat_map(|c| c.data).collect();
        assert_eq!(joined, data);
    }

    #[tokio::test]
    async fn test_read_error_is_fatal() {
        let mut reader = ChunkReader::with_chunk_size(Broken { good: 6 }, 4).unwrap();

        let first = reader.next_chunk().await.unwrap().unwrap();
        assert_eq!(first.len(), 4);

        let err = reader.next_chunk().await.unwrap_err();
        assert!(matches!(err, ChunkError::Read { offset: 4, .. }));

        // Stays exhausted after failure
        assert!(reader.next_chunk().await.unwrap().is_none());
    }

    proptest::proptest! {
        #[test]
        fn prop_short_reads_never_change_chunking(
            data in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..2000),
            chunk_size in 1usize..300,
            step in 1usize..64,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let source = Trickle { data: data.clone(), pos: 0, step };
            let chunks = runtime.block_on(collect(ChunkReader::with_chunk_size(source, chunk_size).unwrap()));

            let mut offset = 0u64;
            for (i, chunk) in chunks.iter().enumerate() {
                proptest::prop_assert_eq!(chunk.index, i as u64);
                proptest::prop_assert_eq!(chunk.offset, offset);
                proptest::prop_assert!(!chunk.is_empty());
                if i + 1 < chunks.len() {
                    proptest::prop_assert_eq!(chunk.len(), chunk_size);
                }
                offset += chunk.len() as u64;
            }
            let joined: Vec<u8> = chunks.into_iter().flat_map(|c| c.data).collect();
            proptest::prop_assert_eq!(joined, data);
        }
    }

    #[test]
    fn test_invalid_chunk_size() {
        assert!(matches!(
            ChunkReader::with_chunk_size(&b""[..], 0),
            Err(ChunkError::InvalidChunkSize(0))
        ));
        assert!(ChunkReader::with_chunk_size(&b""[..], MAX_CHUNK_SIZE + 1).is_err());
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let result = ChunkReader::open("/nonexistent/ferry/source.bin", 4).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("source.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let reader = ChunkReader::open(&path, 4).await.unwrap();
        let lens: Vec<usize> = collect(reader).await.iter().map(Chunk::len).collect();
        assert_eq!(lens, vec![4, 4, 2]);
    }
}
