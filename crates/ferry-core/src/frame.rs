//! Frame encoding and decoding for the FERRY wire protocol.
//!
//! A transfer session is a sequence of multi-part messages:
//!
//! ```text
//! data frame   [ payload (1..=C bytes) ] MORE [ digest (8 bytes, LE) ]
//! sentinel     [ "END" ]
//! ```
//!
//! The digest is the XXH64 (seed 0) of the payload, written little-endian.
//! Both the chunk size and the digest algorithm are fixed; nothing is
//! negotiated with the peer.

use bytes::Bytes;
use ferry_files::DIGEST_SIZE;
use ferry_transport::Message;

use crate::error::FrameError;

/// Payload of the sentinel frame
pub const END_MARKER: &[u8; 3] = b"END";

/// A decoded protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// One chunk and its digest
    Data {
        /// Chunk bytes
        payload: Bytes,
        /// XXH64 of `payload`
        digest: u64,
    },
    /// End of the transfer session
    End,
}

impl Frame {
    /// Build a data frame from a chunk and its digest
    pub fn data(payload: impl Into<Bytes>, digest: u64) -> Self {
        Self::Data {
            payload: payload.into(),
            digest,
        }
    }

    /// True for the sentinel
    pub fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }

    /// Encode into a wire message
    pub fn encode(self) -> Message {
        match self {
            Self::Data { payload, digest } => Message::new()
                .with_part(payload)
                .with_part(encode_digest(digest).to_vec()),
            Self::End => Message::single(Bytes::from_static(END_MARKER)),
        }
    }

    /// Decode a wire message
    ///
    /// # Errors
    ///
    /// Returns `FrameError` for anything that is neither a two-part data
    /// frame with an 8-byte digest nor the exact `END` sentinel.
    pub fn decode(msg: Message) -> Result<Self, FrameError> {
        let mut parts = msg.into_parts();
        match parts.len() {
            1 if &parts[0][..] == END_MARKER => Ok(Self::End),
            2 => {
                let digest_part = parts.pop().unwrap_or_default();
                let payload = parts.pop().unwrap_or_default();
                if payload.is_empty() {
                    return Err(FrameError::EmptyPayload);
                }
                Ok(Self::Data {
                    payload,
                    digest: decode_digest(&digest_part)?,
                })
            }
            n => Err(FrameError::UnexpectedShape { parts: n }),
        }
    }
}

/// Digest wire encoding (little-endian)
pub fn encode_digest(digest: u64) -> [u8; DIGEST_SIZE] {
    digest.to_le_bytes()
}

/// Parse a digest part
///
/// # Errors
///
/// Returns `FrameError::BadDigestLength` unless `bytes` is exactly 8 bytes.
pub fn decode_digest(bytes: &[u8]) -> Result<u64, FrameError> {
    let raw: [u8; DIGEST_SIZE] = bytes
        .try_into()
        .map_err(|_| FrameError::BadDigestLength(bytes.len()))?;
    Ok(u64::from_le_bytes(raw))
}
