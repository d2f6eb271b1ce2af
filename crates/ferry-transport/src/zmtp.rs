//! ZMTP 3.0 wire codec.
//!
//! Implements the subset of the ZeroMQ Message Transport Protocol that a
//! PUSH/PULL pair needs over TCP with the NULL security mechanism:
//!
//! ```text
//! greeting (64 bytes)
//!   0      0xFF
//!   1..9   padding
//!   9      0x7F
//!   10     version major (3)
//!   11     version minor (0)
//!   12..32 mechanism, NUL padded ("NULL")
//!   32     as-server (0)
//!   33..64 filler
//!
//! frame
//!   flags  MORE 0x01 | LONG 0x02 | COMMAND 0x04
//!   size   1 byte, or 8 bytes big-endian when LONG is set
//!   body
//! ```
//!
//! After both greetings each side sends a READY command carrying its
//! `Socket-Type` property. Everything after that is message frames.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::message::Message;
use crate::transport::{TransportError, TransportResult};

/// Greeting length in bytes
pub const GREETING_SIZE: usize = 64;

/// Frame flag: more frames of this message follow
pub const FLAG_MORE: u8 = 0x01;
/// Frame flag: size field is 8 bytes
pub const FLAG_LONG: u8 = 0x02;
/// Frame flag: frame is a command, not message data
pub const FLAG_COMMAND: u8 = 0x04;

const MECHANISM_NULL: &[u8] = b"NULL";
const READY: &[u8] = b"READY";
const PROP_SOCKET_TYPE: &str = "Socket-Type";

/// ZeroMQ socket types spoken by FERRY
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketType {
    /// Outbound, fan-out to pullers
    Push,
    /// Inbound, fair-queued from pushers
    Pull,
}

impl SocketType {
    /// Name as announced in the READY command
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Push => "PUSH",
            Self::Pull => "PULL",
        }
    }

    /// Socket type a peer must announce to pair with us
    pub fn peer(&self) -> Self {
        match self {
            Self::Push => Self::Pull,
            Self::Pull => Self::Push,
        }
    }
}

/// One wire frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw flag byte
    pub flags: u8,
    /// Frame body
    pub body: Bytes,
}

impl Frame {
    /// True if this frame carries a command
    pub fn is_command(&self) -> bool {
        self.flags & FLAG_COMMAND != 0
    }

    /// True if more frames of the same message follow
    pub fn has_more(&self) -> bool {
        self.flags & FLAG_MORE != 0
    }
}

/// Build our greeting
pub fn greeting() -> [u8; GREETING_SIZE] {
    let mut g = [0u8; GREETING_SIZE];
    g[0] = 0xFF;
    g[9] = 0x7F;
    g[10] = 3;
    g[11] = 0;
    g[12..12 + MECHANISM_NULL.len()].copy_from_slice(MECHANISM_NULL);
    g
}

/// Validate a peer greeting
///
/// # Errors
///
/// Returns `TransportError::Handshake` for a bad signature, a pre-3.0
/// version or a mechanism other than NULL.
pub fn check_greeting(g: &[u8; GREETING_SIZE]) -> TransportResult<()> {
    if g[0] != 0xFF || g[9] & 0x01 != 0x01 {
        return Err(TransportError::Handshake("bad ZMTP signature".into()));
    }
    if g[10] < 3 {
        return Err(TransportError::Handshake(format!(
            "unsupported ZMTP version {}.{}",
            g[10], g[11]
        )));
    }

    let mechanism = &g[12..32];
    let name_len = mechanism.iter().position(|&b| b == 0).unwrap_or(20);
    if &mechanism[..name_len] != MECHANISM_NULL {
        return Err(TransportError::Handshake(format!(
            "unsupported security mechanism {:?}",
            String::from_utf8_lossy(&mechanism[..name_len])
        )));
    }

    Ok(())
}

/// Encode a frame header for a body of `len` bytes
pub fn encode_header(flags: u8, len: usize) -> Vec<u8> {
    if len <= u8::MAX as usize {
        vec![flags, len as u8]
    } else {
        let mut header = Vec::with_capacity(9);
        header.push(flags | FLAG_LONG);
        header.extend_from_slice(&(len as u64).to_be_bytes());
        header
    }
}

/// Encode the READY command body announcing `socket_type`
pub fn ready_command(socket_type: SocketType) -> Vec<u8> {
    let value = socket_type.as_str().as_bytes();
    let mut body = Vec::with_capacity(1 + READY.len() + 1 + PROP_SOCKET_TYPE.len() + 4 + value.len());
    body.push(READY.len() as u8);
    body.extend_from_slice(READY);
    body.push(PROP_SOCKET_TYPE.len() as u8);
    body.extend_from_slice(PROP_SOCKET_TYPE.as_bytes());
    body.extend_from_slice(&(value.len() as u32).to_be_bytes());
    body.extend_from_slice(value);
    body
}

/// Parse a READY command body into its property list
///
/// # Errors
///
/// Returns `TransportError::Handshake` if the body is not a well-formed
/// READY command.
pub fn parse_ready(body: &[u8]) -> TransportResult<Vec<(String, Bytes)>> {
    let truncated = || TransportError::Handshake("truncated READY command".into());

    let name_len = *body.first().ok_or_else(truncated)? as usize;
    let name = body.get(1..1 + name_len).ok_or_else(truncated)?;
    if name != READY {
        return Err(TransportError::Handshake(format!(
            "expected READY, got {:?}",
            String::from_utf8_lossy(name)
        )));
    }

    let mut props = Vec::new();
    let mut rest = &body[1 + name_len..];
    while !rest.is_empty() {
        let key_len = rest[0] as usize;
        let key = rest.get(1..1 + key_len).ok_or_else(truncated)?;
        rest = &rest[1 + key_len..];

        let len_bytes: [u8; 4] = rest
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(truncated)?;
        let value_len = u32::from_be_bytes(len_bytes) as usize;
        let value = rest.get(4..4 + value_len).ok_or_else(truncated)?;
        rest = &rest[4 + value_len..];

        props.push((
            String::from_utf8_lossy(key).into_owned(),
            Bytes::copy_from_slice(value),
        ));
    }

    Ok(props)
}

/// Write one frame
pub async fn write_frame<W: AsyncWrite + Unpin>(
    io: &mut W,
    flags: u8,
    body: &[u8],
) -> TransportResult<()> {
    io.write_all(&encode_header(flags, body.len())).await?;
    io.write_all(body).await?;
    Ok(())
}

/// Write every part of a message and flush
pub async fn write_message<W: AsyncWrite + Unpin>(
    io: &mut W,
    msg: &Message,
) -> TransportResult<()> {
    if msg.is_empty() {
        return Err(TransportError::Protocol("cannot send an empty message".into()));
    }

    let last = msg.len() - 1;
    for (i, part) in msg.parts().iter().enumerate() {
        let flags = if i < last { FLAG_MORE } else { 0 };
        write_frame(io, flags, part).await?;
    }
    io.flush().await?;
    Ok(())
}

/// Read one frame, or `None` on EOF before the first header byte.
///
/// # Errors
///
/// Returns `TransportError::Protocol` for frames over `max_size` or EOF
/// inside a frame.
pub async fn read_frame<R: AsyncRead + Unpin>(
    io: &mut R,
    max_size: u64,
) -> TransportResult<Option<Frame>> {
    let mut flags = [0u8; 1];
    if io.read(&mut flags).await? == 0 {
        return Ok(None);
    }
    let flags = flags[0];

    let size = if flags & FLAG_LONG != 0 {
        let mut size = [0u8; 8];
        read_exact(io, &mut size).await?;
        u64::from_be_bytes(size)
    } else {
        let mut size = [0u8; 1];
        read_exact(io, &mut size).await?;
        u64::from(size[0])
    };

    if size > max_size {
        return Err(TransportError::Protocol(format!(
            "frame of {size} bytes exceeds limit of {max_size}"
        )));
    }

    let mut body = BytesMut::zeroed(size as usize);
    read_exact(io, &mut body).await?;

    Ok(Some(Frame {
        flags,
        body: body.freeze(),
    }))
}

/// Read one complete message, skipping interleaved command frames.
///
/// Returns `None` if the peer closed the stream between messages.
///
/// # Errors
///
/// Returns `TransportError::Protocol` if the stream ends mid-message.
pub async fn read_message<R: AsyncRead + Unpin>(
    io: &mut R,
    max_size: u64,
) -> TransportResult<Option<Message>> {
    let mut msg = Message::new();

    loop {
        let Some(frame) = read_frame(io, max_size).await? else {
            if msg.is_empty() {
                return Ok(None);
            }
            return Err(TransportError::Protocol(format!(
                "stream ended after {} parts of a message",
                msg.len()
            )));
        };

        if frame.is_command() {
            tracing::trace!(len = frame.body.len(), "ignoring ZMTP command");
            continue;
        }

        let more = frame.has_more();
        msg.push(frame.body);
        if !more {
            return Ok(Some(msg));
        }
    }
}

/// Run the greeting and READY exchange on a fresh connection.
///
/// Returns the socket type the peer announced.
///
/// # Errors
///
/// Returns `TransportError::Handshake` or `IncompatibleSocket` when the
/// peer cannot be paired with `local`.
pub async fn handshake<S: AsyncRead + AsyncWrite + Unpin>(
    io: &mut S,
    local: SocketType,
) -> TransportResult<SocketType> {
    io.write_all(&greeting()).await?;
    write_frame(io, FLAG_COMMAND, &ready_command(local)).await?;
    io.flush().await?;

    let mut peer_greeting = [0u8; GREETING_SIZE];
    read_exact(io, &mut peer_greeting).await?;
    check_greeting(&peer_greeting)?;

    let frame = read_frame(io, 64 * 1024)
        .await?
        .ok_or_else(|| TransportError::Handshake("peer closed before READY".into()))?;
    if !frame.is_command() {
        return Err(TransportError::Handshake(
            "expected READY command, got message frame".into(),
        ));
    }

    let props = parse_ready(&frame.body)?;
    let remote = props
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(PROP_SOCKET_TYPE))
        .map(|(_, v)| String::from_utf8_lossy(v).into_owned())
        .ok_or_else(|| TransportError::Handshake("READY without Socket-Type".into()))?;

    let expected = local.peer();
    if remote != expected.as_str() {
        return Err(TransportError::IncompatibleSocket {
            local: local.as_str(),
            remote,
        });
    }

    Ok(expected)
}

async fn read_exact<R: AsyncRead + Unpin>(io: &mut R, buf: &mut [u8]) -> TransportResult<()> {
    match io.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(TransportError::Protocol("stream ended inside a frame".into()))
        }
        Err(e) => Err(e.into()),
    }
}
