//! PUSH socket.
//!
//! Messages go into a bounded queue of `send_watermark` entries and a
//! background task writes them, in order, to the connected receiver. The
//! queue applies backpressure:
//!
//! - with no receiver connected, messages queue up to the watermark and
//!   `send` then blocks until a receiver drains them;
//! - nothing is ever dropped while the socket is open;
//! - a receiver that has hung up is dropped before it is handed another
//!   message, and a message whose write fails is resent to the next
//!   receiver that connects.
//!
//! One receiver is served at a time. There is no delivery acknowledgment,
//! so messages already written into a connection that the receiver then
//! abandons unread go down with it.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::message::Message;
use crate::transport::{MessageSink, TransportError, TransportResult, TransportStats};
use crate::zmtp::{self, SocketType};
use crate::ChannelConfig;

/// Time allowed for a new receiver to complete the ZMTP handshake
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause after a failed `accept`
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct SharedStats {
    bytes_sent: AtomicU64,
    messages_sent: AtomicU64,
    peers: AtomicU64,
}

impl SharedStats {
    fn snapshot(&self) -> TransportStats {
        TransportStats {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            reconnects: self.peers.load(Ordering::Relaxed).saturating_sub(1),
            ..TransportStats::default()
        }
    }
}

/// Bound, queueing PUSH socket
pub struct PushSocket {
    tx: mpsc::Sender<Message>,
    local_addr: SocketAddr,
    stats: Arc<SharedStats>,
    closed: Arc<AtomicBool>,
}

impl PushSocket {
    pub(crate) async fn bind(ctx: &Context, config: &ChannelConfig) -> TransportResult<Self> {
        config.validate()?;

        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|e| TransportError::BindFailed(format!("{}: {e}", config.bind_addr)))?;
        let local_addr = listener.local_addr()?;

        let (tx, rx) = mpsc::channel(config.send_watermark);
        let stats = Arc::new(SharedStats::default());
        let closed = Arc::new(AtomicBool::new(false));

        let handle = tokio::spawn(run_pusher(listener, rx, Arc::clone(&stats)));
        ctx.track("push", handle, config.linger, Arc::clone(&closed));

        info!(
            %local_addr,
            watermark = config.send_watermark,
            "push socket bound"
        );

        Ok(Self {
            tx,
            local_addr,
            stats,
            closed,
        })
    }

    /// Address the socket is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Messages waiting in the queue
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Queue a message without waiting.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Full` at the watermark and
    /// `TransportError::Closed` if the writer task is gone.
    pub fn try_send(&self, msg: Message) -> TransportResult<()> {
        self.tx.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::Full,
            TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    /// Stop accepting messages.
    ///
    /// Already queued messages keep draining until the owning context is
    /// terminated.
    pub fn close(self) {
        debug!(queued = self.queued(), "closing push socket");
    }
}

impl Drop for PushSocket {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[async_trait]
impl MessageSink for PushSocket {
    async fn send(&mut self, msg: Message) -> TransportResult<()> {
        self.tx.send(msg).await.map_err(|_| TransportError::Closed)
    }

    fn stats(&self) -> TransportStats {
        self.stats.snapshot()
    }
}

/// A handshaken receiver connection
struct Peer {
    addr: SocketAddr,
    reader: OwnedReadHalf,
    writer: BufWriter<OwnedWriteHalf>,
}

impl Peer {
    fn new(stream: TcpStream, addr: SocketAddr) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            addr,
            reader,
            writer: BufWriter::new(writer),
        }
    }

    /// Whether the receiver has closed its end. Never waits.
    ///
    /// A PULL peer sends nothing after the handshake, so the read side only
    /// becomes readable on EOF or reset. Stray bytes are discarded.
    fn hung_up(&mut self) -> bool {
        let mut scratch = [0u8; 64];
        loop {
            match self.reader.try_read(&mut scratch) {
                Ok(0) => return true,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return false,
                Err(_) => return true,
            }
        }
    }
}

async fn run_pusher(
    listener: TcpListener,
    mut rx: mpsc::Receiver<Message>,
    stats: Arc<SharedStats>,
) {
    let (peer_tx, mut peer_rx) = mpsc::channel(1);
    let acceptor = tokio::spawn(accept_peers(listener, peer_tx, Arc::clone(&stats)));

    let mut peer: Option<Peer> = None;
    let mut pending: Option<Message> = None;

    loop {
        let msg = match pending.take() {
            Some(msg) => msg,
            None => match rx.recv().await {
                Some(msg) => msg,
                None => break,
            },
        };

        // A receiver that left while we were idle must not swallow a message
        let live = match peer.take() {
            Some(mut current) => {
                if current.hung_up() {
                    warn!(peer = %current.addr, "receiver hung up, waiting for the next one");
                    None
                } else {
                    Some(current)
                }
            }
            None => None,
        };

        let mut current = match live {
            Some(current) => current,
            None => match next_peer(&mut peer_rx).await {
                Some(current) => current,
                None => {
                    warn!("listener gone, dropping queued messages");
                    break;
                }
            },
        };

        match zmtp::write_message(&mut current.writer, &msg).await {
            Ok(()) => {
                stats
                    .bytes_sent
                    .fetch_add(msg.total_bytes() as u64, Ordering::Relaxed);
                stats.messages_sent.fetch_add(1, Ordering::Relaxed);
                peer = Some(current);
            }
            Err(e) => {
                warn!(peer = %current.addr, error = %e, "receiver lost, waiting for the next one");
                pending = Some(msg);
            }
        }
    }

    acceptor.abort();
    if let Some(mut current) = peer {
        if let Err(e) = current.writer.shutdown().await {
            debug!(error = %e, "receiver shutdown failed");
        }
    }
    debug!("push queue drained");
}

/// Next accepted receiver that is still connected
async fn next_peer(peer_rx: &mut mpsc::Receiver<Peer>) -> Option<Peer> {
    loop {
        let mut peer = peer_rx.recv().await?;
        // Give the reactor a turn so a hang-up during the wait is visible
        tokio::task::yield_now().await;
        if !peer.hung_up() {
            return Some(peer);
        }
        info!(peer = %peer.addr, "receiver left before its first message");
    }
}

/// Accept and handshake receivers, handing them to the writer one at a time
async fn accept_peers(
    listener: TcpListener,
    peer_tx: mpsc::Sender<Peer>,
    stats: Arc<SharedStats>,
) {
    loop {
        let (mut stream, addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "cannot set TCP_NODELAY");
        }

        match tokio::time::timeout(HANDSHAKE_TIMEOUT, zmtp::handshake(&mut stream, SocketType::Push))
            .await
        {
            Ok(Ok(_)) => {
                stats.peers.fetch_add(1, Ordering::Relaxed);
                info!(peer = %addr, "receiver connected");
                if peer_tx.send(Peer::new(stream, addr)).await.is_err() {
                    return;
                }
            }
            Ok(Err(e)) => warn!(peer = %addr, error = %e, "handshake failed"),
            Err(_) => warn!(peer = %addr, "handshake timed out"),
        }
    }
}
