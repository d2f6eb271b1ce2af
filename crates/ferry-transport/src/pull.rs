//! PULL socket.

use async_trait::async_trait;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::message::Message;
use crate::transport::{MessageSource, TransportError, TransportResult, TransportStats};
use crate::zmtp::{self, SocketType};
use crate::ChannelConfig;

/// Connected PULL socket reading from a single sender
pub struct PullSocket {
    stream: BufReader<TcpStream>,
    max_frame_size: u64,
    stats: TransportStats,
}

impl PullSocket {
    /// Connect to a sender, retrying until it is listening.
    pub(crate) async fn connect(config: &ChannelConfig) -> TransportResult<Self> {
        config.validate()?;

        let addr = config.connect_addr;
        let deadline = config.connect_timeout.map(|t| Instant::now() + t);

        let mut stream = loop {
            match TcpStream::connect(addr).await {
                Ok(stream) => break stream,
                Err(e) => {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        return Err(TransportError::Timeout(format!("connecting to {addr}: {e}")));
                    }
                    debug!(%addr, error = %e, "sender not reachable yet, retrying");
                    tokio::time::sleep(config.reconnect_interval).await;
                }
            }
        };

        stream.set_nodelay(true)?;
        zmtp::handshake(&mut stream, SocketType::Pull).await?;
        info!(%addr, "connected to sender");

        Ok(Self {
            stream: BufReader::new(stream),
            max_frame_size: config.max_frame_size,
            stats: TransportStats::new(),
        })
    }
}

#[async_trait]
impl MessageSource for PullSocket {
    async fn recv(&mut self) -> TransportResult<Option<Message>> {
        let msg = zmtp::read_message(&mut self.stream, self.max_frame_size).await?;
        if let Some(msg) = &msg {
            self.stats.record_recv(msg.total_bytes());
        }
        Ok(msg)
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::transport::MessageSink;
    use bytes::Bytes;
    use std::net::SocketAddr;
    use std::time::Duration;

    #[tokio::test]
    async fn test_push_to_pull_in_order() {
        let ctx = Context::new();
        let mut push = ctx
            .bind_push(&ChannelConfig {
                bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
                ..ChannelConfig::default()
            })
            .await
            .unwrap();

        let config = ChannelConfig {
            connect_addr: push.local_addr(),
            connect_timeout: Some(Duration::from_secs(5)),
            ..ChannelConfig::default()
        };
        let mut pull = ctx.connect_pull(&config).await.unwrap();

        for i in 0u8..10 {
            let msg = Message::new()
                .with_part(vec![i; 1000])
                .with_part(Bytes::copy_from_slice(&[i]));
            push.send(msg).await.unwrap();
        }
        push.send(Message::single(&b"END"[..])).await.unwrap();

        for i in 0u8..10 {
            let msg = pull.recv().await.unwrap().unwrap();
            assert_eq!(msg.len(), 2);
            assert_eq!(msg.parts()[0].len(), 1000);
            assert_eq!(&msg.parts()[1][..], &[i]);
        }
        let end = pull.recv().await.unwrap().unwrap();
        assert_eq!(&end.parts()[0][..], b"END");

        push.close();
        ctx.term().await;

        // Sender hung up after draining
        assert!(pull.recv().await.unwrap().is_none());
        assert_eq!(pull.stats().messages_received, 11);
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        // Grab a free port, then release it so nothing is listening there
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };

        let config = ChannelConfig {
            connect_addr: addr,
            connect_timeout: Some(Duration::from_millis(200)),
            reconnect_interval: Duration::from_millis(20),
            ..ChannelConfig::default()
        };
        let ctx = Context::new();
        let err = ctx.connect_pull(&config).await.err().unwrap();
        assert!(matches!(err, TransportError::Timeout(_)));
    }
}
