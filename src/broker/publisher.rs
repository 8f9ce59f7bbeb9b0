//! Publisher connection handler
//!
//! Publishers are write-only producers from the broker's point of view: the
//! handler reads raw bytes, hands each read's accumulated buffer to the
//! router for topic decoding and fan-out, then discards the buffer. No bytes
//! are ever written back, and publish-path failures are only logged.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use super::router::MessageRouter;
use super::BrokerConfig;

pub struct PublisherConnection {
    stream: TcpStream,
    addr: SocketAddr,
    read_buf: BytesMut,
    router: Arc<MessageRouter>,
    config: BrokerConfig,
}

impl PublisherConnection {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        router: Arc<MessageRouter>,
        config: BrokerConfig,
    ) -> Self {
        Self {
            stream,
            addr,
            read_buf: BytesMut::with_capacity(config.read_chunk_size),
            router,
            config,
        }
    }

    /// Run the connection until EOF, I/O error, or shutdown.
    pub async fn run(&mut self, mut shutdown: broadcast::Receiver<()>) -> std::io::Result<()> {
        loop {
            self.read_buf.reserve(self.config.read_chunk_size);

            tokio::select! {
                biased;

                result = self.stream.read_buf(&mut self.read_buf) => {
                    match result {
                        Ok(0) => {
                            info!(addr = %self.addr, "publisher detached");
                            return Ok(());
                        }
                        Ok(_) => {
                            let delivered = self.router.publish(&self.read_buf);
                            debug!(addr = %self.addr, bytes = self.read_buf.len(),
                                   delivered, "processed publish buffer");
                            // Processed bytes are discarded whether or not
                            // anything matched
                            self.read_buf.clear();
                        }
                        Err(e) => {
                            error!(addr = %self.addr, error = %e,
                                   "failed to read from publisher");
                            return Err(e);
                        }
                    }
                }

                result = shutdown.recv() => {
                    if let Err(broadcast::error::RecvError::Lagged(_)) = result {
                        continue;
                    }
                    debug!(addr = %self.addr, "shutting down");
                    return Ok(());
                }
            }
        }
    }
}
