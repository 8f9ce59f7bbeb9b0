//! Subscriber connection handler
//!
//! Owns one accepted subscriber socket: reads into the connection buffer,
//! drives the incremental request decoder, dispatches complete commands
//! against the command table, and flushes the shared outbound buffer when the
//! writer signals pending replies. Pipelined commands already buffered are
//! all processed before the task yields back to the socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::writer::SharedWriter;
use super::{BrokerConfig, SubscriberId};
use crate::codec::Decoder;
use crate::protocol::{lookup_command, CommandHandler};
use crate::topic::SubscriptionStore;

pub struct SubscriberConnection {
    stream: TcpStream,
    addr: SocketAddr,
    id: SubscriberId,
    decoder: Decoder,
    read_buf: BytesMut,
    store: Arc<SubscriptionStore>,
    subscribers: Arc<DashMap<SubscriberId, Arc<SharedWriter>>>,
    writer: Arc<SharedWriter>,
    config: BrokerConfig,
    created_at: Instant,
}

impl SubscriberConnection {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        id: SubscriberId,
        store: Arc<SubscriptionStore>,
        subscribers: Arc<DashMap<SubscriberId, Arc<SharedWriter>>>,
        writer: Arc<SharedWriter>,
        config: BrokerConfig,
    ) -> Self {
        let decoder = Decoder::new().with_limits(
            config.max_inline_len,
            config.max_multibulk_len,
            config.max_bulk_len,
        );
        Self {
            stream,
            addr,
            id,
            decoder,
            read_buf: BytesMut::with_capacity(config.read_chunk_size),
            store,
            subscribers,
            writer,
            config,
            created_at: Instant::now(),
        }
    }

    /// Run the connection until EOF, I/O error, or shutdown. The subscriber
    /// is fully released on every exit path.
    pub async fn run(&mut self, mut shutdown: broadcast::Receiver<()>) -> std::io::Result<()> {
        let result = self.serve(&mut shutdown).await;
        self.release();
        result
    }

    async fn serve(&mut self, shutdown: &mut broadcast::Receiver<()>) -> std::io::Result<()> {
        loop {
            self.read_buf.reserve(self.config.read_chunk_size);

            tokio::select! {
                biased;

                result = self.stream.read_buf(&mut self.read_buf) => {
                    match result {
                        Ok(0) => {
                            info!(subscriber = %self.id, addr = %self.addr, "subscriber detached");
                            return Ok(());
                        }
                        Ok(_) => self.process_read_buf(),
                        Err(e) => {
                            error!(subscriber = %self.id, addr = %self.addr, error = %e,
                                   "failed to read from subscriber");
                            return Err(e);
                        }
                    }
                }

                // Flush replies enqueued by command handlers and publish fan-out
                _ = self.writer.notified() => {
                    let data = self.writer.take_buffer();
                    if !data.is_empty() {
                        self.stream.write_all(&data).await?;
                    }
                    if !self.writer.is_alive() {
                        debug!(subscriber = %self.id, "writer closed, disconnecting");
                        return Ok(());
                    }
                }

                result = shutdown.recv() => {
                    if let Err(broadcast::error::RecvError::Lagged(_)) = result {
                        continue;
                    }
                    debug!(subscriber = %self.id, "shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Drain every complete request already buffered.
    fn process_read_buf(&mut self) {
        loop {
            match self.decoder.decode(&mut self.read_buf) {
                Ok(Some(argv)) => self.dispatch(argv),
                Ok(None) => break,
                Err(e) => {
                    // Recoverable: the offending bytes are gone, the
                    // connection keeps running
                    debug!(subscriber = %self.id, error = %e, "protocol error");
                    self.reply_error(&format!("Protocol error: {}", e));
                }
            }
        }
    }

    fn dispatch(&mut self, argv: Vec<Bytes>) {
        let name = String::from_utf8_lossy(&argv[0]).into_owned();
        let spec = match lookup_command(&argv[0]) {
            Some(spec) => spec,
            None => {
                self.reply_error(&format!("unknown command '{}'", name));
                return;
            }
        };
        if !spec.arity_matches(argv.len()) {
            self.reply_error(&format!("wrong number of arguments for '{}' command", name));
            return;
        }

        match spec.handler {
            CommandHandler::Ping => self.reply_status("pong"),
            CommandHandler::Subscribe => self.cmd_subscribe(&argv[1..]),
            CommandHandler::Unsubscribe => self.cmd_unsubscribe(&argv[1..]),
        }
    }

    fn cmd_subscribe(&mut self, channels: &[Bytes]) {
        for channel in channels {
            if let Err(e) = self.store.subscribe(channel, self.id) {
                let name = String::from_utf8_lossy(channel);
                warn!(subscriber = %self.id, channel = %name, error = %e,
                      "rejected subscribe");
                self.reply_error(&format!("cannot subscribe to '{}': {}", name, e));
                return;
            }
        }
        self.reply_status("subscribe");
    }

    fn cmd_unsubscribe(&mut self, channels: &[Bytes]) {
        if channels.is_empty() {
            self.store.unsubscribe_all(&self.id);
        } else {
            for channel in channels {
                self.store.unsubscribe(channel, &self.id);
            }
        }
        self.reply_status("unsubscribe");
    }

    fn reply_status(&self, text: &str) {
        if let Err(e) = self.writer.send_status(text) {
            error!(subscriber = %self.id, error = %e, "dropping status reply");
        }
    }

    fn reply_error(&self, message: &str) {
        if let Err(e) = self.writer.send_error(message) {
            error!(subscriber = %self.id, error = %e, "dropping error reply");
        }
    }

    /// Deregister from the subscriber table and purge this identifier from
    /// every channel set it joined.
    fn release(&mut self) {
        self.subscribers.remove(&self.id);
        let purged = self.store.unsubscribe_all(&self.id);
        self.writer.close();
        debug!(subscriber = %self.id, channels = purged,
               uptime_secs = self.created_at.elapsed().as_secs(),
               "released subscriber");
    }
}
