//! Broker core
//!
//! Owns the two listening sockets (publisher and subscriber ports), the
//! subscription store, and the subscriber table, and coordinates all
//! components. Each accepted connection runs in its own task; a broadcast
//! channel fans the shutdown signal out to every loop.

mod id;
mod publisher;
mod router;
mod subscriber;
mod writer;

pub use id::SubscriberId;
pub use publisher::PublisherConnection;
pub use router::MessageRouter;
pub use subscriber::SubscriberConnection;
pub use writer::{SendError, SharedWriter};

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::codec::{DEFAULT_MAX_BULK, DEFAULT_MAX_INLINE, DEFAULT_MAX_MULTIBULK};
use crate::topic::SubscriptionStore;

/// Broker configuration
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Publisher port bind address
    pub pub_bind: SocketAddr,
    /// Subscriber port bind address
    pub sub_bind: SocketAddr,
    /// Publisher listening socket backlog
    pub pub_backlog: i32,
    /// Subscriber listening socket backlog
    pub sub_backlog: i32,
    /// Read chunk reserved per socket read
    pub read_chunk_size: usize,
    /// Maximum inline request length
    pub max_inline_len: usize,
    /// Maximum multibulk element count
    pub max_multibulk_len: usize,
    /// Maximum single bulk length
    pub max_bulk_len: usize,
    /// Fixed capacity of each subscriber's outbound buffer
    pub outbound_buffer_size: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            pub_bind: "0.0.0.0:5561".parse().unwrap(),
            sub_bind: "0.0.0.0:5562".parse().unwrap(),
            pub_backlog: 511,
            sub_backlog: 511,
            read_chunk_size: 4096,
            max_inline_len: DEFAULT_MAX_INLINE,
            max_multibulk_len: DEFAULT_MAX_MULTIBULK,
            max_bulk_len: DEFAULT_MAX_BULK,
            outbound_buffer_size: 256 * 1024,
        }
    }
}

/// The publish/subscribe broker.
pub struct Broker {
    config: BrokerConfig,
    store: Arc<SubscriptionStore>,
    /// Active subscriber writers, keyed by identifier
    subscribers: Arc<DashMap<SubscriberId, Arc<SharedWriter>>>,
    router: Arc<MessageRouter>,
    shutdown: broadcast::Sender<()>,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        let store = Arc::new(SubscriptionStore::new());
        let subscribers = Arc::new(DashMap::new());
        let router = Arc::new(MessageRouter::new(store.clone(), subscribers.clone()));
        let (shutdown, _) = broadcast::channel(1);

        Self {
            config,
            store,
            subscribers,
            router,
            shutdown,
        }
    }

    /// Run the broker. Binding either listener is the only fatal failure;
    /// once both ports are up, every later error is contained to one
    /// connection or one operation.
    pub async fn run(&self) -> std::io::Result<()> {
        let pub_listener = bind_listener(self.config.pub_bind, self.config.pub_backlog)?;
        let sub_listener = bind_listener(self.config.sub_bind, self.config.sub_backlog)?;
        info!("publisher port listening on {}", self.config.pub_bind);
        info!("subscriber port listening on {}", self.config.sub_bind);

        // Publisher accepts run in their own task; subscriber accepts drive
        // this one
        let router = self.router.clone();
        let config = self.config.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            accept_publishers(pub_listener, router, config, shutdown).await;
        });

        self.accept_subscribers(sub_listener).await;
        Ok(())
    }

    async fn accept_subscribers(&self, listener: TcpListener) {
        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => self.handle_subscriber(stream, addr),
                        Err(e) => error!("failed to accept subscriber connection: {}", e),
                    }
                }
                result = shutdown_rx.recv() => {
                    if let Err(broadcast::error::RecvError::Lagged(_)) = result {
                        continue;
                    }
                    debug!("subscriber accept loop stopped");
                    return;
                }
            }
        }
    }

    fn handle_subscriber(&self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(%addr, "failed to disable Nagle: {}", e);
        }
        let id = SubscriberId::generate();
        info!(%addr, subscriber = %id, "accepted subscriber");

        let writer = Arc::new(SharedWriter::new(self.config.outbound_buffer_size));
        self.subscribers.insert(id, writer.clone());

        let mut conn = SubscriberConnection::new(
            stream,
            addr,
            id,
            self.store.clone(),
            self.subscribers.clone(),
            writer,
            self.config.clone(),
        );
        let shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = conn.run(shutdown_rx).await {
                debug!(%addr, "subscriber connection error: {}", e);
            }
        });
    }

    /// Stop accept loops and connection tasks.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Number of currently connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Number of registered channels.
    pub fn channel_count(&self) -> usize {
        self.store.channel_count()
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

async fn accept_publishers(
    listener: TcpListener,
    router: Arc<MessageRouter>,
    config: BrokerConfig,
    shutdown: broadcast::Sender<()>,
) {
    let mut shutdown_rx = shutdown.subscribe();
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            warn!(%addr, "failed to disable Nagle: {}", e);
                        }
                        info!(%addr, "accepted publisher");
                        let mut conn = PublisherConnection::new(
                            stream,
                            addr,
                            router.clone(),
                            config.clone(),
                        );
                        let shutdown_rx = shutdown.subscribe();
                        tokio::spawn(async move {
                            if let Err(e) = conn.run(shutdown_rx).await {
                                debug!(%addr, "publisher connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => error!("failed to accept publisher connection: {}", e),
                }
            }
            result = shutdown_rx.recv() => {
                if let Err(broadcast::error::RecvError::Lagged(_)) = result {
                    continue;
                }
                debug!("publisher accept loop stopped");
                return;
            }
        }
    }
}

/// Build a listening socket with an explicit backlog, non-blocking from the
/// start.
fn bind_listener(addr: SocketAddr, backlog: i32) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    TcpListener::from_std(socket.into())
}
