//! Main TCP server for the memcached protocol

mod connection;
mod handler;

use crate::cache::{Crawler, LruCache, SharedClock};
use crate::config::ServerConfig;
use crate::metrics::Metrics;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Main server struct
pub struct Server {
    pub(crate) config: ServerConfig,
    pub(crate) cache: Arc<Mutex<LruCache>>,
    pub(crate) crawler: Arc<Crawler>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) clock: SharedClock,
    connection_semaphore: Arc<Semaphore>,
    pub(crate) cancel_token: CancellationToken,
    tracker: TaskTracker,
}

impl Server {
    /// Create a new server
    pub fn new(
        config: ServerConfig,
        cache: Arc<Mutex<LruCache>>,
        crawler: Arc<Crawler>,
        metrics: Arc<Metrics>,
        clock: SharedClock,
        cancel_token: CancellationToken,
    ) -> Self {
        let connection_semaphore = Arc::new(Semaphore::new(config.max_connections));

        Self {
            config,
            cache,
            crawler,
            metrics,
            clock,
            connection_semaphore,
            cancel_token,
            tracker: TaskTracker::new(),
        }
    }

    /// Run the server until cancelled, then drain connections and clear
    /// the cache.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let addr: SocketAddr = self.config.listen_addr.parse()?;
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", addr);

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutting down");
                    break;
                }
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            // Disable Nagle's algorithm for lower latency
                            if let Err(e) = stream.set_nodelay(true) {
                                warn!("Failed to set TCP_NODELAY: {}", e);
                            }

                            // Try to acquire connection permit
                            match self.connection_semaphore.clone().try_acquire_owned() {
                                Ok(permit) => {
                                    self.metrics.total_connections.inc();
                                    self.metrics.active_connections.inc();
                                    debug!("Accepted connection from {}", peer_addr);

                                    let server = Arc::clone(&self);
                                    self.tracker.spawn(async move {
                                        if let Err(e) = connection::handle(server, stream, permit).await {
                                            debug!("Connection error: {}", e);
                                        }
                                    });
                                }
                                Err(_) => {
                                    // Connection limit reached
                                    self.metrics.rejected_connections.inc();
                                    warn!("Connection limit reached, rejecting connection from {}", peer_addr);
                                    drop(stream);
                                }
                            }
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
            }
        }

        // Stopped accepting; cancellation has already unblocked every
        // per-connection read. Wait for the tasks, then drop the data.
        drop(listener);
        self.tracker.close();
        self.tracker.wait().await;
        self.cache.lock().flush_all();
        info!("All connections drained, cache cleared");

        Ok(())
    }
}
