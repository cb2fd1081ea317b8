//! TCP server and stdio helper — one endpoint per connection.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::rpc::endpoint::Endpoint;
use crate::types::{Result, ServerConfig};

type EndpointFactory = dyn Fn() -> Endpoint + Send + Sync;

/// TCP server handing every accepted connection to a fresh endpoint.
pub struct RpcServer {
    factory: Arc<EndpointFactory>,
    config: ServerConfig,
    cancel: CancellationToken,
}

impl std::fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcServer")
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl RpcServer {
    /// `factory` builds the endpoint (methods and parts included) for each
    /// new connection.
    pub fn new<F>(config: ServerConfig, factory: F) -> Self
    where
        F: Fn() -> Endpoint + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Bind `server.listen_addr` and serve until cancelled.
    pub async fn serve(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr.as_str()).await?;
        self.serve_listener(listener).await
    }

    /// Serve on an already bound listener until cancelled or accept fails.
    pub async fn serve_listener(&self, listener: TcpListener) -> Result<()> {
        let conn_semaphore = Arc::new(Semaphore::new(self.config.max_connections));
        tracing::info!(
            "JSON-RPC server listening on {} (max_connections={})",
            listener.local_addr()?,
            self.config.max_connections,
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("JSON-RPC server shutting down");
                    break;
                }
                accept = listener.accept() => {
                    let (stream, peer) = accept?;

                    let permit = match Arc::clone(&conn_semaphore).try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            tracing::warn!(
                                "Connection from {} rejected: at max_connections ({})",
                                peer,
                                self.config.max_connections,
                            );
                            drop(stream);
                            continue;
                        }
                    };

                    tracing::debug!(
                        "connection from {} (active={})",
                        peer,
                        self.config.max_connections - conn_semaphore.available_permits(),
                    );
                    let endpoint = (self.factory)();
                    let cancel = self.cancel.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, endpoint, cancel, permit).await {
                            tracing::warn!("Connection from {} error: {}", peer, e);
                        }
                    });
                }
            }
        }
        Ok(())
    }

    /// Stop accepting and shut down every live connection.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    endpoint: Endpoint,
    cancel: CancellationToken,
    _permit: OwnedSemaphorePermit,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let (reader, writer) = stream.into_split();

    let watcher = {
        let endpoint = endpoint.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            endpoint.shutdown();
        })
    };

    let result = endpoint.serve(reader, writer).await;
    watcher.abort();
    tracing::debug!("connection from {} closed", peer);
    result
}

/// Serve one endpoint over the process's stdin/stdout.
pub async fn serve_stdio(endpoint: &Endpoint) -> Result<()> {
    endpoint
        .serve(tokio::io::stdin(), tokio::io::stdout())
        .await
}
