//! WebSocket server listener
//!
//! Handles the TCP accept loop, the WebSocket upgrade and spawns one task per
//! accepted client.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::WebSocketStream;

use crate::client::{ClientHandle, ClientSession, Connection};
use crate::error::{Error, Result};
use crate::hub::{Hub, HubConfig};
use crate::server::config::ServerConfig;
use crate::server::handler::{AuthResult, ConnectRequest, HubHandler};
use crate::stats::metrics::ServerCounters;
use crate::stats::ServerStats;

/// WebSocket hub server
pub struct HubServer<H: HubHandler> {
    config: ServerConfig,
    handler: Arc<H>,
    hub: Hub,
    connection_semaphore: Option<Arc<Semaphore>>,
    counters: Arc<ServerCounters>,
}

impl<H: HubHandler> HubServer<H> {
    /// Create a new server with the given configuration and handler
    ///
    /// Starts the hub actor, so this must be called from within a Tokio
    /// runtime.
    pub fn new(config: ServerConfig, handler: H) -> Self {
        Self::with_hub_config(config, handler, HubConfig::default())
    }

    /// Create a new server with custom hub configuration
    pub fn with_hub_config(config: ServerConfig, handler: H, hub_config: HubConfig) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config,
            handler: Arc::new(handler),
            hub: Hub::spawn(hub_config),
            connection_semaphore,
            counters: Arc::new(ServerCounters::new()),
        }
    }

    /// Handle to the hub served by this server
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Connection counters
    pub fn stats(&self) -> ServerStats {
        self.counters.snapshot()
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;

        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.serve(listener) => result,
        }
    }

    /// Accept connections on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        tracing::info!(addr = %listener.local_addr()?, "Hub server listening");

        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    self.counters.connection_rejected();
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        tracing::debug!(peer = %peer_addr, "New connection");

        if let Err(e) = self.configure_socket(&socket) {
            tracing::error!(error = %e, "Failed to configure socket");
            return;
        }

        let config = self.config.clone();
        let handler = Arc::clone(&self.handler);
        let hub = self.hub.clone();
        let counters = Arc::clone(&self.counters);

        tokio::spawn(async move {
            // Held for the lifetime of the connection
            let _permit = permit;

            let (ws, request) = match handshake(socket, peer_addr, handler.as_ref(), &config).await {
                Ok(accepted) => accepted,
                Err(e) => {
                    counters.connection_rejected();
                    tracing::debug!(peer = %peer_addr, error = %e, "Handshake failed");
                    return;
                }
            };

            counters.connection_opened();

            let (client, queues) = ClientHandle::new(
                request.name,
                config.send_queue_capacity,
                config.control_queue_capacity,
            );
            tracing::info!(
                client_id = %client.id(),
                peer = %peer_addr,
                name = client.name().unwrap_or_default(),
                "Client connected"
            );

            let session = ClientSession::new(client, hub, handler);
            let (sink, stream) = ws.split();
            Connection::new(session, queues, config).run(stream, sink).await;

            counters.connection_closed();
        });
    }

    fn configure_socket(&self, socket: &TcpStream) -> std::io::Result<()> {
        if self.config.tcp_nodelay {
            socket.set_nodelay(true)?;
        }
        Ok(())
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}

/// Perform the WebSocket upgrade, consulting the handler before accepting
async fn handshake<H: HubHandler>(
    socket: TcpStream,
    peer_addr: SocketAddr,
    handler: &H,
    config: &ServerConfig,
) -> Result<(WebSocketStream<TcpStream>, ConnectRequest)> {
    let mut accepted = None;

    let callback = |request: &Request, response: Response| -> std::result::Result<Response, ErrorResponse> {
        let connect = ConnectRequest::from_http(peer_addr, request);

        match handler.authenticate(&connect) {
            AuthResult::Accept => {
                accepted = Some(connect);
                Ok(response)
            }
            AuthResult::Reject(reason) => {
                tracing::info!(peer = %peer_addr, reason = %reason, "Connection rejected by handler");
                Err(reject(StatusCode::UNAUTHORIZED, reason))
            }
        }
    };

    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(config.max_message_size);
    ws_config.max_frame_size = Some(config.max_message_size);

    let ws = tokio::time::timeout(
        config.handshake_timeout,
        tokio_tungstenite::accept_hdr_async_with_config(socket, callback, Some(ws_config)),
    )
    .await
    .map_err(|_| Error::HandshakeTimeout)??;

    let request = accepted.ok_or_else(|| Error::Rejected("upgrade request not inspected".into()))?;
    Ok((ws, request))
}

fn reject(status: StatusCode, reason: String) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason));
    *response.status_mut() = status;
    response
}
