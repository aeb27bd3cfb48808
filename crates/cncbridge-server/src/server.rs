//! [`BridgeServer`]: WebSocket listener for control sessions.
//!
//! Every accepted connection must be a WebSocket upgrade on the configured
//! path. While the registry is full, upgrades are refused with
//! `503 Service Unavailable` before a session exists.

use crate::error::{ServerError, ServerResult};
use crate::supervisor::BridgeSupervisor;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::accept_hdr_async;

/// Pause after a failed accept so a persistent error does not spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// WebSocket front end of the bridge
pub struct BridgeServer {
    supervisor: Arc<BridgeSupervisor>,
    listener: TcpListener,
}

impl BridgeServer {
    /// Bind the listener configured in `[server]`
    pub async fn bind(supervisor: Arc<BridgeSupervisor>) -> ServerResult<Self> {
        let addr = supervisor.config().server.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        Ok(Self {
            supervisor,
            listener,
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept sessions until the task is cancelled
    pub async fn run(self) -> ServerResult<()> {
        let ws_path = &self.supervisor.config().server.ws_path;
        tracing::info!(
            "Listening for sessions on ws://{}{}",
            self.local_addr()?,
            ws_path
        );

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let supervisor = Arc::clone(&self.supervisor);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, supervisor).await {
                            tracing::debug!("Connection from {} ended: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!("Accept error: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
}

fn reject(status: StatusCode, message: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(message.to_string()));
    *response.status_mut() = status;
    response
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    supervisor: Arc<BridgeSupervisor>,
) -> ServerResult<()> {
    let registry = Arc::clone(supervisor.registry());
    let ws_path = supervisor.config().server.ws_path.clone();
    let check = move |request: &Request, response: Response| {
        if request.uri().path() != ws_path {
            return Err(reject(StatusCode::NOT_FOUND, "Not found"));
        }
        if registry.is_full() {
            return Err(reject(
                StatusCode::SERVICE_UNAVAILABLE,
                "Too many clients",
            ));
        }
        Ok(response)
    };

    let mut ws = match accept_hdr_async(stream, check).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::info!("Refused connection from {}: {}", peer, e);
            return Err(e.into());
        }
    };

    // the registry may have filled up since the handshake check
    let (session, mut outbound) = match supervisor.connect_session().await {
        Ok(admitted) => admitted,
        Err(e) => {
            tracing::info!("Refused session from {}: {}", peer, e);
            ws.close(Some(CloseFrame {
                code: CloseCode::Again,
                reason: e.to_string().into(),
            }))
            .await?;
            return Ok(());
        }
    };
    tracing::info!("Session {} connected from {}", session, peer);

    let (mut ws_tx, mut ws_rx) = ws.split();

    let mut writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                return;
            }
        }
        // evicted: the registry dropped our queue
        let _ = ws_tx.close().await;
    });

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        supervisor.handle_inbound(session, text.as_str()).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!("Session {} read error: {}", session, e);
                        break;
                    }
                    _ => {}
                }
            }
            _ = &mut writer => break,
        }
    }

    supervisor.disconnect_session(session);
    writer.abort();
    tracing::info!("Session {} disconnected", session);
    Ok(())
}
