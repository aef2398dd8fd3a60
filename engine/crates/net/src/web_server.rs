use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use session::ConnectionId;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::channels::{
    ConnectionWriteRx, InboundTx, NetToCoordinator, RegisterConnection, RegisterTx, UnregisterTx,
};
use crate::protocol::ClientMessage;
use crate::rate_limiter::{CommandThrottle, ConnectionLimiter, ConnectionPermit, RateLimitConfig};

/// Channel endpoints the socket tasks feed.
#[derive(Clone)]
pub struct NetChannels {
    pub inbound_tx: InboundTx,
    pub register_tx: RegisterTx,
    pub unregister_tx: UnregisterTx,
}

/// Shared state for the axum WebSocket handler.
#[derive(Clone)]
struct AppState {
    next_connection_id: Arc<AtomicU64>,
    channels: NetChannels,
    limiter: ConnectionLimiter,
    limits: RateLimitConfig,
}

/// Serve `/ws` and `/health` on an already-bound listener until `shutdown`
/// resolves.
pub async fn serve<F>(
    listener: TcpListener,
    channels: NetChannels,
    limits: RateLimitConfig,
    shutdown: F,
) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let state = AppState {
        next_connection_id: Arc::new(AtomicU64::new(1)),
        channels,
        limiter: ConnectionLimiter::new(&limits),
        limits,
    };

    let app = Router::new()
        .route("/ws", get(ws_upgrade_handler))
        .route("/health", get(|| async { "ok" }))
        .layer(CorsLayer::permissive())
        .with_state(state)
        .into_make_service_with_connect_info::<SocketAddr>();

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            tracing::info!("Web server shutting down gracefully");
        })
        .await
        .map_err(std::io::Error::other)
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    match state.limiter.try_admit(peer.ip()) {
        Ok(permit) => ws
            .max_message_size(state.limits.max_input_length)
            .on_upgrade(move |socket| handle_ws_connection(socket, peer, state, permit))
            .into_response(),
        Err(rejection) => {
            tracing::warn!(%peer, %rejection, "WebSocket connection refused");
            (StatusCode::SERVICE_UNAVAILABLE, rejection.to_string()).into_response()
        }
    }
}

async fn handle_ws_connection(
    socket: WebSocket,
    peer: SocketAddr,
    state: AppState,
    _permit: ConnectionPermit,
) {
    let connection_id = ConnectionId(state.next_connection_id.fetch_add(1, Ordering::Relaxed));
    tracing::info!(?connection_id, %peer, "New WebSocket connection");

    let (mut ws_writer, mut ws_reader) = socket.split();
    let (write_tx, mut write_rx): (_, ConnectionWriteRx) = tokio::sync::mpsc::unbounded_channel();

    let channels = &state.channels;
    let _ = channels.register_tx.send(RegisterConnection {
        connection_id,
        write_tx,
    });
    let _ = channels
        .inbound_tx
        .send(NetToCoordinator::NewConnection { connection_id });

    // Writer: forward router frames; a closed channel means the server hung up.
    let mut writer_handle = tokio::spawn(async move {
        while let Some(text) = write_rx.recv().await {
            if ws_writer.send(Message::Text(text.into())).await.is_err() {
                return;
            }
        }
        let _ = ws_writer.send(Message::Close(None)).await;
    });

    let mut throttle = CommandThrottle::new(state.limits.max_commands_per_second, Instant::now());

    loop {
        tokio::select! {
            frame = ws_reader.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let text = text.as_str();
                        if text.len() > state.limits.max_input_length {
                            tracing::debug!(?connection_id, len = text.len(), "Oversize frame dropped");
                            continue;
                        }
                        if !throttle.try_consume(Instant::now()) {
                            tracing::debug!(?connection_id, "Frame throttled");
                            continue;
                        }
                        if let Some(event) = parse_client_frame(connection_id, text) {
                            let _ = channels.inbound_tx.send(event);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary, ping, pong
                    Some(Err(e)) => {
                        tracing::debug!(?connection_id, "WebSocket read error: {}", e);
                        break;
                    }
                }
            }
            _ = &mut writer_handle => break,
        }
    }

    let _ = channels
        .inbound_tx
        .send(NetToCoordinator::Disconnected { connection_id });
    let _ = channels.unregister_tx.send(connection_id);

    writer_handle.abort();
    tracing::info!(?connection_id, "WebSocket connection ended");
}

/// Parse a text frame into a coordinator event. Malformed frames are dropped.
pub(crate) fn parse_client_frame(connection_id: ConnectionId, text: &str) -> Option<NetToCoordinator> {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => Some(NetToCoordinator::ClientInput {
            connection_id,
            message,
        }),
        Err(e) => {
            tracing::debug!(?connection_id, "Invalid client message: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    #[test]
    fn parse_valid_frame() {
        let event = parse_client_frame(ConnectionId(5), r#"{"type":"heartbeat"}"#);
        match event {
            Some(NetToCoordinator::ClientInput {
                connection_id,
                message,
            }) => {
                assert_eq!(connection_id, ConnectionId(5));
                assert_eq!(message, ClientMessage::Heartbeat);
            }
            _ => panic!("Expected ClientInput"),
        }
    }

    #[test]
    fn parse_invalid_frame() {
        assert!(parse_client_frame(ConnectionId(5), "not json").is_none());
        assert!(parse_client_frame(ConnectionId(5), r#"{"type":"teleport"}"#).is_none());
    }

    #[tokio::test]
    async fn websocket_round_trip() {
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
        let (register_tx, mut register_rx) = mpsc::unbounded_channel();
        let (unregister_tx, mut unregister_rx) = mpsc::unbounded_channel();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve(
            listener,
            NetChannels {
                inbound_tx,
                register_tx,
                unregister_tx,
            },
            RateLimitConfig::default(),
            std::future::pending::<()>(),
        ));

        let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
            .await
            .unwrap();

        let connection_id = match inbound_rx.recv().await.unwrap() {
            NetToCoordinator::NewConnection { connection_id } => connection_id,
            other => panic!("Expected NewConnection, got {:?}", other),
        };
        let reg = register_rx.recv().await.unwrap();
        assert_eq!(reg.connection_id, connection_id);

        client
            .send(WsMessage::Text(r#"{"type":"heartbeat"}"#.into()))
            .await
            .unwrap();
        match inbound_rx.recv().await.unwrap() {
            NetToCoordinator::ClientInput { message, .. } => {
                assert_eq!(message, ClientMessage::Heartbeat)
            }
            other => panic!("Expected ClientInput, got {:?}", other),
        }

        reg.write_tx.send(r#"{"type":"pong"}"#.to_string()).unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(frame.into_text().unwrap().as_str(), r#"{"type":"pong"}"#);

        drop(client);
        let event = tokio::time::timeout(Duration::from_secs(2), inbound_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, NetToCoordinator::Disconnected { .. }));
        assert_eq!(unregister_rx.recv().await.unwrap(), connection_id);

        server.abort();
    }
}
