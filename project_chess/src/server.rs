//! Wires the network tasks to the coordinator thread.

use std::time::{Duration, Instant};

use coordinator::{Coordinator, CoordinatorError, Outbound};
use net::channels::{InboundRx, NetToCoordinator, OutputTx};
use net::web_server::NetChannels;
use observability::LoopMetrics;
use session::ConnectionOutput;
use tokio::net::TcpListener;

use crate::config::ServerConfig;
use crate::shutdown::StopListener;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
    #[error("coordinator thread panicked")]
    CoordinatorPanicked,
}

/// Bind the configured address and run until shutdown.
pub async fn run_chess_server(config: ServerConfig, stop: StopListener) -> Result<(), ServerError> {
    let listener = TcpListener::bind(&config.net.ws_addr).await?;
    tracing::info!("Chess server listening on {}", config.net.ws_addr);
    serve_on(listener, config, stop).await
}

/// Run the server on an already-bound listener. Returns once the coordinator
/// thread has flushed and exited.
pub async fn serve_on(
    listener: TcpListener,
    config: ServerConfig,
    stop: StopListener,
) -> Result<(), ServerError> {
    let coordinator = Coordinator::with_sqlite(config.to_coordinator_config(), &config.database.path)?;
    tracing::info!(path = %config.database.path, "Game database opened");

    // Channels between the socket tasks and the coordinator thread
    let (inbound_tx, inbound_rx) = tokio::sync::mpsc::unbounded_channel();
    let (output_tx, output_rx) = tokio::sync::mpsc::unbounded_channel();
    let (register_tx, register_rx) = tokio::sync::mpsc::unbounded_channel();
    let (unregister_tx, unregister_rx) = tokio::sync::mpsc::unbounded_channel();

    tokio::spawn(net::output_router::run_output_router(
        output_rx,
        register_rx,
        unregister_rx,
    ));

    let channels = NetChannels {
        inbound_tx,
        register_tx,
        unregister_tx,
    };
    let limits = config.to_rate_limits();
    let mut web_stop = stop.clone();
    let web_shutdown = async move {
        web_stop.stopped().await;
    };
    tokio::spawn(async move {
        if let Err(e) = net::web_server::serve(listener, channels, limits, web_shutdown).await {
            tracing::error!("Web server error: {}", e);
        }
    });

    let tps = config.tick.tps;
    let handle = std::thread::Builder::new()
        .name("coordinator".into())
        .spawn(move || run_coordinator_thread(coordinator, inbound_rx, output_tx, tps, stop))?;

    tokio::task::spawn_blocking(move || handle.join())
        .await
        .map_err(|_| ServerError::CoordinatorPanicked)?
        .map_err(|_| ServerError::CoordinatorPanicked)
}

/// The coordinator loop: drain inbound events, run due timers, route
/// outbound frames, sleep out the rest of the tick.
pub fn run_coordinator_thread(
    mut coordinator: Coordinator,
    mut inbound_rx: InboundRx,
    output_tx: OutputTx,
    tps: u32,
    stop: StopListener,
) {
    let tick_duration = Duration::from_millis(1000 / u64::from(tps.max(1)));
    let mut loop_number: u64 = 0;

    loop {
        if let Some(reason) = stop.reason() {
            tracing::info!(%reason, "Coordinator loop: stopping");
            coordinator.flush_pending(Instant::now());
            route(&output_tx, coordinator.take_outbound());
            let unpersisted = coordinator.unpersisted();
            if unpersisted > 0 {
                tracing::error!(unpersisted, "results lost at shutdown");
            }
            break;
        }

        let loop_start = Instant::now();
        loop_number += 1;

        let mut events_handled = 0;
        while let Ok(event) = inbound_rx.try_recv() {
            events_handled += 1;
            let now = Instant::now();
            match event {
                NetToCoordinator::NewConnection { connection_id } => {
                    coordinator.handle_connect(connection_id, now);
                }
                NetToCoordinator::ClientInput {
                    connection_id,
                    message,
                } => coordinator.handle_message(connection_id, message, now),
                NetToCoordinator::Disconnected { connection_id } => {
                    coordinator.handle_disconnect(connection_id, now);
                }
            }
        }

        coordinator.poll(Instant::now());
        let outbound_count = route(&output_tx, coordinator.take_outbound());

        let metrics = LoopMetrics {
            loop_number,
            duration_us: loop_start.elapsed().as_micros(),
            events_handled,
            outbound_count,
            active_rooms: coordinator.active_rooms(),
        };
        metrics.log();

        let elapsed = loop_start.elapsed();
        if elapsed < tick_duration {
            std::thread::sleep(tick_duration - elapsed);
        }
    }
}

/// Serialize and hand frames to the output router. Returns how many were sent.
fn route(output_tx: &OutputTx, outbound: Vec<Outbound>) -> usize {
    let mut sent = 0;
    for out in outbound {
        let text = match serde_json::to_string(&out.message) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(connection = ?out.connection, "failed to encode frame: {}", e);
                continue;
            }
        };
        let output = if out.disconnect {
            ConnectionOutput::with_disconnect(out.connection, text)
        } else {
            ConnectionOutput::new(out.connection, text)
        };
        if output_tx.send(output).is_ok() {
            sent += 1;
        }
    }
    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use net::protocol::ServerMessage;
    use session::ConnectionId;

    #[test]
    fn route_encodes_and_flags_disconnect() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sent = route(
            &tx,
            vec![
                Outbound {
                    connection: ConnectionId(1),
                    message: ServerMessage::Pong,
                    disconnect: false,
                },
                Outbound {
                    connection: ConnectionId(2),
                    message: ServerMessage::Error {
                        message: "bye".into(),
                    },
                    disconnect: true,
                },
            ],
        );
        assert_eq!(sent, 2);

        let first = rx.try_recv().unwrap();
        assert_eq!(first.connection_id, ConnectionId(1));
        assert_eq!(first.text, r#"{"type":"pong"}"#);
        assert!(!first.disconnect);

        let second = rx.try_recv().unwrap();
        assert_eq!(second.connection_id, ConnectionId(2));
        assert!(second.disconnect);
    }

    #[test]
    fn route_counts_nothing_once_router_is_gone() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        let sent = route(
            &tx,
            vec![Outbound {
                connection: ConnectionId(1),
                message: ServerMessage::Pong,
                disconnect: false,
            }],
        );
        assert_eq!(sent, 0);
    }
}
