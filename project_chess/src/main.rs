use std::time::Duration;

use project_chess::config::parse_cli_args;
use project_chess::server::run_chess_server;
use project_chess::shutdown::{stop_channel, StopReason};

#[tokio::main]
async fn main() {
    observability::init_logging();

    let config = parse_cli_args();
    tracing::info!("Chess server starting...");

    let (stop, stop_listener) = stop_channel();
    let mut server = tokio::spawn(run_chess_server(config, stop_listener));

    tokio::select! {
        signal = stop.stop_on_signal() => {
            if let Err(e) = signal {
                tracing::error!("Failed to listen for stop signals: {}", e);
                stop.stop(StopReason::Requested);
            }
            tracing::info!("Stopping server...");
            match tokio::time::timeout(Duration::from_secs(5), &mut server).await {
                Ok(Ok(Err(e))) => tracing::error!("Server error during shutdown: {}", e),
                Ok(Err(e)) => tracing::error!("Server task failed: {}", e),
                Err(_) => tracing::warn!("Coordinator did not finish flushing in time"),
                Ok(Ok(Ok(()))) => {}
            }
        }
        result = &mut server => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!("Server error: {}", e);
                    std::process::exit(1);
                }
                Err(e) => {
                    tracing::error!("Server task failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }

    tracing::info!("Server stopped.");
}
