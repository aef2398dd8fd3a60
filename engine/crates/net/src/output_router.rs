use std::collections::HashMap;

use session::{ConnectionId, ConnectionOutput};

use crate::channels::{ConnectionWriteTx, OutputRx, RegisterRx, UnregisterRx};

/// Maps connection IDs to their socket writer channels.
#[derive(Debug, Default)]
pub struct Router {
    writers: HashMap<ConnectionId, ConnectionWriteTx>,
}

impl Router {
    pub fn register(&mut self, connection_id: ConnectionId, write_tx: ConnectionWriteTx) {
        self.writers.insert(connection_id, write_tx);
    }

    pub fn unregister(&mut self, connection_id: ConnectionId) {
        self.writers.remove(&connection_id);
    }

    /// Deliver one output. Returns false if it was dropped.
    pub fn deliver(&mut self, output: ConnectionOutput) -> bool {
        let Some(tx) = self.writers.get(&output.connection_id) else {
            return false;
        };
        if tx.send(output.text).is_err() {
            tracing::debug!(connection_id = ?output.connection_id, "output router: write channel closed");
            self.writers.remove(&output.connection_id);
            return false;
        }
        if output.disconnect {
            // Dropping the sender ends the writer task, which closes the socket.
            tracing::debug!(connection_id = ?output.connection_id, "output router: disconnect requested");
            self.writers.remove(&output.connection_id);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.writers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writers.is_empty()
    }
}

/// Routes ConnectionOutput messages to the correct per-connection write channel.
pub async fn run_output_router(
    mut output_rx: OutputRx,
    mut register_rx: RegisterRx,
    mut unregister_rx: UnregisterRx,
) {
    let mut router = Router::default();

    loop {
        tokio::select! {
            Some(reg) = register_rx.recv() => {
                tracing::debug!(connection_id = ?reg.connection_id, "output router: connection registered");
                router.register(reg.connection_id, reg.write_tx);
            }
            Some(connection_id) = unregister_rx.recv() => {
                tracing::debug!(?connection_id, "output router: connection unregistered");
                router.unregister(connection_id);
            }
            Some(output) = output_rx.recv() => {
                router.deliver(output);
            }
            else => break,
        }
    }

    tracing::info!("Output router shutting down");
}
