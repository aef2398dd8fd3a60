use session::{ConnectionId, ConnectionOutput};
use tokio::sync::mpsc;

use crate::protocol::ClientMessage;

/// Messages from the network layer to the coordinator thread.
#[derive(Debug)]
pub enum NetToCoordinator {
    /// A new WebSocket connection was accepted.
    NewConnection { connection_id: ConnectionId },
    /// A well-formed client frame.
    ClientInput {
        connection_id: ConnectionId,
        message: ClientMessage,
    },
    /// The socket closed or errored.
    Disconnected { connection_id: ConnectionId },
}

/// Sender from network tasks to the coordinator thread.
pub type InboundTx = mpsc::UnboundedSender<NetToCoordinator>;
/// Receiver in the coordinator thread for client events.
pub type InboundRx = mpsc::UnboundedReceiver<NetToCoordinator>;

/// Sender from the coordinator thread to the output router.
pub type OutputTx = mpsc::UnboundedSender<ConnectionOutput>;
/// Receiver in the output router for connection outputs.
pub type OutputRx = mpsc::UnboundedReceiver<ConnectionOutput>;

/// Per-connection write channel (coordinator -> output router -> socket task).
pub type ConnectionWriteTx = mpsc::UnboundedSender<String>;
pub type ConnectionWriteRx = mpsc::UnboundedReceiver<String>;

/// Registration message for the output router.
#[derive(Debug)]
pub struct RegisterConnection {
    pub connection_id: ConnectionId,
    pub write_tx: ConnectionWriteTx,
}

pub type RegisterTx = mpsc::UnboundedSender<RegisterConnection>;
pub type RegisterRx = mpsc::UnboundedReceiver<RegisterConnection>;

pub type UnregisterTx = mpsc::UnboundedSender<ConnectionId>;
pub type UnregisterRx = mpsc::UnboundedReceiver<ConnectionId>;
