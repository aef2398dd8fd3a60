use serde::{Deserialize, Serialize};
use session::{RoomCode, SeatRole};

/// Client-to-server message (internally tagged JSON).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Join {
        room_code: RoomCode,
        identity: String,
        signature: String,
        /// Unix epoch milliseconds at which the join message was signed.
        signed_at: i64,
        seat: SeatRole,
    },
    Move {
        room_code: RoomCode,
        from: String,
        to: String,
        #[serde(default)]
        promotion: Option<String>,
        /// The client's idea of the resulting position (FEN).
        #[serde(default)]
        fen: Option<String>,
        #[serde(default)]
        clock: Option<ReportedClock>,
    },
    OfferDraw {
        room_code: RoomCode,
    },
    AcceptDraw {
        room_code: RoomCode,
    },
    DeclineDraw {
        room_code: RoomCode,
    },
    Resign {
        room_code: RoomCode,
    },
    Cancel {
        room_code: RoomCode,
    },
    Heartbeat,
    ConnectionStatus {
        room_code: RoomCode,
        status: ConnectionStatus,
    },
    RequestSnapshot {
        room_code: RoomCode,
    },
}

impl ClientMessage {
    pub fn room_code(&self) -> Option<&RoomCode> {
        match self {
            Self::Join { room_code, .. }
            | Self::Move { room_code, .. }
            | Self::OfferDraw { room_code }
            | Self::AcceptDraw { room_code }
            | Self::DeclineDraw { room_code }
            | Self::Resign { room_code }
            | Self::Cancel { room_code }
            | Self::ConnectionStatus { room_code, .. }
            | Self::RequestSnapshot { room_code } => Some(room_code),
            Self::Heartbeat => None,
        }
    }
}

/// Clock values as the client currently displays them, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedClock {
    pub white_secs: u64,
    pub black_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionStatus {
    Online,
    Reconnecting,
    NetworkError,
    Refreshing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    White,
    Black,
}

/// Why a game ended. The string forms are also the persisted reason codes;
/// serde goes through the same table as [`EndReason::as_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "&'static str", try_from = "String")]
pub enum EndReason {
    Checkmate,
    Stalemate,
    Resignation,
    DrawAgreement,
    Timeout,
    DisconnectForfeit,
    Cancelled,
}

const END_REASON_CODES: [(EndReason, &str); 7] = [
    (EndReason::Checkmate, "checkmate"),
    (EndReason::Stalemate, "stalemate"),
    (EndReason::Resignation, "resignation"),
    (EndReason::DrawAgreement, "draw_agreement"),
    (EndReason::Timeout, "timeout"),
    (EndReason::DisconnectForfeit, "disconnect_forfeit"),
    (EndReason::Cancelled, "cancelled"),
];

#[derive(Debug, thiserror::Error)]
#[error("unknown end reason: {0}")]
pub struct UnknownEndReason(String);

impl EndReason {
    pub const ALL: [EndReason; 7] = [
        Self::Checkmate,
        Self::Stalemate,
        Self::Resignation,
        Self::DrawAgreement,
        Self::Timeout,
        Self::DisconnectForfeit,
        Self::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        END_REASON_CODES
            .iter()
            .find(|(reason, _)| *reason == self)
            .map_or("", |(_, code)| *code)
    }

    pub fn parse(s: &str) -> Option<Self> {
        END_REASON_CODES
            .iter()
            .find(|(_, code)| *code == s)
            .map(|(reason, _)| *reason)
    }
}

impl From<EndReason> for &'static str {
    fn from(reason: EndReason) -> Self {
        reason.as_str()
    }
}

impl TryFrom<String> for EndReason {
    type Error = UnknownEndReason;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s).ok_or(UnknownEndReason(s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotReason {
    Requested,
    Reconnected,
    /// The server position differs from what the client claimed.
    Resync,
    DuplicateReady,
}

/// Server-to-client message (internally tagged JSON).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    JoinAdmitted {
        room_code: RoomCode,
        seat: SeatRole,
        identity: String,
    },
    JoinRejected {
        room_code: RoomCode,
        reason: String,
        message: String,
    },
    OpponentPresence {
        seat: SeatRole,
        present: bool,
    },
    SessionReady {
        creator: String,
        joiner: String,
    },
    ClockStarted {
        clock: ClockWire,
    },
    ClockSnapshot {
        clock: ClockWire,
    },
    MoveBroadcast {
        from: String,
        to: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        promotion: Option<String>,
    },
    MoveAccepted {
        ply: usize,
        san: String,
        fen: String,
    },
    MoveRejected {
        reason: String,
        expected_turn: SeatRole,
        snapshot: SnapshotWire,
    },
    OpponentDisconnected {
        seat: SeatRole,
        remaining_lifelines: u8,
        countdown_ms: u64,
    },
    OpponentReconnected {
        seat: SeatRole,
        remaining_lifelines: u8,
    },
    LifelineLost {
        seat: SeatRole,
        remaining_lifelines: u8,
    },
    DrawOffered {
        by: SeatRole,
    },
    DrawDeclined {
        by: SeatRole,
    },
    OpponentStatus {
        seat: SeatRole,
        status: ConnectionStatus,
    },
    Snapshot {
        reason: SnapshotReason,
        snapshot: SnapshotWire,
    },
    GameEnded {
        winner: Option<SeatRole>,
        reason: EndReason,
        fen: String,
        pgn: String,
    },
    Error {
        message: String,
    },
    Pong,
}

/// Wire representation of the two-sided clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClockWire {
    pub white_secs: u64,
    pub black_secs: u64,
    pub running: Option<Side>,
    pub paused: bool,
}

/// Wire representation of one logged move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveWire {
    pub from: String,
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promotion: Option<String>,
    pub san: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LifelinesWire {
    pub creator: u8,
    pub joiner: u8,
}

/// Everything a client needs to resynchronise without a page refresh.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotWire {
    pub room_code: RoomCode,
    pub ready: bool,
    pub completed: bool,
    pub fen: String,
    pub turn: SeatRole,
    pub moves: Vec<MoveWire>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clock: Option<ClockWire>,
    pub lifelines: LifelinesWire,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draw_offer: Option<SeatRole>,
}
