use std::fmt;

use session::SeatRole;

/// Lifecycle of a persisted game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameStatus {
    Waiting,
    Active,
    Completed,
    Cancelled,
}

impl GameStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(Self::Waiting),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Completed and cancelled games accept no further seats or results.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A game row as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameRecord {
    pub room_code: String,
    pub creator: String,
    pub joiner: Option<String>,
    pub status: GameStatus,
    pub winner: Option<SeatRole>,
    pub reason: Option<String>,
    pub fen: Option<String>,
    pub pgn: Option<String>,
    /// Unix epoch milliseconds.
    pub finished_at: Option<i64>,
}

impl GameRecord {
    pub fn waiting(room_code: &str, creator: &str, joiner: Option<&str>) -> Self {
        Self {
            room_code: room_code.to_string(),
            creator: creator.to_string(),
            joiner: joiner.map(str::to_string),
            status: GameStatus::Waiting,
            winner: None,
            reason: None,
            fen: None,
            pgn: None,
            finished_at: None,
        }
    }

    /// Fold a settled outcome into this record.
    pub(crate) fn settle(&mut self, outcome: &GameOutcome) {
        self.creator = outcome.creator.clone();
        if outcome.joiner.is_some() {
            self.joiner = outcome.joiner.clone();
        }
        self.status = outcome.status;
        self.winner = outcome.winner;
        self.reason = Some(outcome.reason.clone());
        self.fen = Some(outcome.fen.clone());
        self.pgn = Some(outcome.pgn.clone());
        self.finished_at = Some(outcome.finished_at);
    }
}

/// Everything written when a game is settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameOutcome {
    pub creator: String,
    pub joiner: Option<String>,
    /// `Completed` or `Cancelled`.
    pub status: GameStatus,
    pub winner: Option<SeatRole>,
    pub reason: String,
    pub fen: String,
    pub pgn: String,
    pub finished_at: i64,
}

pub(crate) fn winner_to_sql(winner: Option<SeatRole>) -> Option<&'static str> {
    winner.map(SeatRole::as_str)
}
