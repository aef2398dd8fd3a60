//! Turns a terminal event into the one authoritative result for a room.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use game_db::{GameOutcome, GameStatus};
use net::protocol::{EndReason, ServerMessage};
use rules::{replay, Pgn, RulesOracle};
use session::SeatRole;

use crate::registry::{Room, RoomPhase};

const EVENT_NAME: &str = "Wagered Chess Session";
const SITE: &str = "chess-session";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameResult {
    pub winner: Option<SeatRole>,
    pub reason: EndReason,
    pub fen: String,
    pub pgn: String,
    /// Unix epoch milliseconds.
    pub finished_at: i64,
}

impl GameResult {
    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::GameEnded {
            winner: self.winner,
            reason: self.reason,
            fen: self.fen.clone(),
            pgn: self.pgn.clone(),
        }
    }
}

/// A checkmate or stalemate waiting out the grace delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingEnd {
    pub reason: EndReason,
    pub winner: Option<SeatRole>,
    pub due_at: Instant,
}

#[derive(Debug, Clone)]
pub struct Finalized {
    pub result: GameResult,
    /// False when the room already held a result.
    pub first: bool,
}

/// Record the result for `room`. A room that already has a result keeps it
/// and gets it back unchanged.
pub fn finalize(
    room: &mut Room,
    oracle: &dyn RulesOracle,
    reason: EndReason,
    winner: Option<SeatRole>,
    finished_at: i64,
    time_budget_secs: u64,
    now: Instant,
) -> Finalized {
    if let Some(result) = room.result() {
        return Finalized {
            result: result.clone(),
            first: false,
        };
    }

    let (fen, sans) = match replay(oracle, room.moves.moves()) {
        Ok(replayed) => (replayed.fen, replayed.sans),
        Err(e) => {
            tracing::error!(room = %room.code, error = %e, "move log failed to replay, using logged position");
            (room.moves.fen().to_string(), room.moves.sans())
        }
    };

    let token = result_token(reason, winner);
    let pgn = Pgn::new(token)
        .with_tag("Event", EVENT_NAME)
        .with_tag("Site", SITE)
        .with_tag("Date", pgn_date(finished_at))
        .with_tag("Round", "-")
        .with_tag("White", room.creator.identity.as_deref().unwrap_or("?"))
        .with_tag("Black", room.joiner.identity.as_deref().unwrap_or("?"))
        .with_tag("Result", token)
        .with_tag("Termination", termination(reason))
        .with_tag("TimeControl", time_budget_secs.to_string())
        .with_moves(sans);

    let result = GameResult {
        winner,
        reason,
        fen,
        pgn: pgn.to_string(),
        finished_at,
    };

    room.clock.stop();
    room.draw_offer = None;
    room.phase = RoomPhase::Completed {
        result: result.clone(),
        persist: PersistTracker::new(now),
    };

    Finalized {
        result,
        first: true,
    }
}

/// The store row written for a finished room.
pub fn outcome_for(room: &Room, result: &GameResult) -> GameOutcome {
    GameOutcome {
        creator: room.creator.identity.clone().unwrap_or_default(),
        joiner: room.joiner.identity.clone(),
        status: if result.reason == EndReason::Cancelled {
            GameStatus::Cancelled
        } else {
            GameStatus::Completed
        },
        winner: result.winner,
        reason: result.reason.as_str().to_string(),
        fen: result.fen.clone(),
        pgn: result.pgn.clone(),
        finished_at: result.finished_at,
    }
}

pub fn result_token(reason: EndReason, winner: Option<SeatRole>) -> &'static str {
    match (winner, reason) {
        (Some(SeatRole::Creator), _) => "1-0",
        (Some(SeatRole::Joiner), _) => "0-1",
        (None, EndReason::Stalemate | EndReason::DrawAgreement) => "1/2-1/2",
        (None, _) => "*",
    }
}

fn termination(reason: EndReason) -> &'static str {
    match reason {
        EndReason::Checkmate
        | EndReason::Stalemate
        | EndReason::Resignation
        | EndReason::DrawAgreement => "normal",
        EndReason::Timeout => "time forfeit",
        EndReason::DisconnectForfeit => "abandoned",
        EndReason::Cancelled => "unterminated",
    }
}

fn pgn_date(finished_at: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(finished_at)
        .map(|d| d.format("%Y.%m.%d").to_string())
        .unwrap_or_else(|| "????.??.??".to_string())
}

/// Backoff schedule for writing a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    /// Delay before the next attempt after `failures` consecutive failures.
    pub fn backoff(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(20);
        self.base.saturating_mul(1u32 << shift).min(self.max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistState {
    Pending,
    Stored,
    /// Attempts exhausted; the room stays parked with its result.
    Abandoned,
}

#[derive(Debug, Clone)]
pub struct PersistTracker {
    state: PersistState,
    failures: u32,
    next_at: Instant,
}

impl PersistTracker {
    pub fn new(now: Instant) -> Self {
        Self {
            state: PersistState::Pending,
            failures: 0,
            next_at: now,
        }
    }

    pub fn state(&self) -> PersistState {
        self.state
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.state == PersistState::Pending && now >= self.next_at
    }

    pub fn record_success(&mut self) {
        self.state = PersistState::Stored;
    }

    pub fn record_failure(&mut self, now: Instant, policy: &RetryPolicy) -> PersistState {
        self.failures += 1;
        if self.failures >= policy.max_attempts {
            self.state = PersistState::Abandoned;
        } else {
            self.next_at = now + policy.backoff(self.failures);
        }
        self.state
    }
}
