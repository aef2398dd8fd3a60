//! Move log and move validation.

use std::time::Instant;

use net::protocol::MoveWire;
use rules::{ChessMove, Color, RulesOracle};
use session::SeatRole;

use crate::registry::Room;

pub fn seat_color(seat: SeatRole) -> Color {
    match seat {
        SeatRole::Creator => Color::White,
        SeatRole::Joiner => Color::Black,
    }
}

pub fn color_seat(color: Color) -> SeatRole {
    match color {
        Color::White => SeatRole::Creator,
        Color::Black => SeatRole::Joiner,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveRecord {
    pub mv: ChessMove,
    pub san: String,
    pub fen_after: String,
    pub at: Instant,
}

/// Append-only record of applied moves plus the authoritative position.
#[derive(Debug, Clone)]
pub struct MoveLog {
    initial_fen: String,
    records: Vec<MoveRecord>,
}

impl MoveLog {
    pub fn new(initial_fen: String) -> Self {
        Self {
            initial_fen,
            records: Vec::new(),
        }
    }

    pub fn fen(&self) -> &str {
        self.records
            .last()
            .map(|r| r.fen_after.as_str())
            .unwrap_or(&self.initial_fen)
    }

    pub fn initial_fen(&self) -> &str {
        &self.initial_fen
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[MoveRecord] {
        &self.records
    }

    pub fn moves(&self) -> impl Iterator<Item = &ChessMove> {
        self.records.iter().map(|r| &r.mv)
    }

    pub fn sans(&self) -> Vec<String> {
        self.records.iter().map(|r| r.san.clone()).collect()
    }

    /// Games always start from the standard position, so parity decides.
    pub fn side_to_move(&self) -> Color {
        if self.records.len() % 2 == 0 {
            Color::White
        } else {
            Color::Black
        }
    }

    fn push(&mut self, record: MoveRecord) {
        self.records.push(record);
    }

    pub fn to_wire(&self) -> Vec<MoveWire> {
        self.records
            .iter()
            .map(|r| MoveWire {
                from: r.mv.from_square(),
                to: r.mv.to_square(),
                promotion: r.mv.promotion().map(|p| p.as_char().to_string()),
                san: r.san.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct MoveRequest {
    pub seat: SeatRole,
    pub from: String,
    pub to: String,
    pub promotion: Option<String>,
    /// Position the client believes results from the move.
    pub claimed_fen: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveRejection {
    NotReady,
    Paused,
    GameOver,
    NotYourTurn { expected: SeatRole },
    Malformed(String),
    Illegal(String),
}

impl MoveRejection {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotReady => "not_ready",
            Self::Paused => "paused",
            Self::GameOver => "game_over",
            Self::NotYourTurn { .. } => "not_your_turn",
            Self::Malformed(_) => "malformed_move",
            Self::Illegal(_) => "illegal_move",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedMove {
    pub ply: usize,
    pub mv: ChessMove,
    pub san: String,
    pub fen: String,
    pub is_checkmate: bool,
    pub is_stalemate: bool,
    /// The client's claimed position disagreed with the server's.
    pub fen_mismatch: bool,
}

/// Validate and apply one move. Nothing in `room` changes on rejection.
pub fn submit_move(
    room: &mut Room,
    oracle: &dyn RulesOracle,
    request: &MoveRequest,
    now: Instant,
) -> Result<AcceptedMove, MoveRejection> {
    if !room.is_open() {
        return Err(MoveRejection::GameOver);
    }
    if !room.ready {
        return Err(MoveRejection::NotReady);
    }
    if room.clock.is_paused() || room.any_in_grace() {
        return Err(MoveRejection::Paused);
    }
    if room.clock.expired_side().is_some() {
        return Err(MoveRejection::GameOver);
    }

    let fen = room.moves.fen().to_string();
    let to_move = oracle
        .side_to_move(&fen)
        .map_err(|e| MoveRejection::Illegal(e.to_string()))?;
    let expected = color_seat(to_move);
    if request.seat != expected {
        return Err(MoveRejection::NotYourTurn { expected });
    }

    let mv = ChessMove::new(&request.from, &request.to, request.promotion.as_deref())
        .map_err(|e| MoveRejection::Malformed(e.to_string()))?;
    let applied = oracle
        .apply(&fen, &mv)
        .map_err(|e| MoveRejection::Illegal(e.to_string()))?;

    let fen_mismatch = request
        .claimed_fen
        .as_deref()
        .is_some_and(|claimed| !same_position(claimed, &applied.fen));

    room.moves.push(MoveRecord {
        mv: mv.clone(),
        san: applied.san.clone(),
        fen_after: applied.fen.clone(),
        at: now,
    });
    room.clock.switch_side(now);
    room.draw_offer = None;

    Ok(AcceptedMove {
        ply: room.moves.len(),
        mv,
        san: applied.san,
        fen: applied.fen,
        is_checkmate: applied.is_checkmate,
        is_stalemate: applied.is_stalemate,
        fen_mismatch,
    })
}

/// Compare placement, side to move, castling rights and en passant square.
/// Move counters are ignored; clients disagree on them harmlessly.
fn same_position(a: &str, b: &str) -> bool {
    let key = |fen: &str| fen.split_whitespace().take(4).collect::<Vec<_>>().join(" ");
    key(a) == key(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinatorConfig;
    use rules::{replay, ShakmatyOracle, STARTING_FEN};
    use session::{ConnectionId, RoomCode};

    fn ready_room(now: Instant) -> Room {
        let mut room = Room::new(
            RoomCode::new("R1").unwrap(),
            "white",
            STARTING_FEN.to_string(),
            &CoordinatorConfig::default(),
            now,
        );
        room.join_seat(SeatRole::Creator, "white", ConnectionId(1))
            .unwrap();
        room.join_seat(SeatRole::Joiner, "black", ConnectionId(2))
            .unwrap();
        room.mark_present(SeatRole::Creator);
        room.mark_present(SeatRole::Joiner);
        assert!(room.mark_ready(now));
        room
    }

    fn request(seat: SeatRole, from: &str, to: &str) -> MoveRequest {
        MoveRequest {
            seat,
            from: from.into(),
            to: to.into(),
            promotion: None,
            claimed_fen: None,
        }
    }

    #[test]
    fn accepted_move_updates_log_and_clock() {
        let now = Instant::now();
        let oracle = ShakmatyOracle::new();
        let mut room = ready_room(now);
        room.draw_offer = Some(SeatRole::Joiner);

        let accepted =
            submit_move(&mut room, &oracle, &request(SeatRole::Creator, "e2", "e4"), now).unwrap();
        assert_eq!(accepted.ply, 1);
        assert_eq!(accepted.san, "e4");
        assert!(!accepted.fen_mismatch);
        assert_eq!(room.moves.len(), 1);
        assert_eq!(room.clock.side(), Color::Black);
        assert_eq!(room.seat_to_move(), SeatRole::Joiner);
        assert_eq!(room.draw_offer, None);
    }

    #[test]
    fn wrong_seat_is_rejected_without_change() {
        let now = Instant::now();
        let oracle = ShakmatyOracle::new();
        let mut room = ready_room(now);
        let before = room.snapshot();

        let rejection =
            submit_move(&mut room, &oracle, &request(SeatRole::Joiner, "e7", "e5"), now)
                .unwrap_err();
        assert_eq!(
            rejection,
            MoveRejection::NotYourTurn {
                expected: SeatRole::Creator
            }
        );
        assert_eq!(room.snapshot(), before);
    }

    #[test]
    fn illegal_and_malformed_moves() {
        let now = Instant::now();
        let oracle = ShakmatyOracle::new();
        let mut room = ready_room(now);

        let illegal =
            submit_move(&mut room, &oracle, &request(SeatRole::Creator, "e2", "e5"), now)
                .unwrap_err();
        assert_eq!(illegal.code(), "illegal_move");

        let malformed =
            submit_move(&mut room, &oracle, &request(SeatRole::Creator, "z9", "e4"), now)
                .unwrap_err();
        assert_eq!(malformed.code(), "malformed_move");
        assert!(room.moves.is_empty());
    }

    #[test]
    fn not_ready_or_paused_rooms_reject() {
        let now = Instant::now();
        let oracle = ShakmatyOracle::new();
        let mut room = Room::new(
            RoomCode::new("R2").unwrap(),
            "white",
            STARTING_FEN.to_string(),
            &CoordinatorConfig::default(),
            now,
        );
        assert_eq!(
            submit_move(&mut room, &oracle, &request(SeatRole::Creator, "e2", "e4"), now),
            Err(MoveRejection::NotReady)
        );

        let mut room = ready_room(now);
        room.clock.pause(now);
        assert_eq!(
            submit_move(&mut room, &oracle, &request(SeatRole::Creator, "e2", "e4"), now),
            Err(MoveRejection::Paused)
        );
    }

    #[test]
    fn mismatched_claim_is_flagged_not_rejected() {
        let now = Instant::now();
        let oracle = ShakmatyOracle::new();
        let mut room = ready_room(now);
        let mut req = request(SeatRole::Creator, "d2", "d4");
        req.claimed_fen = Some(STARTING_FEN.to_string());
        let accepted = submit_move(&mut room, &oracle, &req, now).unwrap();
        assert!(accepted.fen_mismatch);

        let mut req = request(SeatRole::Joiner, "d7", "d5");
        req.claimed_fen = Some("rnbqkbnr/ppp1pppp/8/3p4/3P4/8/PPP1PPPP/RNBQKBNR w KQkq - 7 9".into());
        let accepted = submit_move(&mut room, &oracle, &req, now).unwrap();
        assert!(!accepted.fen_mismatch);
    }

    #[test]
    fn log_replays_to_recorded_position() {
        let now = Instant::now();
        let oracle = ShakmatyOracle::new();
        let mut room = ready_room(now);
        let line = [
            (SeatRole::Creator, "e2", "e4"),
            (SeatRole::Joiner, "e7", "e5"),
            (SeatRole::Creator, "g1", "f3"),
            (SeatRole::Joiner, "b8", "c6"),
            (SeatRole::Creator, "f1", "b5"),
        ];
        for (seat, from, to) in line {
            submit_move(&mut room, &oracle, &request(seat, from, to), now).unwrap();
        }
        let replayed = replay(&oracle, room.moves.moves()).unwrap();
        assert_eq!(replayed.fen, room.moves.fen());
        assert_eq!(replayed.sans, room.moves.sans());
    }

    #[test]
    fn checkmate_is_flagged() {
        let now = Instant::now();
        let oracle = ShakmatyOracle::new();
        let mut room = ready_room(now);
        for (seat, from, to) in [
            (SeatRole::Creator, "f2", "f3"),
            (SeatRole::Joiner, "e7", "e5"),
            (SeatRole::Creator, "g2", "g4"),
        ] {
            submit_move(&mut room, &oracle, &request(seat, from, to), now).unwrap();
        }
        let mate =
            submit_move(&mut room, &oracle, &request(SeatRole::Joiner, "d8", "h4"), now).unwrap();
        assert!(mate.is_checkmate);
        assert_eq!(mate.san, "Qh4#");
    }
}
