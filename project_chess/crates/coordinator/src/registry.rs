//! In-memory directory of live rooms.
//!
//! The registry is owned by the coordinator thread; nothing else touches it.

use std::collections::HashMap;
use std::time::Instant;

use net::protocol::{LifelinesWire, SnapshotWire};
use rules::Color;
use session::{ConnectionId, RoomCode, SeatRole};

use crate::clock::ChessClock;
use crate::config::CoordinatorConfig;
use crate::lifeline::Lifeline;
use crate::moves::{color_seat, MoveLog};
use crate::resolver::{GameResult, PendingEnd, PersistTracker};

#[derive(Debug, Clone)]
pub struct SeatSlot {
    pub identity: Option<String>,
    pub connection: Option<ConnectionId>,
    pub present: bool,
    pub lifeline: Lifeline,
}

impl SeatSlot {
    fn new(identity: Option<String>, lifelines: u8) -> Self {
        Self {
            identity,
            connection: None,
            present: false,
            lifeline: Lifeline::new(lifelines),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("seat {seat} is bound to another identity")]
pub struct SeatTaken {
    pub seat: SeatRole,
}

#[derive(Debug, Clone)]
pub enum RoomPhase {
    Open,
    /// Checkmate or stalemate seen; finalisation waits out the grace delay.
    Ending(PendingEnd),
    Completed {
        result: GameResult,
        persist: PersistTracker,
    },
}

#[derive(Debug, Clone)]
pub struct Room {
    pub code: RoomCode,
    pub creator: SeatSlot,
    pub joiner: SeatSlot,
    pub ready: bool,
    pub clock: ChessClock,
    pub moves: MoveLog,
    pub draw_offer: Option<SeatRole>,
    pub phase: RoomPhase,
    pub last_clock_sync: Instant,
}

impl Room {
    pub fn new(
        code: RoomCode,
        creator_identity: &str,
        initial_fen: String,
        config: &CoordinatorConfig,
        now: Instant,
    ) -> Self {
        Self {
            code,
            creator: SeatSlot::new(Some(creator_identity.to_string()), config.initial_lifelines),
            joiner: SeatSlot::new(None, config.initial_lifelines),
            ready: false,
            clock: ChessClock::new(config.time_budget_secs),
            moves: MoveLog::new(initial_fen),
            draw_offer: None,
            phase: RoomPhase::Open,
            last_clock_sync: now,
        }
    }

    pub fn seat(&self, seat: SeatRole) -> &SeatSlot {
        match seat {
            SeatRole::Creator => &self.creator,
            SeatRole::Joiner => &self.joiner,
        }
    }

    pub fn seat_mut(&mut self, seat: SeatRole) -> &mut SeatSlot {
        match seat {
            SeatRole::Creator => &mut self.creator,
            SeatRole::Joiner => &mut self.joiner,
        }
    }

    /// Bind `identity` to `seat` on `connection`. Returns the connection that
    /// previously held the seat, if a different one did.
    pub fn join_seat(
        &mut self,
        seat: SeatRole,
        identity: &str,
        connection: ConnectionId,
    ) -> Result<Option<ConnectionId>, SeatTaken> {
        let slot = self.seat_mut(seat);
        match &slot.identity {
            Some(bound) if bound != identity => return Err(SeatTaken { seat }),
            _ => {}
        }
        slot.identity = Some(identity.to_string());
        let previous = slot.connection.replace(connection);
        Ok(previous.filter(|prev| *prev != connection))
    }

    pub fn mark_present(&mut self, seat: SeatRole) {
        self.seat_mut(seat).present = true;
    }

    /// Clear presence and the connection handle. Returns false if `connection`
    /// does not hold the seat (a superseded connection closing late).
    pub fn mark_absent(&mut self, seat: SeatRole, connection: ConnectionId) -> bool {
        let slot = self.seat_mut(seat);
        if slot.connection != Some(connection) {
            return false;
        }
        slot.connection = None;
        slot.present = false;
        true
    }

    pub fn both_present(&self) -> bool {
        self.creator.present && self.joiner.present
    }

    /// Flip `ready` and start the creator's clock the first time both seats
    /// are present. Returns true only on that first transition.
    pub fn mark_ready(&mut self, now: Instant) -> bool {
        if self.ready || !self.both_present() || !self.is_open() {
            return false;
        }
        self.ready = true;
        self.clock.start(Color::White, now);
        self.last_clock_sync = now;
        true
    }

    pub fn is_open(&self) -> bool {
        matches!(self.phase, RoomPhase::Open)
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.phase, RoomPhase::Completed { .. })
    }

    pub fn result(&self) -> Option<&GameResult> {
        match &self.phase {
            RoomPhase::Completed { result, .. } => Some(result),
            _ => None,
        }
    }

    pub fn any_in_grace(&self) -> bool {
        self.creator.lifeline.in_grace() || self.joiner.lifeline.in_grace()
    }

    /// Seat whose turn it is on the authoritative position.
    pub fn seat_to_move(&self) -> SeatRole {
        color_seat(self.moves.side_to_move())
    }

    /// Connections currently seated, with their seats.
    pub fn present_connections(&self) -> Vec<(SeatRole, ConnectionId)> {
        SeatRole::ALL
            .iter()
            .filter_map(|&seat| {
                let slot = self.seat(seat);
                match (slot.present, slot.connection) {
                    (true, Some(conn)) => Some((seat, conn)),
                    _ => None,
                }
            })
            .collect()
    }

    pub fn snapshot(&self) -> SnapshotWire {
        SnapshotWire {
            room_code: self.code.clone(),
            ready: self.ready,
            completed: !self.is_open(),
            fen: self.moves.fen().to_string(),
            turn: self.seat_to_move(),
            moves: self.moves.to_wire(),
            clock: self.ready.then(|| self.clock.to_wire()),
            lifelines: LifelinesWire {
                creator: self.creator.lifeline.remaining(),
                joiner: self.joiner.lifeline.remaining(),
            },
            draw_offer: self.draw_offer,
        }
    }
}

#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<RoomCode, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, code: &RoomCode) -> Option<&Room> {
        self.rooms.get(code)
    }

    pub fn get_mut(&mut self, code: &RoomCode) -> Option<&mut Room> {
        self.rooms.get_mut(code)
    }

    pub fn contains(&self, code: &RoomCode) -> bool {
        self.rooms.contains_key(code)
    }

    /// Fetch a room, creating it on the first admitted join.
    pub fn get_or_create(
        &mut self,
        code: &RoomCode,
        make: impl FnOnce() -> Room,
    ) -> &mut Room {
        self.rooms.entry(code.clone()).or_insert_with(make)
    }

    pub fn remove(&mut self, code: &RoomCode) -> Option<Room> {
        self.rooms.remove(code)
    }

    pub fn codes(&self) -> Vec<RoomCode> {
        let mut codes: Vec<RoomCode> = self.rooms.keys().cloned().collect();
        codes.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        codes
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rules::STARTING_FEN;

    fn room() -> Room {
        Room::new(
            RoomCode::new("R1").unwrap(),
            "creator-id",
            STARTING_FEN.to_string(),
            &CoordinatorConfig::default(),
            Instant::now(),
        )
    }

    #[test]
    fn seats_bind_once() {
        let mut room = room();
        assert_eq!(
            room.join_seat(SeatRole::Creator, "someone-else", ConnectionId(1)),
            Err(SeatTaken {
                seat: SeatRole::Creator
            })
        );
        assert_eq!(
            room.join_seat(SeatRole::Creator, "creator-id", ConnectionId(1)),
            Ok(None)
        );
        assert_eq!(
            room.join_seat(SeatRole::Joiner, "joiner-id", ConnectionId(2)),
            Ok(None)
        );
        assert!(room
            .join_seat(SeatRole::Joiner, "intruder", ConnectionId(3))
            .is_err());

        // Same identity on a new connection supersedes the old one.
        assert_eq!(
            room.join_seat(SeatRole::Joiner, "joiner-id", ConnectionId(4)),
            Ok(Some(ConnectionId(2)))
        );
    }

    #[test]
    fn ready_flips_exactly_once() {
        let now = Instant::now();
        let mut room = room();
        room.join_seat(SeatRole::Creator, "creator-id", ConnectionId(1))
            .unwrap();
        room.mark_present(SeatRole::Creator);
        assert!(!room.both_present());
        assert!(!room.mark_ready(now));

        room.join_seat(SeatRole::Joiner, "joiner-id", ConnectionId(2))
            .unwrap();
        room.mark_present(SeatRole::Joiner);
        assert!(room.mark_ready(now));
        assert!(room.ready);
        assert!(room.clock.is_running());
        assert_eq!(room.clock.side(), Color::White);

        assert!(!room.mark_ready(now));
        assert!(room.mark_absent(SeatRole::Joiner, ConnectionId(2)));
        assert!(room.ready);
    }

    #[test]
    fn stale_connection_cannot_clear_presence() {
        let mut room = room();
        room.join_seat(SeatRole::Creator, "creator-id", ConnectionId(1))
            .unwrap();
        room.mark_present(SeatRole::Creator);
        room.join_seat(SeatRole::Creator, "creator-id", ConnectionId(5))
            .unwrap();
        assert!(!room.mark_absent(SeatRole::Creator, ConnectionId(1)));
        assert!(room.creator.present);
        assert_eq!(
            room.present_connections(),
            vec![(SeatRole::Creator, ConnectionId(5))]
        );
    }

    #[test]
    fn snapshot_before_ready_has_no_clock() {
        let room = room();
        let snap = room.snapshot();
        assert!(!snap.ready);
        assert!(snap.clock.is_none());
        assert_eq!(snap.turn, SeatRole::Creator);
        assert_eq!(snap.lifelines.creator, 3);
        assert_eq!(snap.fen, STARTING_FEN);
    }

    #[test]
    fn registry_create_and_remove() {
        let mut registry = RoomRegistry::new();
        let code = RoomCode::new("R1").unwrap();
        registry.get_or_create(&code, room);
        registry.get_or_create(&code, || panic!("must not recreate"));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&code));
        assert!(registry.remove(&code).is_some());
        assert!(registry.is_empty());
    }
}
