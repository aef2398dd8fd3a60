//! The single owner of all room state.
//!
//! Every inbound event and every timer check runs through one `Coordinator`
//! on one thread, so each room's state changes one event at a time in
//! arrival order. Outbound frames are queued and drained by the caller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use game_db::{GameRecord, GameStore, SqliteGameStore};
use net::protocol::{
    ClientMessage, ConnectionStatus, EndReason, ReportedClock, ServerMessage, SnapshotReason,
};
use rules::{Color, RulesOracle, ShakmatyOracle};
use session::{ConnectionId, ConnectionManager, GrantError, RoomCode, SeatGrant, SeatRole};

use crate::auth::{AuthRejection, AuthorizationGate, JoinRequest};
use crate::config::CoordinatorConfig;
use crate::error::CoordinatorError;
use crate::lifeline::Reconnect;
use crate::moves::{color_seat, seat_color, submit_move, MoveRequest};
use crate::registry::{Room, RoomPhase, RoomRegistry};
use crate::resolver::{finalize, outcome_for, PendingEnd, PersistState, RetryPolicy};

/// A frame for one connection. `disconnect` closes it after delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub connection: ConnectionId,
    pub message: ServerMessage,
    pub disconnect: bool,
}

fn push(out: &mut Vec<Outbound>, connection: ConnectionId, message: ServerMessage) {
    out.push(Outbound {
        connection,
        message,
        disconnect: false,
    });
}

fn to_seat(out: &mut Vec<Outbound>, room: &Room, seat: SeatRole, message: ServerMessage) {
    let slot = room.seat(seat);
    if let (true, Some(conn)) = (slot.present, slot.connection) {
        push(out, conn, message);
    }
}

fn to_all(out: &mut Vec<Outbound>, room: &Room, message: ServerMessage) {
    for (_, conn) in room.present_connections() {
        push(out, conn, message.clone());
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Unix epoch milliseconds.
pub fn wall_clock_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// The `game_ended` frame for a result that only exists in the store.
fn decided_message(record: &GameRecord) -> Option<ServerMessage> {
    let reason = EndReason::parse(record.reason.as_deref()?)?;
    Some(ServerMessage::GameEnded {
        winner: record.winner,
        reason,
        fen: record.fen.clone().unwrap_or_default(),
        pgn: record.pgn.clone().unwrap_or_default(),
    })
}

pub struct Coordinator {
    config: CoordinatorConfig,
    retry: RetryPolicy,
    gate: AuthorizationGate,
    oracle: Arc<dyn RulesOracle>,
    store: Box<dyn GameStore>,
    registry: RoomRegistry,
    connections: ConnectionManager,
    outbox: Vec<Outbound>,
    wall_clock: fn() -> i64,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        gate: AuthorizationGate,
        oracle: Arc<dyn RulesOracle>,
        store: Box<dyn GameStore>,
    ) -> Self {
        let retry = RetryPolicy {
            max_attempts: config.persist_max_attempts.max(1),
            base: Duration::from_millis(config.persist_backoff_ms),
            max: Duration::from_millis(config.persist_backoff_max_ms),
        };
        Self {
            config,
            retry,
            gate,
            oracle,
            store,
            registry: RoomRegistry::new(),
            connections: ConnectionManager::new(),
            outbox: Vec::new(),
            wall_clock: wall_clock_ms,
        }
    }

    /// Production wiring: SQLite store, shakmaty rules, Ed25519 signatures.
    pub fn with_sqlite(config: CoordinatorConfig, db_path: &str) -> Result<Self, CoordinatorError> {
        config.validate()?;
        let store = SqliteGameStore::open(db_path)?;
        let gate = AuthorizationGate::ed25519(config.signature_freshness_secs, config.future_skew_secs);
        Ok(Self::new(config, gate, Arc::new(ShakmatyOracle::new()), Box::new(store)))
    }

    /// Replace the wall clock used for signature freshness and result
    /// timestamps.
    pub fn with_wall_clock(mut self, wall_clock: fn() -> i64) -> Self {
        self.wall_clock = wall_clock;
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn room(&self, code: &RoomCode) -> Option<&Room> {
        self.registry.get(code)
    }

    pub fn active_rooms(&self) -> usize {
        self.registry.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn take_outbound(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    fn send(&mut self, connection: ConnectionId, message: ServerMessage) {
        push(&mut self.outbox, connection, message);
    }

    fn error(&mut self, connection: ConnectionId, message: impl Into<String>) {
        self.send(
            connection,
            ServerMessage::Error {
                message: message.into(),
            },
        );
    }

    // ── Network events ──────────────────────────────────────────────

    pub fn handle_connect(&mut self, connection: ConnectionId, now: Instant) {
        self.connections.open(connection, now);
        tracing::debug!(?connection, "connection opened");
    }

    pub fn handle_disconnect(&mut self, connection: ConnectionId, now: Instant) {
        let Some(closed) = self.connections.close(connection) else {
            return;
        };
        tracing::debug!(
            ?connection,
            open_for = ?now.saturating_duration_since(closed.opened_at),
            "connection closed"
        );
        let grant = match closed.auth {
            session::AuthState::Authorized(grant) | session::AuthState::Revoked(grant) => grant,
            session::AuthState::Unauthenticated => return,
        };
        let code = grant.room;
        let seat = grant.seat;

        self.advance_room(&code, now);
        let countdown = self.config.countdown();
        let Some(room) = self.registry.get_mut(&code) else {
            return;
        };
        if !room.mark_absent(seat, connection) {
            return;
        }
        let presence = ServerMessage::OpponentPresence {
            seat,
            present: false,
        };

        if !room.is_open() {
            to_seat(&mut self.outbox, room, seat.opponent(), presence);
            return;
        }
        if !room.ready {
            to_seat(&mut self.outbox, room, seat.opponent(), presence);
            if room.present_connections().is_empty() {
                self.registry.remove(&code);
                tracing::debug!(room = %code, "empty room dropped before start");
            }
            return;
        }

        room.clock.pause(now);
        if let Some(side) = room.clock.expired_side() {
            self.end_game(&code, EndReason::Timeout, Some(color_seat(side).opponent()), now);
            return;
        }
        let lifeline = &mut room.seat_mut(seat).lifeline;
        if lifeline.disconnect(now, countdown).is_some() {
            let remaining = lifeline.remaining();
            tracing::info!(room = %code, %seat, remaining, "seat dropped, grace window opened");
            to_seat(
                &mut self.outbox,
                room,
                seat.opponent(),
                ServerMessage::OpponentDisconnected {
                    seat,
                    remaining_lifelines: remaining,
                    countdown_ms: millis(countdown),
                },
            );
            let clock = room.clock.to_wire();
            to_seat(
                &mut self.outbox,
                room,
                seat.opponent(),
                ServerMessage::ClockSnapshot { clock },
            );
        }
    }

    pub fn handle_message(&mut self, connection: ConnectionId, message: ClientMessage, now: Instant) {
        if !self.connections.is_open(connection) {
            self.connections.open(connection, now);
        }

        match message {
            ClientMessage::Heartbeat => self.send(connection, ServerMessage::Pong),
            ClientMessage::Join {
                room_code,
                identity,
                signature,
                signed_at,
                seat,
            } => {
                let request = JoinRequest {
                    room_code: &room_code,
                    identity: &identity,
                    signature: &signature,
                    signed_at_ms: signed_at,
                    seat,
                };
                self.handle_join(connection, &request, now);
            }
            other => {
                let Some(code) = other.room_code().cloned() else {
                    return;
                };
                let Some(seat) = self.authorized_seat(connection, &code) else {
                    return;
                };
                self.advance_room(&code, now);
                if !self.registry.contains(&code) {
                    self.answer_missing_room(connection, &code);
                    return;
                }
                self.dispatch(connection, &code, seat, other, now);
            }
        }
    }

    fn dispatch(
        &mut self,
        connection: ConnectionId,
        code: &RoomCode,
        seat: SeatRole,
        message: ClientMessage,
        now: Instant,
    ) {
        match message {
            ClientMessage::Move {
                from,
                to,
                promotion,
                fen,
                clock,
                ..
            } => {
                let request = MoveRequest {
                    seat,
                    from,
                    to,
                    promotion,
                    claimed_fen: fen,
                };
                self.handle_move(connection, code, request, clock, now);
            }
            ClientMessage::OfferDraw { .. } => self.handle_offer_draw(connection, code, seat, now),
            ClientMessage::AcceptDraw { .. } => self.handle_accept_draw(connection, code, seat, now),
            ClientMessage::DeclineDraw { .. } => self.handle_decline_draw(connection, code, seat),
            ClientMessage::Resign { .. } => self.handle_resign(connection, code, seat, now),
            ClientMessage::Cancel { .. } => self.handle_cancel(connection, code, seat, now),
            ClientMessage::ConnectionStatus { status, .. } => {
                self.handle_status(code, seat, status)
            }
            ClientMessage::RequestSnapshot { .. } => {
                if let Some(room) = self.registry.get(code) {
                    let snapshot = room.snapshot();
                    self.send(
                        connection,
                        ServerMessage::Snapshot {
                            reason: SnapshotReason::Requested,
                            snapshot,
                        },
                    );
                }
            }
            ClientMessage::Join { .. } | ClientMessage::Heartbeat => {}
        }
    }

    /// The seat `connection` may act for in `code`. Anything else is answered
    /// with an error frame; acting on another room demands re-verification.
    fn authorized_seat(&mut self, connection: ConnectionId, code: &RoomCode) -> Option<SeatRole> {
        match self.connections.grant_for(connection, code) {
            Ok(grant) => Some(grant.seat),
            Err(GrantError::RoomMismatch {
                authorized,
                requested,
            }) => {
                tracing::warn!(
                    ?connection,
                    %authorized,
                    %requested,
                    "message for a foreign room, re-verification required"
                );
                self.connections.revoke(connection);
                self.error(connection, "re-verification required");
                None
            }
            Err(GrantError::Revoked) => {
                self.error(connection, "re-verification required");
                None
            }
            Err(GrantError::Unauthenticated | GrantError::UnknownConnection) => {
                self.error(connection, "join a seat first");
                None
            }
        }
    }

    fn answer_missing_room(&mut self, connection: ConnectionId, code: &RoomCode) {
        match self.store.get_game_record(code.as_str()) {
            Ok(Some(record)) if record.status.is_terminal() => {
                if let Some(message) = decided_message(&record) {
                    self.send(connection, message);
                    return;
                }
                self.error(connection, "game is over");
            }
            Ok(_) => self.error(connection, "room is not active"),
            Err(e) => {
                tracing::error!(room = %code, error = %e, "game store read failed");
                self.error(connection, "game store unavailable");
            }
        }
    }

    // ── Join ────────────────────────────────────────────────────────

    fn reject_join(&mut self, connection: ConnectionId, code: &RoomCode, rejection: &AuthRejection) {
        self.send(
            connection,
            ServerMessage::JoinRejected {
                room_code: code.clone(),
                reason: rejection.code().to_string(),
                message: rejection.to_string(),
            },
        );
    }

    fn reject_game_over(
        &mut self,
        connection: ConnectionId,
        code: &RoomCode,
        decided: Option<ServerMessage>,
    ) {
        self.send(
            connection,
            ServerMessage::JoinRejected {
                room_code: code.clone(),
                reason: "game_over".to_string(),
                message: "the game is already over".to_string(),
            },
        );
        if let Some(message) = decided {
            self.send(connection, message);
        }
    }

    fn handle_join(&mut self, connection: ConnectionId, request: &JoinRequest<'_>, now: Instant) {
        let code = request.room_code;
        let seat = request.seat;

        let seated = self
            .connections
            .get(connection)
            .and_then(|c| c.grant())
            .map(|g| (g.room.clone(), g.seat, g.identity.clone()));
        if let Some((room, held_seat, held_identity)) = seated {
            if &room != code {
                self.reject_join(connection, code, &AuthRejection::AlreadySeated);
                return;
            }
            if held_seat != seat || held_identity != request.identity {
                tracing::warn!(
                    room = %code,
                    ?connection,
                    "join would rebind a seated connection, re-verification required"
                );
                self.connections.revoke(connection);
                self.reject_join(connection, code, &AuthRejection::SeatTaken);
                return;
            }
        }

        // Settle anything already due so a late reconnect sees the outcome it earned.
        self.advance_room(code, now);
        if let Some(RoomPhase::Ending(pending)) = self.registry.get(code).map(|r| r.phase.clone()) {
            self.end_game(code, pending.reason, pending.winner, now);
        }
        if let Some(result) = self.registry.get(code).and_then(Room::result).cloned() {
            tracing::warn!(room = %code, %seat, "join after the game was decided");
            self.reject_game_over(connection, code, Some(result.to_message()));
            return;
        }

        let bound = self
            .registry
            .get(code)
            .and_then(|r| r.seat(seat).identity.clone());
        let now_ms = (self.wall_clock)();
        let admission = match self
            .gate
            .authorize(self.store.as_ref(), request, bound.as_deref(), now_ms)
        {
            Ok(admission) => admission,
            Err(rejection) => {
                match &rejection {
                    AuthRejection::GameOver(record) => {
                        tracing::warn!(room = %code, %seat, "reconnect after the game was decided");
                        self.reject_game_over(connection, code, decided_message(record));
                    }
                    AuthRejection::StoreUnavailable(e) => {
                        tracing::error!(room = %code, error = %e, "game store read failed");
                        self.reject_join(connection, code, &rejection);
                    }
                    _ => {
                        tracing::info!(room = %code, %seat, reason = rejection.code(), "join rejected");
                        self.reject_join(connection, code, &rejection);
                    }
                }
                return;
            }
        };

        self.admit(connection, code, admission.seat, &admission.identity, &admission.record, now);
    }

    fn admit(
        &mut self,
        connection: ConnectionId,
        code: &RoomCode,
        seat: SeatRole,
        identity: &str,
        record: &GameRecord,
        now: Instant,
    ) {
        let countdown = self.config.countdown();
        let initial_fen = self.oracle.initial_position();
        let config = &self.config;
        let room = self.registry.get_or_create(code, || {
            Room::new(code.clone(), &record.creator, initial_fen, config, now)
        });

        let previous = match room.join_seat(seat, identity, connection) {
            Ok(previous) => previous,
            Err(taken) => {
                tracing::warn!(room = %code, error = %taken, "seat bound between check and bind");
                self.reject_join(connection, code, &AuthRejection::SeatTaken);
                return;
            }
        };

        let mut reconnected = previous.is_some();
        if room.ready {
            let (expired, outcome) = room.seat_mut(seat).lifeline.reconnect(now, countdown);
            for window in expired {
                to_all(
                    &mut self.outbox,
                    room,
                    ServerMessage::LifelineLost {
                        seat,
                        remaining_lifelines: window.remaining,
                    },
                );
            }
            match outcome {
                Reconnect::Resumed => reconnected = true,
                Reconnect::AlreadyConnected => {}
                Reconnect::Forfeited => {
                    self.end_game(code, EndReason::DisconnectForfeit, Some(seat.opponent()), now);
                    let decided = self
                        .registry
                        .get(code)
                        .and_then(Room::result)
                        .map(|result| result.to_message());
                    self.reject_game_over(connection, code, decided);
                    return;
                }
            }
        }
        room.mark_present(seat);

        if let Some(prev) = previous {
            self.connections.clear(prev);
            if self.connections.is_open(prev) {
                self.outbox.push(Outbound {
                    connection: prev,
                    message: ServerMessage::Error {
                        message: "seat taken over by a new connection".into(),
                    },
                    disconnect: true,
                });
            }
        }
        self.connections.authorize(
            connection,
            SeatGrant {
                room: code.clone(),
                seat,
                identity: identity.to_string(),
                verified_at: now,
            },
        );
        tracing::info!(room = %code, %seat, ?connection, "seat admitted");

        push(
            &mut self.outbox,
            connection,
            ServerMessage::JoinAdmitted {
                room_code: code.clone(),
                seat,
                identity: identity.to_string(),
            },
        );
        to_seat(
            &mut self.outbox,
            room,
            seat.opponent(),
            ServerMessage::OpponentPresence {
                seat,
                present: true,
            },
        );
        if room.seat(seat.opponent()).present {
            push(
                &mut self.outbox,
                connection,
                ServerMessage::OpponentPresence {
                    seat: seat.opponent(),
                    present: true,
                },
            );
        }

        if room.mark_ready(now) {
            let creator = room.creator.identity.clone().unwrap_or_default();
            let joiner = room.joiner.identity.clone().unwrap_or_default();
            tracing::info!(room = %code, "both seats present, clock started");
            to_all(
                &mut self.outbox,
                room,
                ServerMessage::SessionReady {
                    creator,
                    joiner: joiner.clone(),
                },
            );
            let clock = room.clock.to_wire();
            to_all(&mut self.outbox, room, ServerMessage::ClockStarted { clock });
            if let Err(e) = self.store.mark_active(code.as_str(), &joiner) {
                tracing::warn!(room = %code, error = %e, "failed to mark game active");
            }
        } else if room.ready {
            let reason = if reconnected {
                SnapshotReason::Reconnected
            } else {
                SnapshotReason::DuplicateReady
            };
            if reconnected {
                to_seat(
                    &mut self.outbox,
                    room,
                    seat.opponent(),
                    ServerMessage::OpponentReconnected {
                        seat,
                        remaining_lifelines: room.seat(seat).lifeline.remaining(),
                    },
                );
                if !room.any_in_grace() && room.clock.resume(now) {
                    tracing::info!(room = %code, "clock resumed");
                }
            }
            push(
                &mut self.outbox,
                connection,
                ServerMessage::Snapshot {
                    reason,
                    snapshot: room.snapshot(),
                },
            );
            if reconnected {
                let clock = room.clock.to_wire();
                to_all(&mut self.outbox, room, ServerMessage::ClockSnapshot { clock });
            }
        }
    }

    // ── Gameplay ────────────────────────────────────────────────────

    fn handle_move(
        &mut self,
        connection: ConnectionId,
        code: &RoomCode,
        request: MoveRequest,
        reported: Option<ReportedClock>,
        now: Instant,
    ) {
        let tolerance = self.config.clock_tolerance_secs;
        let grace = self.config.finalize_grace();
        let Some(room) = self.registry.get_mut(code) else {
            return;
        };
        let seat = request.seat;

        let accepted = match submit_move(room, self.oracle.as_ref(), &request, now) {
            Ok(accepted) => accepted,
            Err(rejection) => {
                tracing::debug!(room = %code, %seat, reason = rejection.code(), "move rejected");
                push(
                    &mut self.outbox,
                    connection,
                    ServerMessage::MoveRejected {
                        reason: rejection.code().to_string(),
                        expected_turn: room.seat_to_move(),
                        snapshot: room.snapshot(),
                    },
                );
                return;
            }
        };

        // Only the mover's own side is corrected; the opponent's reported
        // value is ignored.
        if let Some(clock) = reported {
            let own = seat_color(seat);
            let secs = match own {
                Color::White => clock.white_secs,
                Color::Black => clock.black_secs,
            };
            room.clock.reconcile(own, secs, tolerance);
        }

        to_seat(
            &mut self.outbox,
            room,
            seat.opponent(),
            ServerMessage::MoveBroadcast {
                from: accepted.mv.from_square(),
                to: accepted.mv.to_square(),
                promotion: accepted.mv.promotion().map(|p| p.as_char().to_string()),
            },
        );
        push(
            &mut self.outbox,
            connection,
            ServerMessage::MoveAccepted {
                ply: accepted.ply,
                san: accepted.san.clone(),
                fen: accepted.fen.clone(),
            },
        );
        if accepted.fen_mismatch {
            push(
                &mut self.outbox,
                connection,
                ServerMessage::Snapshot {
                    reason: SnapshotReason::Resync,
                    snapshot: room.snapshot(),
                },
            );
        }

        let terminal = if accepted.is_checkmate {
            Some((EndReason::Checkmate, Some(seat)))
        } else if accepted.is_stalemate {
            Some((EndReason::Stalemate, None))
        } else {
            None
        };
        if let Some((reason, winner)) = terminal {
            tracing::info!(room = %code, reason = reason.as_str(), "terminal position reached");
            room.clock.stop();
            room.phase = RoomPhase::Ending(PendingEnd {
                reason,
                winner,
                due_at: now + grace,
            });
        }

        room.last_clock_sync = now;
        let clock = room.clock.to_wire();
        to_all(&mut self.outbox, room, ServerMessage::ClockSnapshot { clock });

        if let Some(side) = room.clock.expired_side() {
            self.end_game(code, EndReason::Timeout, Some(color_seat(side).opponent()), now);
        }
    }

    fn open_game(&mut self, connection: ConnectionId, code: &RoomCode) -> bool {
        let playing = self
            .registry
            .get(code)
            .is_some_and(|room| room.ready && room.is_open());
        if !playing {
            self.error(connection, "no game in progress");
        }
        playing
    }

    fn handle_offer_draw(&mut self, connection: ConnectionId, code: &RoomCode, seat: SeatRole, now: Instant) {
        if !self.open_game(connection, code) {
            return;
        }
        let Some(room) = self.registry.get_mut(code) else {
            return;
        };
        let offer = room.draw_offer;
        match offer {
            Some(by) if by == seat.opponent() => {
                self.end_game(code, EndReason::DrawAgreement, None, now);
            }
            Some(_) => {}
            None => {
                room.draw_offer = Some(seat);
                to_seat(
                    &mut self.outbox,
                    room,
                    seat.opponent(),
                    ServerMessage::DrawOffered { by: seat },
                );
            }
        }
    }

    fn handle_accept_draw(&mut self, connection: ConnectionId, code: &RoomCode, seat: SeatRole, now: Instant) {
        if !self.open_game(connection, code) {
            return;
        }
        let offered = self
            .registry
            .get(code)
            .and_then(|room| room.draw_offer)
            .is_some_and(|by| by == seat.opponent());
        if offered {
            self.end_game(code, EndReason::DrawAgreement, None, now);
        } else {
            self.error(connection, "no draw offer to accept");
        }
    }

    fn handle_decline_draw(&mut self, connection: ConnectionId, code: &RoomCode, seat: SeatRole) {
        if !self.open_game(connection, code) {
            return;
        }
        let Some(room) = self.registry.get_mut(code) else {
            return;
        };
        if room.draw_offer != Some(seat.opponent()) {
            self.error(connection, "no draw offer to decline");
            return;
        }
        room.draw_offer = None;
        to_seat(
            &mut self.outbox,
            room,
            seat.opponent(),
            ServerMessage::DrawDeclined { by: seat },
        );
    }

    fn handle_resign(&mut self, connection: ConnectionId, code: &RoomCode, seat: SeatRole, now: Instant) {
        let Some(room) = self.registry.get(code) else {
            return;
        };
        if !room.is_open() {
            tracing::debug!(room = %code, %seat, "resignation after the game ended, ignored");
            return;
        }
        if !room.ready {
            self.error(connection, "game has not started; cancel instead");
            return;
        }
        self.end_game(code, EndReason::Resignation, Some(seat.opponent()), now);
    }

    fn handle_cancel(&mut self, connection: ConnectionId, code: &RoomCode, seat: SeatRole, now: Instant) {
        let Some(room) = self.registry.get(code) else {
            return;
        };
        if seat != SeatRole::Creator {
            self.error(connection, "only the creator can cancel");
            return;
        }
        if room.ready || !room.is_open() {
            self.error(connection, "game already started");
            return;
        }
        self.end_game(code, EndReason::Cancelled, None, now);
    }

    fn handle_status(&mut self, code: &RoomCode, seat: SeatRole, status: ConnectionStatus) {
        if let Some(room) = self.registry.get(code) {
            to_seat(
                &mut self.outbox,
                room,
                seat.opponent(),
                ServerMessage::OpponentStatus { seat, status },
            );
        }
    }

    // ── Time ────────────────────────────────────────────────────────

    /// Run every room's due timers: clocks, grace windows, pending endings,
    /// periodic clock broadcasts and persistence retries.
    pub fn poll(&mut self, now: Instant) {
        for code in self.registry.codes() {
            self.advance_room(&code, now);
        }
    }

    fn advance_room(&mut self, code: &RoomCode, now: Instant) {
        let countdown = self.config.countdown();
        let sync = self.config.clock_sync();
        let Some(room) = self.registry.get_mut(code) else {
            return;
        };

        match &room.phase {
            RoomPhase::Completed { .. } => {
                self.persist(code, now, false);
                return;
            }
            RoomPhase::Ending(pending) => {
                if now >= pending.due_at {
                    let pending = *pending;
                    self.end_game(code, pending.reason, pending.winner, now);
                }
                return;
            }
            RoomPhase::Open => {}
        }
        if !room.ready {
            return;
        }

        if let Some(side) = room.clock.tick(now) {
            let winner = color_seat(side).opponent();
            tracing::info!(room = %code, %winner, "clock expired");
            self.end_game(code, EndReason::Timeout, Some(winner), now);
            return;
        }

        let mut forfeited = None;
        for seat in SeatRole::ALL {
            let windows = room.seat_mut(seat).lifeline.poll(now, countdown);
            for window in windows {
                tracing::info!(room = %code, %seat, remaining = window.remaining, "grace window expired");
                to_all(
                    &mut self.outbox,
                    room,
                    ServerMessage::LifelineLost {
                        seat,
                        remaining_lifelines: window.remaining,
                    },
                );
                match window.next_deadline {
                    Some(deadline) => to_seat(
                        &mut self.outbox,
                        room,
                        seat.opponent(),
                        ServerMessage::OpponentDisconnected {
                            seat,
                            remaining_lifelines: window.remaining,
                            countdown_ms: millis(deadline.saturating_duration_since(now)),
                        },
                    ),
                    None => {
                        forfeited.get_or_insert(seat);
                    }
                }
            }
        }
        if let Some(seat) = forfeited {
            tracing::warn!(room = %code, %seat, "lifelines exhausted, seat forfeits");
            self.end_game(code, EndReason::DisconnectForfeit, Some(seat.opponent()), now);
            return;
        }

        if room.clock.is_running() && now.saturating_duration_since(room.last_clock_sync) >= sync {
            room.last_clock_sync = now;
            let clock = room.clock.to_wire();
            to_all(&mut self.outbox, room, ServerMessage::ClockSnapshot { clock });
        }
    }

    // ── Ending ──────────────────────────────────────────────────────

    fn end_game(
        &mut self,
        code: &RoomCode,
        reason: EndReason,
        winner: Option<SeatRole>,
        now: Instant,
    ) {
        let finished_at = (self.wall_clock)();
        let budget = self.config.time_budget_secs;
        let Some(room) = self.registry.get_mut(code) else {
            return;
        };
        let done = finalize(room, self.oracle.as_ref(), reason, winner, finished_at, budget, now);
        if !done.first {
            return;
        }
        tracing::info!(
            room = %code,
            reason = reason.as_str(),
            winner = ?winner,
            plies = room.moves.len(),
            "game finished"
        );
        to_all(&mut self.outbox, room, done.result.to_message());
        self.persist(code, now, false);
    }

    /// Try to write a finished room's result. On success the room is torn
    /// down. `force` ignores the backoff schedule and retries parked rooms.
    fn persist(&mut self, code: &RoomCode, now: Instant, force: bool) {
        let Some(room) = self.registry.get_mut(code) else {
            return;
        };
        let outcome = match room.result() {
            Some(result) => outcome_for(room, result),
            None => return,
        };
        let RoomPhase::Completed { persist, .. } = &mut room.phase else {
            return;
        };
        let attempt = match persist.state() {
            PersistState::Pending => force || persist.is_due(now),
            PersistState::Abandoned => force,
            PersistState::Stored => false,
        };
        if !attempt {
            return;
        }

        match self.store.upsert_result(code.as_str(), &outcome) {
            Ok(()) => {
                persist.record_success();
                self.teardown(code);
            }
            Err(e) => match persist.record_failure(now, &self.retry) {
                PersistState::Abandoned => tracing::error!(
                    room = %code,
                    attempts = persist.failures(),
                    error = %e,
                    "giving up on persisting result, room parked"
                ),
                _ => tracing::warn!(
                    room = %code,
                    attempts = persist.failures(),
                    error = %e,
                    "failed to persist result, will retry"
                ),
            },
        }
    }

    fn teardown(&mut self, code: &RoomCode) {
        let Some(room) = self.registry.remove(code) else {
            return;
        };
        for seat in SeatRole::ALL {
            if let Some(conn) = room.seat(seat).connection {
                self.connections.clear(conn);
            }
        }
        tracing::info!(room = %code, "room closed");
    }

    /// Last chance before shutdown: settle pending endings and make one more
    /// write attempt for every unpersisted result.
    pub fn flush_pending(&mut self, now: Instant) {
        for code in self.registry.codes() {
            let pending = match self.registry.get(&code).map(|r| &r.phase) {
                Some(RoomPhase::Ending(pending)) => Some(*pending),
                _ => None,
            };
            if let Some(pending) = pending {
                self.end_game(&code, pending.reason, pending.winner, now);
            }
            self.persist(&code, now, true);
        }
    }

    /// Results still waiting to be stored.
    pub fn unpersisted(&self) -> usize {
        self.registry
            .codes()
            .iter()
            .filter_map(|code| self.registry.get(code))
            .filter(|room| match &room.phase {
                RoomPhase::Completed { persist, .. } => persist.state() != PersistState::Stored,
                _ => false,
            })
            .count()
    }
}
