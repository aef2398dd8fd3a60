use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

/// Opaque, externally issued room code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomCode(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomCodeError {
    #[error("room code is empty")]
    Empty,
    #[error("room code longer than {max} characters")]
    TooLong { max: usize },
    #[error("room code contains invalid character {0:?}")]
    InvalidChar(char),
}

impl RoomCode {
    pub const MAX_LEN: usize = 64;

    pub fn new(code: impl Into<String>) -> Result<Self, RoomCodeError> {
        let code = code.into();
        if code.is_empty() {
            return Err(RoomCodeError::Empty);
        }
        if code.len() > Self::MAX_LEN {
            return Err(RoomCodeError::TooLong { max: Self::MAX_LEN });
        }
        if let Some(c) = code
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(RoomCodeError::InvalidChar(c));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoomCode {
    type Error = RoomCodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RoomCode> for String {
    fn from(code: RoomCode) -> Self {
        code.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One of the two fixed roles in a room. The creator plays white.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeatRole {
    Creator,
    Joiner,
}

impl SeatRole {
    pub const ALL: [SeatRole; 2] = [SeatRole::Creator, SeatRole::Joiner];

    pub fn opponent(self) -> Self {
        match self {
            Self::Creator => Self::Joiner,
            Self::Joiner => Self::Creator,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Creator => "creator",
            Self::Joiner => "joiner",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "creator" => Some(Self::Creator),
            "joiner" => Some(Self::Joiner),
            _ => None,
        }
    }
}

impl fmt::Display for SeatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionOutput {
    pub connection_id: ConnectionId,
    pub text: String,
    /// When true, the output router will close the connection's write channel
    /// after delivering this message, causing the socket to shut down.
    pub disconnect: bool,
}

impl ConnectionOutput {
    pub fn new(connection_id: ConnectionId, text: impl Into<String>) -> Self {
        Self {
            connection_id,
            text: text.into(),
            disconnect: false,
        }
    }

    /// Create a final message that will disconnect the connection after delivery.
    pub fn with_disconnect(connection_id: ConnectionId, text: impl Into<String>) -> Self {
        Self {
            connection_id,
            text: text.into(),
            disconnect: true,
        }
    }
}

/// A verified identity bound to a seat, recorded on the connection at admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatGrant {
    pub room: RoomCode,
    pub seat: SeatRole,
    pub identity: String,
    pub verified_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authorized(SeatGrant),
    /// A fresh signature is required before any further mutating operation.
    Revoked(SeatGrant),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GrantError {
    #[error("unknown connection")]
    UnknownConnection,
    #[error("connection has not joined a seat")]
    Unauthenticated,
    #[error("re-verification required")]
    Revoked,
    #[error("connection is authorized for room {authorized}, not {requested}")]
    RoomMismatch {
        authorized: RoomCode,
        requested: RoomCode,
    },
}

#[derive(Debug, Clone)]
pub struct Connection {
    pub connection_id: ConnectionId,
    pub auth: AuthState,
    pub opened_at: Instant,
}

impl Connection {
    pub fn new(connection_id: ConnectionId, now: Instant) -> Self {
        Self {
            connection_id,
            auth: AuthState::Unauthenticated,
            opened_at: now,
        }
    }

    pub fn grant(&self) -> Option<&SeatGrant> {
        match &self.auth {
            AuthState::Authorized(grant) => Some(grant),
            _ => None,
        }
    }
}

/// Tracks open connections and what each one is authorized to do.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: BTreeMap<ConnectionId, Connection>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection with a network-assigned ID.
    pub fn open(&mut self, id: ConnectionId, now: Instant) {
        self.connections.insert(id, Connection::new(id, now));
    }

    /// Remove a connection, returning its final state.
    pub fn close(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn is_open(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Bind a verified seat grant to a connection (on admission).
    pub fn authorize(&mut self, id: ConnectionId, grant: SeatGrant) -> bool {
        match self.connections.get_mut(&id) {
            Some(conn) => {
                conn.auth = AuthState::Authorized(grant);
                true
            }
            None => false,
        }
    }

    /// Invalidate a connection's authorization until it presents a fresh signature.
    /// Returns true if an active grant was revoked.
    pub fn revoke(&mut self, id: ConnectionId) -> bool {
        let Some(conn) = self.connections.get_mut(&id) else {
            return false;
        };
        match std::mem::replace(&mut conn.auth, AuthState::Unauthenticated) {
            AuthState::Authorized(grant) | AuthState::Revoked(grant) => {
                conn.auth = AuthState::Revoked(grant);
                true
            }
            AuthState::Unauthenticated => false,
        }
    }

    /// Drop any grant without demanding re-verification (seat handed to another connection).
    pub fn clear(&mut self, id: ConnectionId) {
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.auth = AuthState::Unauthenticated;
        }
    }

    /// The grant a connection holds for `room`, if it may mutate that room.
    pub fn grant_for(&self, id: ConnectionId, room: &RoomCode) -> Result<&SeatGrant, GrantError> {
        let conn = self
            .connections
            .get(&id)
            .ok_or(GrantError::UnknownConnection)?;
        match &conn.auth {
            AuthState::Unauthenticated => Err(GrantError::Unauthenticated),
            AuthState::Revoked(_) => Err(GrantError::Revoked),
            AuthState::Authorized(grant) if &grant.room == room => Ok(grant),
            AuthState::Authorized(grant) => Err(GrantError::RoomMismatch {
                authorized: grant.room.clone(),
                requested: room.clone(),
            }),
        }
    }

    pub fn all_ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
