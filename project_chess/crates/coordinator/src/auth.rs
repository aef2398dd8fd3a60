//! Authorization gate: proves a join request's identity and checks that the
//! identity is entitled to the requested seat.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use game_db::{GameRecord, GameStore};
use session::{RoomCode, SeatRole};
use thiserror::Error;

/// Verifies that `signature` over `message` was produced by `identity`.
pub trait SignatureVerifier: Send {
    fn verify(&self, identity: &str, message: &[u8], signature: &str) -> bool;
}

/// Identities are lowercase hex Ed25519 verifying keys; signatures are hex.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, identity: &str, message: &[u8], signature: &str) -> bool {
        if !is_canonical_hex(identity) {
            return false;
        }
        let Ok(key_bytes) = hex::decode(identity) else {
            return false;
        };
        let Ok(key_bytes) = <[u8; 32]>::try_from(key_bytes.as_slice()) else {
            return false;
        };
        let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
            return false;
        };
        let Ok(sig_bytes) = hex::decode(signature) else {
            return false;
        };
        let Ok(signature) = Signature::try_from(sig_bytes.as_slice()) else {
            return false;
        };
        key.verify(message, &signature).is_ok()
    }
}

fn is_canonical_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// The exact bytes a client signs to claim a seat.
pub fn signed_message(room: &RoomCode, seat: SeatRole, identity: &str, signed_at_ms: i64) -> String {
    format!("chess-session:{room}:{seat}:{identity}:{signed_at_ms}")
}

/// Client side of [`signed_message`]: returns `(identity, signature)`.
pub fn sign_join(
    key: &SigningKey,
    room: &RoomCode,
    seat: SeatRole,
    signed_at_ms: i64,
) -> (String, String) {
    let identity = hex::encode(key.verifying_key().to_bytes());
    let message = signed_message(room, seat, &identity, signed_at_ms);
    let signature = hex::encode(key.sign(message.as_bytes()).to_bytes());
    (identity, signature)
}

#[derive(Debug, Clone)]
pub struct JoinRequest<'a> {
    pub room_code: &'a RoomCode,
    pub identity: &'a str,
    pub signature: &'a str,
    pub signed_at_ms: i64,
    pub seat: SeatRole,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthRejection {
    #[error("signature does not match the claimed identity")]
    BadSignature,
    #[error("signature is older than the freshness window")]
    StaleSignature,
    #[error("signature timestamp is in the future")]
    FutureSignature,
    #[error("no game exists for this room")]
    UnknownRoom,
    #[error("the game is already over")]
    GameOver(Box<GameRecord>),
    #[error("identity is not entitled to this seat")]
    SeatMismatch,
    #[error("seat is already bound to another identity")]
    SeatTaken,
    #[error("connection already holds a seat in another room")]
    AlreadySeated,
    #[error("game store unavailable: {0}")]
    StoreUnavailable(String),
}

impl AuthRejection {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadSignature => "bad_signature",
            Self::StaleSignature => "stale_signature",
            Self::FutureSignature => "future_signature",
            Self::UnknownRoom => "unknown_room",
            Self::GameOver(_) => "game_over",
            Self::SeatMismatch => "seat_mismatch",
            Self::SeatTaken => "seat_taken",
            Self::AlreadySeated => "already_seated",
            Self::StoreUnavailable(_) => "store_unavailable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub seat: SeatRole,
    pub identity: String,
    pub record: GameRecord,
}

pub struct AuthorizationGate {
    verifier: Box<dyn SignatureVerifier>,
    freshness_ms: i64,
    future_skew_ms: i64,
}

impl AuthorizationGate {
    pub fn new(
        verifier: Box<dyn SignatureVerifier>,
        freshness_secs: u64,
        future_skew_secs: u64,
    ) -> Self {
        Self {
            verifier,
            freshness_ms: secs_to_ms(freshness_secs),
            future_skew_ms: secs_to_ms(future_skew_secs),
        }
    }

    pub fn ed25519(freshness_secs: u64, future_skew_secs: u64) -> Self {
        Self::new(Box::new(Ed25519Verifier), freshness_secs, future_skew_secs)
    }

    /// Decide a join request. Has no side effects; the caller binds the seat
    /// on admission.
    ///
    /// `bound_identity` is the identity already holding the seat in memory,
    /// if any.
    pub fn authorize(
        &self,
        store: &dyn GameStore,
        request: &JoinRequest<'_>,
        bound_identity: Option<&str>,
        now_ms: i64,
    ) -> Result<Admission, AuthRejection> {
        let message = signed_message(
            request.room_code,
            request.seat,
            request.identity,
            request.signed_at_ms,
        );
        if !self
            .verifier
            .verify(request.identity, message.as_bytes(), request.signature)
        {
            return Err(AuthRejection::BadSignature);
        }
        if now_ms.saturating_sub(request.signed_at_ms) > self.freshness_ms {
            return Err(AuthRejection::StaleSignature);
        }
        if request.signed_at_ms.saturating_sub(now_ms) > self.future_skew_ms {
            return Err(AuthRejection::FutureSignature);
        }

        let record = store
            .get_game_record(request.room_code.as_str())
            .map_err(|e| AuthRejection::StoreUnavailable(e.to_string()))?
            .ok_or(AuthRejection::UnknownRoom)?;
        if record.status.is_terminal() {
            return Err(AuthRejection::GameOver(Box::new(record)));
        }

        match request.seat {
            SeatRole::Creator => {
                if record.creator != request.identity {
                    return Err(AuthRejection::SeatMismatch);
                }
            }
            SeatRole::Joiner => {
                if record.creator == request.identity {
                    return Err(AuthRejection::SeatMismatch);
                }
                if let Some(joiner) = &record.joiner {
                    if joiner != request.identity {
                        return Err(AuthRejection::SeatMismatch);
                    }
                }
            }
        }
        if let Some(bound) = bound_identity {
            if bound != request.identity {
                return Err(AuthRejection::SeatTaken);
            }
        }

        Ok(Admission {
            seat: request.seat,
            identity: request.identity.to_string(),
            record,
        })
    }
}

fn secs_to_ms(secs: u64) -> i64 {
    i64::try_from(secs.saturating_mul(1000)).unwrap_or(i64::MAX)
}
