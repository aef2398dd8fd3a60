//! Session coordinator for two-player wagered chess.
//!
//! [`Coordinator`] owns every live room and is driven by two kinds of
//! input: network events (`handle_connect`, `handle_message`,
//! `handle_disconnect`) and the passage of time (`poll`). All time-dependent
//! logic takes an explicit `Instant`.

pub mod auth;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod lifeline;
pub mod moves;
pub mod registry;
pub mod resolver;

pub use auth::{
    sign_join, signed_message, AuthRejection, AuthorizationGate, Ed25519Verifier,
    SignatureVerifier,
};
pub use clock::{ChessClock, ClockState};
pub use config::CoordinatorConfig;
pub use coordinator::{wall_clock_ms, Coordinator, Outbound};
pub use error::CoordinatorError;
pub use lifeline::Lifeline;
pub use registry::{Room, RoomRegistry};
pub use resolver::GameResult;
