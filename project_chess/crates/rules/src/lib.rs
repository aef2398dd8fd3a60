//! Chess rules seam for the session coordinator.
//!
//! The coordinator never inspects a board itself. It asks a [`RulesOracle`]
//! whose turn it is, whether a move is legal, and what the resulting position
//! is. [`ShakmatyOracle`] is the production implementation.

pub mod error;
pub mod moves;
pub mod oracle;
pub mod pgn;

pub use error::RulesError;
pub use moves::{ChessMove, Color, Promotion};
pub use oracle::{replay, Applied, Replay, RulesOracle, ShakmatyOracle, STARTING_FEN};
pub use pgn::Pgn;
