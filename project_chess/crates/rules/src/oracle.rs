use shakmaty::fen::Fen;
use shakmaty::san::{San, SanPlus, Suffix};
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, EnPassantMode, Move, Position};

use crate::error::RulesError;
use crate::moves::{ChessMove, Color, Promotion};

pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Result of applying a legal move to a position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub fen: String,
    /// Standard algebraic notation including `+`/`#` suffixes.
    pub san: String,
    pub is_check: bool,
    pub is_checkmate: bool,
    pub is_stalemate: bool,
}

/// The chess rules capability consumed by the coordinator.
///
/// Positions are exchanged as FEN strings so the oracle stays stateless and
/// any position can be replayed from the move log alone.
pub trait RulesOracle: Send + Sync {
    fn initial_position(&self) -> String {
        STARTING_FEN.to_string()
    }

    fn side_to_move(&self, fen: &str) -> Result<Color, RulesError>;

    fn legal_moves(&self, fen: &str) -> Result<Vec<ChessMove>, RulesError>;

    fn apply(&self, fen: &str, mv: &ChessMove) -> Result<Applied, RulesError>;

    /// Resolve a SAN token (as found in a transcript) against a position.
    fn resolve_san(&self, fen: &str, san: &str) -> Result<ChessMove, RulesError>;
}

/// Final state of replaying a move sequence from the initial position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replay {
    pub fen: String,
    pub sans: Vec<String>,
    pub last: Option<Applied>,
}

/// Replay `moves` from the oracle's initial position.
pub fn replay<'a, I>(oracle: &dyn RulesOracle, moves: I) -> Result<Replay, RulesError>
where
    I: IntoIterator<Item = &'a ChessMove>,
{
    let mut fen = oracle.initial_position();
    let mut sans = Vec::new();
    let mut last = None;
    for mv in moves {
        let applied = oracle.apply(&fen, mv)?;
        fen = applied.fen.clone();
        sans.push(applied.san.clone());
        last = Some(applied);
    }
    Ok(Replay { fen, sans, last })
}

/// [`RulesOracle`] backed by shakmaty.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShakmatyOracle;

impl ShakmatyOracle {
    pub fn new() -> Self {
        Self
    }

    fn position(fen: &str) -> Result<Chess, RulesError> {
        let fen: Fen = fen
            .parse()
            .map_err(|e| RulesError::InvalidFen(format!("{e}")))?;
        let position: Chess = fen
            .into_position(CastlingMode::Standard)
            .map_err(|e| RulesError::InvalidFen(format!("{e}")))?;
        Ok(position)
    }

    fn fen_of(position: &Chess) -> String {
        Fen::from_position(position.clone(), EnPassantMode::Legal).to_string()
    }

    fn to_chess_move(m: &Move) -> Result<ChessMove, RulesError> {
        match UciMove::from_move(m, CastlingMode::Standard) {
            UciMove::Normal {
                from,
                to,
                promotion,
            } => Ok(ChessMove::from_parts(
                from,
                to,
                promotion.and_then(Promotion::from_role),
            )),
            other => Err(RulesError::IllegalMove(other.to_string())),
        }
    }
}

impl RulesOracle for ShakmatyOracle {
    fn side_to_move(&self, fen: &str) -> Result<Color, RulesError> {
        Ok(Self::position(fen)?.turn().into())
    }

    fn legal_moves(&self, fen: &str) -> Result<Vec<ChessMove>, RulesError> {
        let position = Self::position(fen)?;
        position
            .legal_moves()
            .iter()
            .map(Self::to_chess_move)
            .collect()
    }

    fn apply(&self, fen: &str, mv: &ChessMove) -> Result<Applied, RulesError> {
        let position = Self::position(fen)?;
        let uci: UciMove = mv
            .uci()
            .parse()
            .map_err(|_| RulesError::IllegalMove(mv.uci()))?;
        let m = uci
            .to_move(&position)
            .map_err(|_| RulesError::IllegalMove(mv.uci()))?;

        let mut after = position;
        let san = SanPlus::from_move_and_play_unchecked(&mut after, &m);

        Ok(Applied {
            fen: Self::fen_of(&after),
            san: san.to_string(),
            is_check: san.suffix.is_some(),
            is_checkmate: san.suffix == Some(Suffix::Checkmate),
            is_stalemate: after.is_stalemate(),
        })
    }

    fn resolve_san(&self, fen: &str, san: &str) -> Result<ChessMove, RulesError> {
        let position = Self::position(fen)?;
        let bare = san.trim_end_matches(['+', '#', '!', '?']);
        let parsed: San = bare
            .parse()
            .map_err(|_| RulesError::InvalidSan(san.to_string()))?;
        let m = parsed
            .to_move(&position)
            .map_err(|_| RulesError::IllegalMove(san.to_string()))?;
        Self::to_chess_move(&m)
    }
}
