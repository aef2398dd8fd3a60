use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RulesError {
    #[error("invalid FEN: {0}")]
    InvalidFen(String),

    #[error("invalid square: {0}")]
    InvalidSquare(String),

    #[error("invalid promotion piece: {0}")]
    InvalidPromotion(String),

    #[error("invalid SAN: {0}")]
    InvalidSan(String),

    #[error("illegal move: {0}")]
    IllegalMove(String),

    #[error("malformed PGN: {0}")]
    MalformedPgn(String),
}
