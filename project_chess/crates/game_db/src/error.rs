use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("game not found: {0}")]
    GameNotFound(String),

    #[error("game already exists: {0}")]
    GameExists(String),

    #[error("invalid record for {room}: {detail}")]
    InvalidRecord { room: String, detail: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}
