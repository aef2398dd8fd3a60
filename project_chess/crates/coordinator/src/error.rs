use thiserror::Error;

use game_db::StoreError;

/// Failures while assembling a coordinator. Gameplay rejections are values
/// (`MoveRejection`, `AuthRejection`), not errors.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
