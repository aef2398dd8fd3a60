use crate::error::StoreError;
use crate::record::{GameOutcome, GameRecord};

/// Read/upsert access to persisted games, as seen by the coordinator.
///
/// Implementations are owned by the coordinator thread, so `&self` methods
/// only need to be `Send`, not `Sync`.
pub trait GameStore: Send {
    fn get_game_record(&self, room_code: &str) -> Result<Option<GameRecord>, StoreError>;

    /// Record the joiner and flip a waiting game to active.
    fn mark_active(&self, room_code: &str, joiner: &str) -> Result<(), StoreError>;

    /// Write the settled result. A game that is already terminal keeps its
    /// first result.
    fn upsert_result(&self, room_code: &str, outcome: &GameOutcome) -> Result<(), StoreError>;
}
