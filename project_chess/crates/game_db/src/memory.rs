use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::StoreError;
use crate::record::{GameOutcome, GameRecord, GameStatus};
use crate::store::GameStore;

/// In-process store. Clones share the same games, so a test can keep a
/// handle while the coordinator owns another.
#[derive(Clone, Default)]
pub struct MemoryGameStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    games: Mutex<BTreeMap<String, GameRecord>>,
    failing_upserts: AtomicU32,
    upserts: AtomicU32,
}

impl MemoryGameStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_game(
        &self,
        room_code: &str,
        creator: &str,
        joiner: Option<&str>,
    ) -> Result<GameRecord, StoreError> {
        let mut games = self.lock()?;
        if games.contains_key(room_code) {
            return Err(StoreError::GameExists(room_code.to_string()));
        }
        let record = GameRecord::waiting(room_code, creator, joiner);
        games.insert(room_code.to_string(), record.clone());
        Ok(record)
    }

    /// Make the next `n` calls to `upsert_result` fail.
    pub fn fail_next_upserts(&self, n: u32) {
        self.inner.failing_upserts.store(n, Ordering::SeqCst);
    }

    /// Number of successful result writes.
    pub fn upsert_count(&self) -> u32 {
        self.inner.upserts.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, GameRecord>>, StoreError> {
        self.inner
            .games
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".into()))
    }
}

impl GameStore for MemoryGameStore {
    fn get_game_record(&self, room_code: &str) -> Result<Option<GameRecord>, StoreError> {
        Ok(self.lock()?.get(room_code).cloned())
    }

    fn mark_active(&self, room_code: &str, joiner: &str) -> Result<(), StoreError> {
        let mut games = self.lock()?;
        let record = games
            .get_mut(room_code)
            .ok_or_else(|| StoreError::GameNotFound(room_code.to_string()))?;
        if !record.status.is_terminal() {
            record.joiner = Some(joiner.to_string());
            record.status = GameStatus::Active;
        }
        Ok(())
    }

    fn upsert_result(&self, room_code: &str, outcome: &GameOutcome) -> Result<(), StoreError> {
        let failing = &self.inner.failing_upserts;
        if failing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Unavailable("injected failure".into()));
        }

        let mut games = self.lock()?;
        let record = games
            .entry(room_code.to_string())
            .or_insert_with(|| GameRecord::waiting(room_code, &outcome.creator, None));
        if !record.status.is_terminal() {
            record.settle(outcome);
        }
        self.inner.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
