pub mod error;
pub mod memory;
pub mod record;
mod schema;
pub mod sqlite;
pub mod store;

pub use error::StoreError;
pub use memory::MemoryGameStore;
pub use record::{GameOutcome, GameRecord, GameStatus};
pub use sqlite::SqliteGameStore;
pub use store::GameStore;

#[cfg(test)]
mod tests {
    use super::*;
    use session::SeatRole;

    fn outcome(reason: &str, winner: Option<SeatRole>) -> GameOutcome {
        GameOutcome {
            creator: "aa".into(),
            joiner: Some("bb".into()),
            status: GameStatus::Completed,
            winner,
            reason: reason.into(),
            fen: "8/8/8/8/8/8/8/8 w - - 0 1".into(),
            pgn: "1. e4 *".into(),
            finished_at: 1_700_000_000_000,
        }
    }

    fn stores() -> Vec<Box<dyn GameStoreWithCreate>> {
        vec![
            Box::new(SqliteGameStore::open_memory().unwrap()),
            Box::new(MemoryGameStore::new()),
        ]
    }

    trait GameStoreWithCreate: GameStore {
        fn create(&self, room: &str, creator: &str, joiner: Option<&str>) -> Result<GameRecord, StoreError>;
    }

    impl GameStoreWithCreate for SqliteGameStore {
        fn create(&self, room: &str, creator: &str, joiner: Option<&str>) -> Result<GameRecord, StoreError> {
            self.create_game(room, creator, joiner)
        }
    }

    impl GameStoreWithCreate for MemoryGameStore {
        fn create(&self, room: &str, creator: &str, joiner: Option<&str>) -> Result<GameRecord, StoreError> {
            self.create_game(room, creator, joiner)
        }
    }

    #[test]
    fn missing_game_is_none() {
        for store in stores() {
            assert!(store.get_game_record("nope").unwrap().is_none());
        }
    }

    #[test]
    fn create_and_read_back() {
        for store in stores() {
            store.create("room1", "aa", None).unwrap();
            let record = store.get_game_record("room1").unwrap().unwrap();
            assert_eq!(record.creator, "aa");
            assert_eq!(record.joiner, None);
            assert_eq!(record.status, GameStatus::Waiting);
            assert!(matches!(
                store.create("room1", "cc", None),
                Err(StoreError::GameExists(_))
            ));
        }
    }

    #[test]
    fn mark_active_binds_joiner() {
        for store in stores() {
            store.create("room1", "aa", None).unwrap();
            store.mark_active("room1", "bb").unwrap();
            let record = store.get_game_record("room1").unwrap().unwrap();
            assert_eq!(record.joiner.as_deref(), Some("bb"));
            assert_eq!(record.status, GameStatus::Active);
            assert!(matches!(
                store.mark_active("ghost", "bb"),
                Err(StoreError::GameNotFound(_))
            ));
        }
    }

    #[test]
    fn first_result_wins() {
        for store in stores() {
            store.create("room1", "aa", None).unwrap();
            store
                .upsert_result("room1", &outcome("checkmate", Some(SeatRole::Creator)))
                .unwrap();
            store
                .upsert_result("room1", &outcome("timeout", Some(SeatRole::Joiner)))
                .unwrap();

            let record = store.get_game_record("room1").unwrap().unwrap();
            assert_eq!(record.status, GameStatus::Completed);
            assert_eq!(record.winner, Some(SeatRole::Creator));
            assert_eq!(record.reason.as_deref(), Some("checkmate"));
            assert_eq!(record.joiner.as_deref(), Some("bb"));
            assert_eq!(record.finished_at, Some(1_700_000_000_000));

            // Terminal games refuse to go active again.
            store.mark_active("room1", "zz").unwrap();
            let record = store.get_game_record("room1").unwrap().unwrap();
            assert_eq!(record.status, GameStatus::Completed);
            assert_eq!(record.joiner.as_deref(), Some("bb"));
        }
    }

    #[test]
    fn upsert_inserts_unknown_room() {
        for store in stores() {
            store
                .upsert_result("adhoc", &outcome("draw_agreement", None))
                .unwrap();
            let record = store.get_game_record("adhoc").unwrap().unwrap();
            assert_eq!(record.winner, None);
            assert_eq!(record.pgn.as_deref(), Some("1. e4 *"));
        }
    }

    #[test]
    fn injected_failures_are_consumed() {
        let store = MemoryGameStore::new();
        store.create_game("room1", "aa", None).unwrap();
        store.fail_next_upserts(2);
        let settled = outcome("resignation", Some(SeatRole::Joiner));
        assert!(matches!(
            store.upsert_result("room1", &settled),
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.upsert_result("room1", &settled).is_err());
        store.upsert_result("room1", &settled).unwrap();
        assert_eq!(store.upsert_count(), 1);

        let shared = store.clone();
        assert_eq!(
            shared.get_game_record("room1").unwrap().unwrap().status,
            GameStatus::Completed
        );
    }

    #[test]
    fn file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("games.db");
        let path = path.to_str().unwrap();
        {
            let store = SqliteGameStore::open(path).unwrap();
            store.create_game("room1", "aa", Some("bb")).unwrap();
            store
                .upsert_result("room1", &outcome("stalemate", None))
                .unwrap();
        }
        let reopened = SqliteGameStore::open(path).unwrap();
        let record = reopened.get_game_record("room1").unwrap().unwrap();
        assert_eq!(record.reason.as_deref(), Some("stalemate"));
        assert_eq!(record.status, GameStatus::Completed);
    }
}
