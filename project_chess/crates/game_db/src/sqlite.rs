use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use session::SeatRole;

use crate::error::StoreError;
use crate::record::{winner_to_sql, GameOutcome, GameRecord, GameStatus};
use crate::schema;
use crate::store::GameStore;

/// SQLite-backed game store.
pub struct SqliteGameStore {
    conn: Connection,
}

impl SqliteGameStore {
    /// Open (or create) a database at the given file path.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=2000;")?;
        schema::create_tables(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        schema::create_tables(&conn)?;
        Ok(Self { conn })
    }

    /// Register a new waiting game. Room issuance happens outside the
    /// coordinator; this is the write that issuance performs.
    pub fn create_game(
        &self,
        room_code: &str,
        creator: &str,
        joiner: Option<&str>,
    ) -> Result<GameRecord, StoreError> {
        if self.get_game_record(room_code)?.is_some() {
            return Err(StoreError::GameExists(room_code.to_string()));
        }
        self.conn.execute(
            "INSERT INTO games (room_code, creator, joiner, status) VALUES (?1, ?2, ?3, ?4)",
            params![room_code, creator, joiner, GameStatus::Waiting.as_str()],
        )?;
        Ok(GameRecord::waiting(room_code, creator, joiner))
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
        Ok(RawRow {
            room_code: row.get(0)?,
            creator: row.get(1)?,
            joiner: row.get(2)?,
            status: row.get(3)?,
            winner: row.get(4)?,
            reason: row.get(5)?,
            fen: row.get(6)?,
            pgn: row.get(7)?,
            finished_at: row.get(8)?,
        })
    }
}

struct RawRow {
    room_code: String,
    creator: String,
    joiner: Option<String>,
    status: String,
    winner: Option<String>,
    reason: Option<String>,
    fen: Option<String>,
    pgn: Option<String>,
    finished_at: Option<i64>,
}

impl RawRow {
    fn into_record(self) -> Result<GameRecord, StoreError> {
        let invalid = |detail: String| StoreError::InvalidRecord {
            room: self.room_code.clone(),
            detail,
        };
        let status = GameStatus::parse(&self.status)
            .ok_or_else(|| invalid(format!("unknown status '{}'", self.status)))?;
        let winner = match self.winner.as_deref() {
            None => None,
            Some(w) => Some(
                SeatRole::parse(w).ok_or_else(|| invalid(format!("unknown winner '{w}'")))?,
            ),
        };
        Ok(GameRecord {
            room_code: self.room_code,
            creator: self.creator,
            joiner: self.joiner,
            status,
            winner,
            reason: self.reason,
            fen: self.fen,
            pgn: self.pgn,
            finished_at: self.finished_at,
        })
    }
}

impl GameStore for SqliteGameStore {
    fn get_game_record(&self, room_code: &str) -> Result<Option<GameRecord>, StoreError> {
        let raw = self
            .conn
            .query_row(
                "SELECT room_code, creator, joiner, status, winner, reason, fen, pgn, finished_at
                 FROM games WHERE room_code = ?1",
                params![room_code],
                Self::row_to_record,
            )
            .optional()?;
        raw.map(RawRow::into_record).transpose()
    }

    fn mark_active(&self, room_code: &str, joiner: &str) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE games SET joiner = ?2, status = 'active'
             WHERE room_code = ?1 AND status IN ('waiting', 'active')",
            params![room_code, joiner],
        )?;
        if changed == 0 && self.get_game_record(room_code)?.is_none() {
            return Err(StoreError::GameNotFound(room_code.to_string()));
        }
        Ok(())
    }

    fn upsert_result(&self, room_code: &str, outcome: &GameOutcome) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO games (room_code, creator, joiner, status, winner, reason, fen, pgn, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(room_code) DO UPDATE SET
                joiner = COALESCE(excluded.joiner, games.joiner),
                status = excluded.status,
                winner = excluded.winner,
                reason = excluded.reason,
                fen = excluded.fen,
                pgn = excluded.pgn,
                finished_at = excluded.finished_at
             WHERE games.status NOT IN ('completed', 'cancelled')",
            params![
                room_code,
                outcome.creator,
                outcome.joiner,
                outcome.status.as_str(),
                winner_to_sql(outcome.winner),
                outcome.reason,
                outcome.fen,
                outcome.pgn,
                outcome.finished_at,
            ],
        )?;
        tracing::debug!(room = room_code, status = %outcome.status, "game result stored");
        Ok(())
    }
}
