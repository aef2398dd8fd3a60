use rusqlite::Connection;

use crate::error::StoreError;

pub fn create_tables(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS games (
            room_code    TEXT PRIMARY KEY,
            creator      TEXT NOT NULL,
            joiner       TEXT,
            status       TEXT NOT NULL DEFAULT 'waiting',
            winner       TEXT,
            reason       TEXT,
            fen          TEXT,
            pgn          TEXT,
            finished_at  INTEGER,
            created_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;
    Ok(())
}
