use anyhow::Result;
use rusqlite::Connection;

pub const SCHEMA_VERSION: &str = "1";

pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch("
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;

        CREATE TABLE IF NOT EXISTS meta (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- One row per movie id. genres/keywords are JSON arrays, embedding is
        -- little-endian f32 and NULL until the movie has been embedded.
        CREATE TABLE IF NOT EXISTS movies (
            id           INTEGER PRIMARY KEY,
            title        TEXT NOT NULL,
            overview     TEXT NOT NULL,
            release_date TEXT,
            poster_path  TEXT,
            genres       TEXT NOT NULL DEFAULT '[]',
            keywords     TEXT NOT NULL DEFAULT '[]',
            vote_average REAL,
            vote_count   INTEGER,
            text_hash    TEXT NOT NULL,
            embedding    BLOB
        );
    ")?;

    conn.execute(
        "INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION],
    )?;

    Ok(())
}
