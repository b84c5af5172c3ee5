use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            is_online   INTEGER NOT NULL DEFAULT 0,
            last_seen   TEXT,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            id           TEXT PRIMARY KEY,
            sender_id    TEXT NOT NULL REFERENCES users(id),
            receiver_id  TEXT NOT NULL REFERENCES users(id),
            text         TEXT NOT NULL,
            delivered    INTEGER NOT NULL DEFAULT 0,
            read         INTEGER NOT NULL DEFAULT 0,
            edited       INTEGER NOT NULL DEFAULT 0,
            deleted      INTEGER NOT NULL DEFAULT 0,
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL
        );

        -- Conversation fetches match either direction of the pair
        CREATE INDEX IF NOT EXISTS idx_messages_pair
            ON messages(sender_id, receiver_id, created_at);

        -- Unread aggregation
        CREATE INDEX IF NOT EXISTS idx_messages_unread
            ON messages(receiver_id, read);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
