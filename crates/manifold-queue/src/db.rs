use rusqlite::Connection;

use crate::error::Result;

/// Initialise the task queue schema in `conn`.
///
/// `seq` orders claims FIFO; the partial index keeps the claim query
/// efficient however deep the backlog gets.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS tasks (
            seq         INTEGER PRIMARY KEY AUTOINCREMENT,
            id          TEXT    NOT NULL UNIQUE,
            payload     TEXT    NOT NULL,   -- JSON-encoded SessionTask
            trace_id    TEXT    NOT NULL,
            status      TEXT    NOT NULL DEFAULT 'pending',
            claimed_by  TEXT,
            claimed_at  TEXT,               -- ISO-8601 or NULL
            enqueued_at TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_tasks_status_seq ON tasks (status, seq);
        ",
    )?;
    Ok(())
}
