//! v001 -- Initial schema creation.
//!
//! Creates the `users` and `files` tables.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    username   TEXT NOT NULL UNIQUE,          -- case-sensitive, as typed
    password   TEXT NOT NULL,                 -- bcrypt hash, never plaintext
    created_at TEXT NOT NULL                  -- RFC-3339, microseconds
);

-- ----------------------------------------------------------------
-- Files (registry of uploaded blobs)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS files (
    id            TEXT PRIMARY KEY NOT NULL,  -- UUID v4, the public handle
    original_name TEXT NOT NULL,              -- client supplied, display only
    stored_name   TEXT NOT NULL UNIQUE,       -- <id><ext> under the upload root
    uploader_id   INTEGER NOT NULL,
    uploaded_at   TEXT NOT NULL,

    FOREIGN KEY (uploader_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_files_uploader_ts
    ON files(uploader_id, uploaded_at DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
