//! Domain model structs persisted in the SQLite database.

use chrono::{DateTime, Utc};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered account.  Created on signup and never updated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Row id assigned by SQLite on insert.
    pub id: i64,
    /// Unique, case-sensitive login name.
    pub username: String,
    /// bcrypt hash of the password (`users.password`).
    pub password_hash: String,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// File record
// ---------------------------------------------------------------------------

/// Registry entry for one uploaded blob.
///
/// `id` is the only externally valid reference to the file: whoever holds it
/// may view the metadata and download the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Random public identifier, also the stem of `stored_name`.
    pub id: Uuid,
    /// File name as sent by the uploading client.  Display only.
    pub original_name: String,
    /// Blob name under the upload root: `id` plus the sanitized extension.
    pub stored_name: String,
    /// Owning user (`users.id`).
    pub uploader_id: i64,
    /// Set once when the record is created.
    pub uploaded_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn new(
        id: Uuid,
        original_name: impl Into<String>,
        stored_name: impl Into<String>,
        uploader_id: i64,
    ) -> Self {
        Self {
            id,
            original_name: original_name.into(),
            stored_name: stored_name.into(),
            uploader_id,
            uploaded_at: Utc::now(),
        }
    }
}
