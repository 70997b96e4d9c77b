//! File registry: maps public ids to blob metadata.

use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::database::{decode_timestamp, encode_timestamp, Database};
use crate::error::Result;
use crate::models::FileRecord;

impl Database {
    /// Insert `record` and run `finalize` inside the same transaction.
    ///
    /// The row only becomes visible if `finalize` succeeds; it is where the
    /// caller moves the staged blob into place.  If either step fails the
    /// transaction is rolled back and nothing is registered.
    pub fn register_file<F>(&mut self, record: &FileRecord, finalize: F) -> Result<()>
    where
        F: FnOnce() -> std::io::Result<()>,
    {
        let tx = self.conn_mut().transaction()?;

        tx.execute(
            "INSERT INTO files (id, original_name, stored_name, uploader_id, uploaded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id.to_string(),
                record.original_name,
                record.stored_name,
                record.uploader_id,
                encode_timestamp(&record.uploaded_at),
            ],
        )?;

        finalize()?;
        tx.commit()?;

        tracing::debug!(id = %record.id, uploader_id = record.uploader_id, "file registered");
        Ok(())
    }

    /// Look a file up by its public id.  No ownership check is made.
    pub fn get_file(&self, id: Uuid) -> Result<Option<FileRecord>> {
        let record = self
            .conn()
            .query_row(
                "SELECT id, original_name, stored_name, uploader_id, uploaded_at
                 FROM files
                 WHERE id = ?1",
                params![id.to_string()],
                row_to_file,
            )
            .optional()?;
        Ok(record)
    }

    /// All files uploaded by one user, newest first.
    pub fn list_files_by_uploader(&self, uploader_id: i64) -> Result<Vec<FileRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, original_name, stored_name, uploader_id, uploaded_at
             FROM files
             WHERE uploader_id = ?1
             ORDER BY uploaded_at DESC, rowid DESC",
        )?;

        let rows = stmt.query_map(params![uploader_id], row_to_file)?;

        let mut files = Vec::new();
        for row in rows {
            files.push(row?);
        }
        Ok(files)
    }
}

fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
    let id_str: String = row.get(0)?;
    let uploaded_str: String = row.get(4)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(FileRecord {
        id,
        original_name: row.get(1)?,
        stored_name: row.get(2)?,
        uploader_id: row.get(3)?,
        uploaded_at: decode_timestamp(&uploaded_str, 4)?,
    })
}
