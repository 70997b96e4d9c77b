//! Credential store: account creation, lookup and password verification.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::database::{decode_timestamp, encode_timestamp, Database};
use crate::error::{Result, StoreError};
use crate::models::User;

/// bcrypt work factor.  Tuned for interactive login latency.
pub const PASSWORD_HASH_COST: u32 = 10;

/// A signup request whose password has already been hashed.
///
/// Hashing is deliberately split from [`Database::create_user`] so the slow
/// bcrypt step can run without holding the database handle.
#[derive(Debug, Clone)]
pub struct NewUser {
    username: String,
    password_hash: String,
}

impl NewUser {
    /// Hash `password` with a fresh salt.
    pub fn hash(username: impl Into<String>, password: &str) -> Result<Self> {
        let password_hash = bcrypt::hash(password, PASSWORD_HASH_COST)?;
        Ok(Self {
            username: username.into(),
            password_hash,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

impl Database {
    /// Insert a new account.
    ///
    /// Fails with [`StoreError::DuplicateUsername`] when the name is taken;
    /// in that case no row is written.
    pub fn create_user(&self, new_user: &NewUser) -> Result<User> {
        let created_at = Utc::now();

        let inserted = self.conn().execute(
            "INSERT INTO users (username, password, created_at) VALUES (?1, ?2, ?3)",
            params![
                new_user.username,
                new_user.password_hash,
                encode_timestamp(&created_at),
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                return Err(StoreError::DuplicateUsername);
            }
            Err(other) => return Err(other.into()),
        }

        let user = User {
            id: self.conn().last_insert_rowid(),
            username: new_user.username.clone(),
            password_hash: new_user.password_hash.clone(),
            created_at,
        };

        tracing::info!(user_id = user.id, username = %user.username, "user created");
        Ok(user)
    }

    /// Exact, case-sensitive lookup by username.
    pub fn find_user(&self, username: &str) -> Result<Option<User>> {
        let user = self
            .conn()
            .query_row(
                "SELECT id, username, password, created_at FROM users WHERE username = ?1",
                params![username],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }
}

/// Check `candidate` against the stored bcrypt hash.
///
/// A malformed stored hash counts as a mismatch.
pub fn verify_password(user: &User, candidate: &str) -> bool {
    match bcrypt::verify(candidate, &user.password_hash) {
        Ok(valid) => valid,
        Err(e) => {
            tracing::warn!(user_id = user.id, error = %e, "stored password hash is unusable");
            false
        }
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let created_str: String = row.get(3)?;

    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        created_at: decode_timestamp(&created_str, 3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_db() -> (Database, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (db, dir)
    }

    fn user_count(db: &Database) -> i64 {
        db.conn()
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn create_then_find() {
        let (db, _dir) = test_db();

        let created = db
            .create_user(&NewUser::hash("alice", "pw1").unwrap())
            .unwrap();
        let found = db.find_user("alice").unwrap().expect("user should exist");

        assert_eq!(found.id, created.id);
        assert_eq!(found.username, "alice");
        assert_ne!(found.password_hash, "pw1");
    }

    #[test]
    fn verify_accepts_only_original_password() {
        let (db, _dir) = test_db();
        db.create_user(&NewUser::hash("bob", "correct horse").unwrap())
            .unwrap();
        let user = db.find_user("bob").unwrap().unwrap();

        assert!(verify_password(&user, "correct horse"));
        assert!(!verify_password(&user, "correct horse "));
        assert!(!verify_password(&user, "Correct horse"));
        assert!(!verify_password(&user, ""));
    }

    #[test]
    fn same_password_gets_distinct_salts() {
        let a = NewUser::hash("a", "secret").unwrap();
        let b = NewUser::hash("b", "secret").unwrap();
        assert_ne!(a.password_hash, b.password_hash);
    }

    #[test]
    fn duplicate_username_is_rejected_without_new_row() {
        let (db, _dir) = test_db();
        db.create_user(&NewUser::hash("carol", "one").unwrap())
            .unwrap();

        let err = db
            .create_user(&NewUser::hash("carol", "two").unwrap())
            .unwrap_err();

        assert!(matches!(err, StoreError::DuplicateUsername));
        assert_eq!(user_count(&db), 1);
        let user = db.find_user("carol").unwrap().unwrap();
        assert!(verify_password(&user, "one"));
    }

    #[test]
    fn usernames_are_case_sensitive() {
        let (db, _dir) = test_db();
        db.create_user(&NewUser::hash("dave", "pw").unwrap()).unwrap();
        db.create_user(&NewUser::hash("Dave", "pw").unwrap()).unwrap();

        assert_eq!(user_count(&db), 2);
        assert!(db.find_user("DAVE").unwrap().is_none());
    }

    #[test]
    fn unknown_user_is_none() {
        let (db, _dir) = test_db();
        assert!(db.find_user("nobody").unwrap().is_none());
    }

    #[test]
    fn malformed_hash_never_verifies() {
        let user = User {
            id: 1,
            username: "eve".into(),
            password_hash: "not-a-bcrypt-hash".into(),
            created_at: Utc::now(),
        };
        assert!(!verify_password(&user, "not-a-bcrypt-hash"));
    }
}
