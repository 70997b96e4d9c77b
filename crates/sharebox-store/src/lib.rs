//! # sharebox-store
//!
//! Relational storage for the ShareBox file-sharing service, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for the two tables the
//! service needs: registered users (the credential store) and uploaded file
//! records (the file registry).

pub mod database;
pub mod files;
pub mod migrations;
pub mod models;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
