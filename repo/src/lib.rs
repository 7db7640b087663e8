//! SQLite-backed persistence for jobs, installed engine variants, and
//! global settings.
//!
//! Grounded on `SinergaOptima-Dictum/dictum-app/src/storage.rs`'s
//! `LocalStore`: every method opens a fresh `Connection` for its own
//! duration rather than holding one behind a lock, which keeps the
//! synchronous `rusqlite` calls trivially `Send` to move onto a blocking
//! thread with `tokio::task::spawn_blocking`. One physical file backs all
//! four tables (spec.md §6.3 describes a single SQLite database).

use std::path::{Path, PathBuf};

use rusqlite::Connection;

pub use engine_repo::SqliteEngineRepository;
pub use error::RepoError;
pub use job_repo::SqliteJobRepository;
pub use settings_repo::SqliteSettingsRepository;

mod engine_repo;
mod error;
mod job_repo;
mod schema;
mod settings_repo;

/// Opens (creating if absent) the database at `path` and applies the
/// schema. Call once at startup; the returned handle is cheap to clone
/// (it's just a path) and each crate's repository wraps it independently.
#[derive(Clone)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepoError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(schema::SCHEMA)?;
        Ok(Self { path })
    }

    pub fn job_repository(&self) -> SqliteJobRepository {
        SqliteJobRepository::new(self.path.clone())
    }

    pub fn settings_repository(&self) -> SqliteSettingsRepository {
        SqliteSettingsRepository::new(self.path.clone())
    }

    pub fn engine_repository(&self) -> SqliteEngineRepository {
        SqliteEngineRepository::new(self.path.clone())
    }
}

/// Shared by every repository in this crate: run a blocking closure that
/// needs its own `Connection` on the blocking thread pool. The closure
/// owns the connection (rather than borrowing it) so it can open a
/// transaction, which `rusqlite` requires `&mut self` for.
pub(crate) async fn blocking<T, F>(path: PathBuf, f: F) -> Result<T, RepoError>
where
    T: Send + 'static,
    F: FnOnce(Connection) -> Result<T, RepoError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let conn = Connection::open(&path)?;
        f(conn)
    })
    .await?
}
