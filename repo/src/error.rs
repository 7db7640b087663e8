use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json encode/decode error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("background task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl RepoError {
    /// `SQLITE_BUSY`/`SQLITE_LOCKED` map to the store's retryable `Busy`
    /// variant instead of an opaque backend error, so callers using
    /// [`forge_common::retry::with_backoff`] actually retry on contention.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            RepoError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if matches!(e.code, rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
        )
    }
}

impl From<RepoError> for forge_store::StoreError {
    fn from(err: RepoError) -> Self {
        if err.is_busy() {
            forge_store::StoreError::Busy
        } else {
            forge_store::StoreError::Backend(Box::new(err))
        }
    }
}

impl From<RepoError> for forge_common::CommonError {
    fn from(err: RepoError) -> Self {
        forge_common::CommonError::Repository(Box::new(err))
    }
}
