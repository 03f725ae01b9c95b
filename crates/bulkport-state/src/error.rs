//! State backend error types.

use bulkport_types::state::UnknownStatus;

/// Errors produced by [`StateBackend`](crate::StateBackend) operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Underlying `SQLite` failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// `SQLite` failure annotated with the operation that hit it.
    #[error("{operation}: {source}")]
    SqliteContext {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// File-system I/O failure (e.g. creating the database directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested row does not exist.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },

    /// A stored status column holds an unexpected value.
    #[error("corrupt state row: {0}")]
    Corrupt(#[from] UnknownStatus),

    /// Internal mutex was poisoned by a panicked thread.
    #[error("state backend lock poisoned")]
    LockPoisoned,
}

impl StateError {
    pub(crate) fn context(operation: &'static str, source: rusqlite::Error) -> Self {
        Self::SqliteContext { operation, source }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_error_displays_context() {
        let inner = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(1),
            Some("table not found".into()),
        );
        let err = StateError::Sqlite(inner);
        let msg = err.to_string();
        assert!(msg.contains("sqlite"), "got: {msg}");
    }

    #[test]
    fn context_error_names_operation() {
        let err = StateError::context("insert_failure", rusqlite::Error::QueryReturnedNoRows);
        assert!(err.to_string().starts_with("insert_failure:"));
    }

    #[test]
    fn not_found_displays_kind_and_id() {
        let err = StateError::NotFound {
            kind: "tracker",
            id: 9,
        };
        assert_eq!(err.to_string(), "tracker 9 not found");
    }

    #[test]
    fn lock_poisoned_displays() {
        assert_eq!(
            StateError::LockPoisoned.to_string(),
            "state backend lock poisoned"
        );
    }
}
