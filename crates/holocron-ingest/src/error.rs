//! Error types for the ingestion pipeline
//!
//! Failures are classified by how far they reach:
//!
//! - [`FetchError`]: one identifier, skipped and counted
//! - [`NormalizationError`]: one record, dropped and counted
//! - [`StoreError`]: one batch, rolled back; [`StoreError::Unavailable`]
//!   additionally aborts the run

use std::time::Duration;
use thiserror::Error;

use crate::models::Identifier;

/// Transport-level failure for a single fetch
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status}")]
    Status { status: u16 },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("response body is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("expected a JSON object, got {0}")]
    UnexpectedPayload(&'static str),

    /// Failure reported by a non-HTTP [`crate::fetcher::RecordFetcher`]
    #[error("{0}")]
    Transport(String),
}

/// A raw record that could not be coerced into the destination schema
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizationError {
    #[error("field '{field}' contains a list element that is neither string nor number")]
    ListElement { field: String },

    #[error("field '{field}' value {value:?} does not fit in a 64-bit integer")]
    IntegerOverflow { field: String, value: String },

    #[error("required field '{field}' is missing or null")]
    MissingField { field: &'static str },

    #[error("field '{field}' should be {expected}, got {found}")]
    TypeMismatch {
        field: &'static str,
        expected: &'static str,
        found: &'static str,
    },
}

/// Batch-level persistence failure
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("duplicate primary key {id}")]
    DuplicateKey { id: Identifier },

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("load task did not complete: {0}")]
    TaskFailed(String),
}

impl StoreError {
    /// Whether the failure ends the whole run rather than just one batch
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// SQLite primary result codes meaning the database itself can no longer be
/// written: READONLY, IOERR, CORRUPT, FULL, CANTOPEN, NOTADB
const SQLITE_UNAVAILABLE_CODES: [i32; 6] = [8, 10, 11, 13, 14, 26];

/// Whether a SQLite result code (primary or extended) reports a storage outage
/// rather than a problem with the statement
fn is_unavailable_code(code: &str) -> bool {
    code.parse::<i32>()
        .is_ok_and(|code| SQLITE_UNAVAILABLE_CODES.contains(&(code & 0xff)))
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Configuration(_) => StoreError::Unavailable(err.to_string()),
            sqlx::Error::Database(ref db)
                if db.code().is_some_and(|code| is_unavailable_code(&code)) =>
            {
                StoreError::Unavailable(err.to_string())
            }
            other => StoreError::Query(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Migration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailable_is_fatal() {
        assert!(StoreError::Unavailable("connection refused".into()).is_fatal());
        assert!(!StoreError::DuplicateKey { id: 7 }.is_fatal());
        assert!(!StoreError::Query("syntax error".into()).is_fatal());
    }

    #[test]
    fn test_pool_errors_map_to_unavailable() {
        assert!(StoreError::from(sqlx::Error::PoolTimedOut).is_fatal());
        assert!(StoreError::from(sqlx::Error::PoolClosed).is_fatal());
        assert!(!StoreError::from(sqlx::Error::RowNotFound).is_fatal());
    }

    #[test]
    fn test_outage_result_codes() {
        // Primary codes
        for code in ["8", "10", "11", "13", "14", "26"] {
            assert!(is_unavailable_code(code), "code {code}");
        }
        // SQLITE_IOERR_READ, SQLITE_READONLY_DBMOVED
        assert!(is_unavailable_code("266"));
        assert!(is_unavailable_code("1032"));

        // SQLITE_CONSTRAINT_PRIMARYKEY, SQLITE_BUSY, SQLITE_ERROR
        assert!(!is_unavailable_code("1555"));
        assert!(!is_unavailable_code("5"));
        assert!(!is_unavailable_code("1"));
        assert!(!is_unavailable_code("23505"));
        assert!(!is_unavailable_code("HY000"));
    }
}
