//! Database error types and fatal classification

use thiserror::Error;

/// Database operation errors
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Query error: {0}")]
    Query(#[from] sqlx::Error),

    #[error("Weak credential rejected: {0}")]
    WeakCredential(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Fatal database condition: {0}")]
    Fatal(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// SQLSTATE codes that mean internal state can no longer be trusted:
/// serialization failure, deadlock, integrity violations, and writes on a
/// read-only session. Callers escalate these instead of retrying.
pub fn is_fatal_sqlstate(code: &str) -> bool {
    code == "40001"                 // serialization_failure
        || code == "40P01"          // deadlock_detected
        || code.starts_with("23")   // integrity constraint violations
        || code == "25006" // read_only_sql_transaction
}

/// Classify an sqlx error, promoting fatal SQLSTATEs
pub fn classify(error: sqlx::Error) -> DbError {
    if let sqlx::Error::Database(ref db_error) = error {
        if let Some(code) = db_error.code() {
            if is_fatal_sqlstate(&code) {
                return DbError::Fatal(format!("sqlstate {}: {}", code, db_error));
            }
        }
    }
    DbError::Query(error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_codes() {
        assert!(is_fatal_sqlstate("40001"));
        assert!(is_fatal_sqlstate("40P01"));
        assert!(is_fatal_sqlstate("23505"));
        assert!(is_fatal_sqlstate("25006"));
        assert!(!is_fatal_sqlstate("08006"));
        assert!(!is_fatal_sqlstate("42601"));
    }
}
