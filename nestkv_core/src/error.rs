use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the storage layer can surface to a caller.
#[derive(Debug, Error)]
pub enum Error {
    #[error("NOT NULL constraint violated for column {column} in {schema}.{table}")]
    NotNullViolation {
        schema: String,
        table: String,
        column: String,
    },

    #[error("non-unique key for index {index}: {key}")]
    DuplicateKey { index: String, key: String },

    #[error(
        "cannot {operation} {referencing_table} because {key} does not have a corresponding value in {referenced_table}, violating foreign key constraint {constraint}"
    )]
    ForeignKeyReferencingViolation {
        operation: String,
        referencing_table: String,
        key: String,
        constraint: String,
        referenced_table: String,
    },

    #[error(
        "cannot {operation} {referenced_table} because {key} is still referenced from {referencing_table}, violating foreign key constraint {constraint}"
    )]
    ForeignKeyReferencedViolation {
        operation: String,
        referenced_table: String,
        key: String,
        constraint: String,
        referencing_table: String,
    },

    #[error("{lock_type} lock timed out after {millis}ms on {backend} store")]
    LockTimeout {
        millis: u64,
        lock_type: &'static str,
        backend: &'static str,
    },

    #[error("transaction not committed due to conflict with another transaction")]
    NotCommitted,

    #[error("transaction read version is too old")]
    TransactionTooOld,

    #[error("transaction was marked rollback-only and cannot commit")]
    TransactionAborted,

    #[error("no active transaction")]
    NoActiveTransaction,

    #[error("transaction already active")]
    TransactionAlreadyActive,

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("key codec error: {0}")]
    Codec(String),

    #[error("{0}")]
    Value(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("remote node error: {0}")]
    Remote(String),
}

impl Error {
    /// Errors that roll back the transaction and may succeed on a fresh attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::LockTimeout { .. } | Error::NotCommitted | Error::TransactionTooOld
        )
    }

    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            Error::NotNullViolation { .. }
                | Error::DuplicateKey { .. }
                | Error::ForeignKeyReferencingViolation { .. }
                | Error::ForeignKeyReferencedViolation { .. }
        )
    }
}
