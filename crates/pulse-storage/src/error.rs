/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use pulse_storage::error::StorageError;
///
/// let err = StorageError::NotFound {
///     entity: "stream",
///     id: "metrics_s1_sys".to_string(),
/// };
/// assert!(err.to_string().contains("metrics_s1_sys"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Input rejected before touching the database: bad identifiers, empty
    /// value maps, malformed rankings payloads.
    #[error("Storage: validation failed: {0}")]
    Validation(String),

    /// A required record or stream was not found.
    #[error("Storage: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// A state transition was attempted on a record that is already terminal.
    #[error("Storage: {entity} {id} is already {status}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        status: String,
    },

    /// An underlying SQLite error.
    #[error("Storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failure.
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem failure while preparing the data directory.
    #[error("Storage: I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic storage error for cases not covered by other variants.
    #[error("Storage: {0}")]
    Other(String),
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
