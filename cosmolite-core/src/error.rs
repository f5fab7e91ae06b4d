// src/error.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CosmoLiteError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("Collection '{0}' not found")]
    CollectionNotFound(String),

    #[error("Collection '{0}' already exists")]
    CollectionExists(String),

    #[error("Document '{0}' not found")]
    DocumentNotFound(String),

    #[error("Document '{0}' already exists")]
    DocumentExists(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Entity validation failed: {0}")]
    EntityValidation(String),

    #[error("{operator} on field '{field}': {reason}")]
    OperatorType {
        operator: String,
        field: String,
        reason: String,
    },

    #[error("Document '{id}' was modified concurrently (expected etag {expected})")]
    ConcurrencyConflict { id: String, expected: String },

    #[error("Execution budget exceeded during {0}")]
    BudgetExceeded(String),

    #[error("Stored procedure '{0}' not found")]
    ProcedureNotFound(String),

    #[error("Stored procedure '{0}' already exists")]
    ProcedureExists(String),

    #[error("Database corruption: {0}")]
    Corruption(String),
}

/// Coarse classification callers use to pick a retry/report policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    OperatorType,
    ConcurrencyConflict,
    BudgetExceeded,
    Store,
}

impl CosmoLiteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CosmoLiteError::Validation(_) | CosmoLiteError::EntityValidation(_) => ErrorKind::Validation,
            CosmoLiteError::DocumentNotFound(_)
            | CosmoLiteError::CollectionNotFound(_)
            | CosmoLiteError::ProcedureNotFound(_) => ErrorKind::NotFound,
            CosmoLiteError::OperatorType { .. } => ErrorKind::OperatorType,
            CosmoLiteError::ConcurrencyConflict { .. } => ErrorKind::ConcurrencyConflict,
            CosmoLiteError::BudgetExceeded(_) => ErrorKind::BudgetExceeded,
            CosmoLiteError::Io(_)
            | CosmoLiteError::Serialization(_)
            | CosmoLiteError::Deserialization(_)
            | CosmoLiteError::Corruption(_)
            | CosmoLiteError::DocumentExists(_)
            | CosmoLiteError::CollectionExists(_)
            | CosmoLiteError::ProcedureExists(_) => ErrorKind::Store,
        }
    }

    /// Conflicts and budget exhaustion go away when the whole call is re-issued.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ConcurrencyConflict | ErrorKind::BudgetExceeded
        )
    }

    pub(crate) fn operator(operator: &str, field: &str, reason: impl Into<String>) -> Self {
        CosmoLiteError::OperatorType {
            operator: operator.to_string(),
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<bincode::Error> for CosmoLiteError {
    fn from(err: bincode::Error) -> Self {
        CosmoLiteError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CosmoLiteError>;
