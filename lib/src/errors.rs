//! Error taxonomy for the store.

use std::fmt;
use thiserror::Error;

/// Line/column of a parse failure, 1-based as reported by the RDF parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: u64,
    pub column: u64,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// Malformed input, the mutation is rejected but the transaction stays usable.
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("unsupported ontology change: {0}")]
    UnsupportedOntologyChange(String),
    #[error("unknown class: {0}")]
    UnknownClass(String),
    #[error("unknown property: {0}")]
    UnknownProperty(String),
    #[error("unknown graph: {0}")]
    UnknownGraph(String),
    #[error("query failed: {0}")]
    Query(#[from] rusqlite::Error),
    #[error("not enough free space in {path}: {available} available, {required} required")]
    NoSpace {
        path: String,
        available: String,
        required: String,
    },
    #[error("{file}{}: {message}", .position.map(|p| format!(":{}", p)).unwrap_or_default())]
    Parse {
        file: String,
        position: Option<Position>,
        message: String,
    },
    #[error("transaction error: {0}")]
    Transaction(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("corrupt persisted ontology: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn parse(file: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Parse {
            file: file.into(),
            position: None,
            message: message.into(),
        }
    }

    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        StoreError::UnsupportedOntologyChange(message.into())
    }

    pub(crate) fn constraint(message: impl Into<String>) -> Self {
        StoreError::Constraint(message.into())
    }

    /// Whether the running transaction can no longer be trusted after this error.
    /// Rejected input leaves it usable; engine and I/O failures do not.
    pub fn requires_rollback(&self) -> bool {
        !matches!(
            self,
            StoreError::Constraint(_)
                | StoreError::UnknownClass(_)
                | StoreError::UnknownProperty(_)
                | StoreError::UnknownGraph(_)
                | StoreError::Parse { .. }
                | StoreError::Transaction(_)
        )
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
