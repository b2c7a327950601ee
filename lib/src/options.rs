//! Shared option types that replace boolean flag parameters in the Rust API.

use serde::{Deserialize, Serialize};

/// Controls whether generated blank nodes can be addressed through a `urn:bnode:` IRI.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
pub enum BlankNodes {
    /// Blank nodes receive a `urn:bnode:<id>` IRI that resolves back to the same row.
    #[default]
    Named,
    /// Blank node rows carry no IRI and can only be reached through their id.
    Anonymous,
}

impl BlankNodes {
    pub fn is_anonymous(self) -> bool {
        matches!(self, BlankNodes::Anonymous)
    }
}

impl From<bool> for BlankNodes {
    fn from(anonymous: bool) -> Self {
        if anonymous {
            BlankNodes::Anonymous
        } else {
            BlankNodes::Named
        }
    }
}

impl From<BlankNodes> for bool {
    fn from(value: BlankNodes) -> Self {
        value.is_anonymous()
    }
}

/// What a write transaction is for.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum TransactionKind {
    #[default]
    Data,
    /// Schema changes: the modification sequence is pinned to 1 and `nrl:modified` is left alone.
    Ontology,
}

impl TransactionKind {
    pub fn is_ontology(self) -> bool {
        matches!(self, TransactionKind::Ontology)
    }
}

/// Direction of a statement notification.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StatementKind {
    Insert,
    Delete,
}

/// Outcome reported to transaction listeners.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TransactionOutcome {
    Commit,
    Rollback,
}
