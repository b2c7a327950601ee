//! Write transaction state: the active transaction, the modification sequence and the
//! listeners notified about statements and transaction outcomes.

use crate::config::Config;
use crate::db;
use crate::errors::{Result, StoreError};
use crate::options::{StatementKind, TransactionKind, TransactionOutcome};
use crate::value::Value;
use chrono::{DateTime, FixedOffset, Utc};
use log::debug;
use pretty_bytes::converter::convert;
use rusqlite::Connection;

/// A statement whose logical effect changed the store.
#[derive(Debug)]
pub struct StatementEvent<'a> {
    pub kind: StatementKind,
    /// Graph name, `None` for the default graph.
    pub graph: Option<&'a str>,
    pub subject: i64,
    pub predicate: i64,
    pub object: &'a Value,
    /// Class implied by the statement: the class itself for `rdf:type`, otherwise the
    /// domain of the predicate.
    pub class: Option<i64>,
    /// Class ids of the subject at the time of the change.
    pub types: &'a [i64],
}

pub type StatementCallback = Box<dyn FnMut(&StatementEvent<'_>) + Send>;
pub type TransactionCallback = Box<dyn FnMut(TransactionOutcome) + Send>;

#[derive(Default)]
pub struct Listeners {
    statement: Vec<StatementCallback>,
    transaction: Vec<TransactionCallback>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_statement(mut self, callback: impl FnMut(&StatementEvent<'_>) + Send + 'static) -> Self {
        self.statement.push(Box::new(callback));
        self
    }

    pub fn on_transaction(mut self, callback: impl FnMut(TransactionOutcome) + Send + 'static) -> Self {
        self.transaction.push(Box::new(callback));
        self
    }

    pub fn has_statement_listeners(&self) -> bool {
        !self.statement.is_empty()
    }

    pub(crate) fn statement(&mut self, event: &StatementEvent<'_>) {
        for callback in &mut self.statement {
            callback(event);
        }
    }

    pub(crate) fn transaction(&mut self, outcome: TransactionOutcome) {
        for callback in &mut self.transaction {
            callback(outcome);
        }
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("statement", &self.statement.len())
            .field("transaction", &self.transaction.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ActiveTransaction {
    pub kind: TransactionKind,
    /// Sequence number stamped on `nrl:modified` by this transaction.
    pub modseq: i64,
    /// Wall-clock time shared by every `nrl:added` stamp of this transaction.
    pub resource_time: DateTime<FixedOffset>,
    pub has_changes: bool,
}

#[derive(Debug, Default)]
pub struct TransactionManager {
    pub(crate) state: Option<ActiveTransaction>,
    pub(crate) max_modseq: i64,
    pub(crate) listeners: Listeners,
}

impl TransactionManager {
    pub fn new(listeners: Listeners, max_modseq: i64) -> Self {
        TransactionManager {
            state: None,
            max_modseq,
            listeners,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    pub fn active(&self) -> Result<&ActiveTransaction> {
        self.state
            .as_ref()
            .ok_or_else(|| StoreError::Transaction("no transaction is active".to_string()))
    }

    pub(crate) fn mark_changed(&mut self) {
        if let Some(state) = self.state.as_mut() {
            state.has_changes = true;
        }
    }

    /// Starts a physical transaction after checking that none is active and that the
    /// volume holding the store has room to grow.
    pub(crate) fn begin(&mut self, conn: &Connection, config: &Config, kind: TransactionKind) -> Result<()> {
        if self.is_active() {
            return Err(StoreError::Transaction(
                "a transaction is already active".to_string(),
            ));
        }
        check_free_space(config)?;
        db::begin(conn)?;
        let modseq = if kind.is_ontology() {
            1
        } else {
            self.max_modseq + 1
        };
        debug!("Begin {:?} transaction, modseq {}", kind, modseq);
        self.state = Some(ActiveTransaction {
            kind,
            modseq,
            resource_time: Utc::now().fixed_offset(),
            has_changes: false,
        });
        Ok(())
    }

    /// Ends the transaction state after a successful physical commit.
    pub(crate) fn committed(&mut self) {
        if let Some(state) = self.state.take() {
            if !state.kind.is_ontology() && state.has_changes {
                self.max_modseq = state.modseq;
            }
        }
    }

    pub(crate) fn rolled_back(&mut self) {
        self.state = None;
    }
}

fn check_free_space(config: &Config) -> Result<()> {
    let Some(root) = config.root.as_ref() else {
        return Ok(());
    };
    let available = fs2::available_space(root)?;
    if available < config.min_free_space {
        return Err(StoreError::NoSpace {
            path: root.display().to_string(),
            available: convert(available as f64),
            required: convert(config.min_free_space as f64),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn modseq_advances_only_for_changed_data_transactions() {
        let conn = db::open(None, 16).unwrap();
        let config = Config::in_memory(Default::default());
        let mut tx = TransactionManager::new(Listeners::new(), 4);

        tx.begin(&conn, &config, TransactionKind::Data).unwrap();
        assert_eq!(tx.active().unwrap().modseq, 5);
        assert!(tx.begin(&conn, &config, TransactionKind::Data).is_err());
        db::rollback(&conn).unwrap();
        tx.rolled_back();
        assert_eq!(tx.max_modseq, 4);

        tx.begin(&conn, &config, TransactionKind::Data).unwrap();
        tx.mark_changed();
        db::commit(&conn).unwrap();
        tx.committed();
        assert_eq!(tx.max_modseq, 5);

        tx.begin(&conn, &config, TransactionKind::Ontology).unwrap();
        assert_eq!(tx.active().unwrap().modseq, 1);
        tx.mark_changed();
        db::commit(&conn).unwrap();
        tx.committed();
        assert_eq!(tx.max_modseq, 5);
        assert!(tx.active().is_err());
    }

    #[test]
    fn listeners_receive_outcomes() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut listeners = Listeners::new().on_transaction(move |outcome| {
            sink.lock().unwrap().push(outcome);
        });
        listeners.transaction(TransactionOutcome::Commit);
        listeners.transaction(TransactionOutcome::Rollback);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![TransactionOutcome::Commit, TransactionOutcome::Rollback]
        );
    }

    #[test]
    fn free_space_is_checked_for_file_stores() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::builder()
            .root(dir.path())
            .min_free_space(u64::MAX)
            .build()
            .unwrap();
        let err = check_free_space(&config).unwrap_err();
        assert!(matches!(err, StoreError::NoSpace { .. }));
    }
}
