//! Named graphs and the attached databases holding them. Changes made inside a
//! transaction go to a copy of the committed map that replaces it on commit.

use crate::config::Config;
use crate::db::{self, MAIN_SCHEMA, MEMORY};
use crate::errors::{Result, StoreError};
use log::{error, info};
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Graph id of the default graph, which lives in the main database.
pub const DEFAULT_GRAPH: i64 = 0;

#[derive(Debug, Default)]
pub struct GraphManager {
    committed: BTreeMap<String, i64>,
    pending: Option<BTreeMap<String, i64>>,
    created: Vec<String>,
    dropped: Vec<String>,
    generation: Arc<AtomicU64>,
}

impl GraphManager {
    pub fn new(committed: BTreeMap<String, i64>) -> Self {
        GraphManager {
            committed,
            ..Default::default()
        }
    }

    /// Graph names and ids recorded in the main database.
    pub fn load(conn: &Connection) -> Result<BTreeMap<String, i64>> {
        let mut stmt = conn.prepare(
            "SELECT Resource.Uri, Graph.ID FROM main.Graph JOIN main.Resource ON Resource.ID = Graph.ID",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        let mut graphs = BTreeMap::new();
        for row in rows {
            let (name, id) = row?;
            graphs.insert(name, id);
        }
        Ok(graphs)
    }

    /// The committed graphs, or the transaction's view of them when `in_transaction`.
    pub fn get_graphs(&self, in_transaction: bool) -> &BTreeMap<String, i64> {
        match (&self.pending, in_transaction) {
            (Some(pending), true) => pending,
            _ => &self.committed,
        }
    }

    pub fn graph_id(&self, name: &str) -> Option<i64> {
        self.get_graphs(true).get(name).copied()
    }

    /// Name of a graph id, including graphs dropped by the running transaction.
    pub fn name_for(&self, graph: i64) -> Option<&str> {
        if graph == DEFAULT_GRAPH {
            return None;
        }
        self.get_graphs(true)
            .iter()
            .chain(self.committed.iter())
            .find(|(_, id)| **id == graph)
            .map(|(name, _)| name.as_str())
    }

    /// Database schema holding the tables of a graph.
    pub fn schema_for(&self, graph: i64) -> Result<String> {
        if graph == DEFAULT_GRAPH {
            return Ok(MAIN_SCHEMA.to_string());
        }
        self.name_for(graph)
            .map(str::to_string)
            .ok_or_else(|| StoreError::UnknownGraph(format!("graph id {}", graph)))
    }

    /// Schemas of graphs visible to the running transaction, main first.
    pub fn live_schemas(&self) -> Vec<String> {
        std::iter::once(MAIN_SCHEMA.to_string())
            .chain(self.get_graphs(true).keys().cloned())
            .collect()
    }

    /// Every attached schema, including graphs dropped but not yet detached.
    pub fn attached_schemas(&self) -> Vec<String> {
        let mut schemas = vec![MAIN_SCHEMA.to_string()];
        for name in self.committed.keys().chain(self.created.iter()) {
            if !schemas.contains(name) {
                schemas.push(name.clone());
            }
        }
        schemas
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Counter shared with readers; it moves whenever attached databases or the schema change.
    pub fn generation_handle(&self) -> Arc<AtomicU64> {
        self.generation.clone()
    }

    pub(crate) fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    fn pending_mut(&mut self) -> &mut BTreeMap<String, i64> {
        let committed = &self.committed;
        self.pending.get_or_insert_with(|| committed.clone())
    }

    pub(crate) fn was_dropped(&self, name: &str) -> bool {
        self.dropped.iter().any(|n| n == name)
    }

    /// Attaches the database file of `name`.
    pub(crate) fn attach(conn: &Connection, config: &Config, name: &str) -> Result<()> {
        let path = match config.graph_database_path(name) {
            Some(path) => path.display().to_string(),
            None => MEMORY.to_string(),
        };
        db::attach(conn, &path, name)
    }

    /// Records a graph whose database is attached and initialized.
    pub(crate) fn add_pending(&mut self, name: &str, id: i64) {
        self.pending_mut().insert(name.to_string(), id);
        self.created.push(name.to_string());
        info!("Created graph {}", name);
    }

    pub(crate) fn remove_pending(&mut self, name: &str) {
        self.pending_mut().remove(name);
        self.dropped.push(name.to_string());
        info!("Dropped graph {}", name);
    }

    /// Records a database attached for a graph whose initialization failed, so that it
    /// is discarded with the transaction.
    pub(crate) fn add_failed(&mut self, name: &str) {
        self.created.push(name.to_string());
    }

    /// Publishes the transaction's graphs and detaches databases of dropped graphs.
    pub(crate) fn commit(&mut self, conn: &Connection, config: &Config) {
        let dropped = std::mem::take(&mut self.dropped);
        let created = std::mem::take(&mut self.created);
        let Some(pending) = self.pending.take() else {
            for name in &created {
                discard(conn, config, name);
            }
            return;
        };
        self.committed = pending;
        for name in &dropped {
            discard(conn, config, name);
        }
        for name in created {
            if !self.committed.contains_key(&name) && !dropped.contains(&name) {
                discard(conn, config, &name);
            }
        }
        self.bump_generation();
    }

    /// Forgets the transaction's graph changes; databases attached for new graphs are
    /// detached and removed.
    pub(crate) fn rollback(&mut self, conn: &Connection, config: &Config) {
        self.pending = None;
        self.dropped.clear();
        for name in std::mem::take(&mut self.created) {
            discard(conn, config, &name);
        }
    }
}

/// Best-effort removal of a graph database; failures are logged.
pub(crate) fn discard(conn: &Connection, config: &Config, name: &str) {
    if let Err(err) = db::detach(conn, name) {
        error!("Failed to detach graph {}: {}", name, err);
    }
    if let Some(path) = config.graph_database_path(name) {
        if path.exists() {
            if let Err(err) = std::fs::remove_file(&path) {
                error!("Failed to remove {}: {}", path.display(), err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_graphs_stay_private_until_commit() {
        let conn = db::open(None, 16).unwrap();
        let config = Config::in_memory(Default::default());
        let mut graphs = GraphManager::new(BTreeMap::new());
        GraphManager::attach(&conn, &config, "http://example.org/g1").unwrap();
        graphs.add_pending("http://example.org/g1", 7);
        assert_eq!(graphs.graph_id("http://example.org/g1"), Some(7));
        assert!(graphs.get_graphs(false).is_empty());
        assert_eq!(graphs.schema_for(7).unwrap(), "http://example.org/g1");

        let before = graphs.generation();
        graphs.commit(&conn, &config);
        assert_eq!(graphs.get_graphs(false).len(), 1);
        assert_eq!(graphs.generation(), before + 1);
    }

    #[test]
    fn rollback_detaches_created_graphs() {
        let conn = db::open(None, 16).unwrap();
        let config = Config::in_memory(Default::default());
        let mut graphs = GraphManager::new(BTreeMap::new());
        GraphManager::attach(&conn, &config, "http://example.org/g1").unwrap();
        graphs.add_pending("http://example.org/g1", 7);
        graphs.rollback(&conn, &config);
        assert!(graphs.graph_id("http://example.org/g1").is_none());
        assert!(!db::is_attached(&conn, "http://example.org/g1").unwrap());
        assert!(matches!(graphs.schema_for(7), Err(StoreError::UnknownGraph(_))));
        assert_eq!(graphs.schema_for(DEFAULT_GRAPH).unwrap(), MAIN_SCHEMA);
    }
}
