//! Interning of IRIs and blank nodes into resource ids, plus the reference counting
//! that decides when an id may be forgotten.

use crate::consts::BLANK_NODE_PREFIX;
use crate::errors::{Result, StoreError};
use crate::ontology::Ontologies;
use crate::options::BlankNodes;
use crate::util::quote;
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{HashMap, HashSet};

/// Transaction-scoped interning state. The cache and the set of ids created since the
/// last flush are dropped on every flush; `interned` lives until the transaction ends.
#[derive(Debug, Default)]
pub struct ResourceManager {
    blank_nodes: BlankNodes,
    cache: HashMap<String, i64>,
    new_resources: HashSet<i64>,
    interned: HashSet<i64>,
}

impl ResourceManager {
    pub fn new(blank_nodes: BlankNodes) -> Self {
        ResourceManager {
            blank_nodes,
            ..Default::default()
        }
    }

    /// Returns the id of `uri`, inserting a `Resource` row when it has none yet.
    pub fn ensure_resource(
        &mut self,
        conn: &Connection,
        ontology: &Ontologies,
        uri: &str,
    ) -> Result<i64> {
        if let Some(id) = self.cache.get(uri) {
            return Ok(*id);
        }
        if let Some(id) = ontology.id_for_uri(uri) {
            self.cache.insert(uri.to_string(), id);
            return Ok(id);
        }
        if !self.blank_nodes.is_anonymous() {
            if let Some(id) = blank_node_id(uri) {
                if is_blank_node(conn, id)? {
                    self.cache.insert(uri.to_string(), id);
                    return Ok(id);
                }
            }
        }
        if !uri.contains(':') {
            return Err(StoreError::constraint(format!(
                "'{}' is not an absolute IRI",
                uri
            )));
        }

        let id = match lookup(conn, uri)? {
            Some(id) => id,
            None => {
                conn.prepare_cached("INSERT INTO main.Resource (Uri) VALUES (?1)")?
                    .execute(params![uri])?;
                let id = conn.last_insert_rowid();
                debug!("Interned <{}> as {}", uri, id);
                self.new_resources.insert(id);
                self.interned.insert(id);
                id
            }
        };
        self.cache.insert(uri.to_string(), id);
        Ok(id)
    }

    /// Allocates a fresh blank node; never reuses an existing row.
    pub fn generate_blank_node(&mut self, conn: &Connection) -> Result<i64> {
        conn.prepare_cached("INSERT INTO main.Resource (Uri, BlankNode) VALUES (NULL, 1)")?
            .execute([])?;
        let id = conn.last_insert_rowid();
        if !self.blank_nodes.is_anonymous() {
            let uri = format!("{}{}", BLANK_NODE_PREFIX, id);
            conn.prepare_cached("UPDATE main.Resource SET Uri = ?2 WHERE ID = ?1")?
                .execute(params![id, uri])?;
            self.cache.insert(uri, id);
        }
        self.new_resources.insert(id);
        self.interned.insert(id);
        Ok(id)
    }

    /// Whether `id` was created by the current transaction and so has no stored values.
    pub fn is_new(&self, id: i64) -> bool {
        self.new_resources.contains(&id)
    }

    pub fn clear(&mut self) {
        self.cache.clear();
        self.new_resources.clear();
    }

    /// Forgets everything, including the ids interned by the transaction.
    pub fn reset(&mut self) {
        self.clear();
        self.interned.clear();
    }

    /// Ids inserted into `Resource` since the transaction began. Ends the transaction's
    /// interning state.
    pub fn take_interned(&mut self) -> Vec<i64> {
        self.clear();
        self.interned.drain().collect()
    }
}

fn blank_node_id(uri: &str) -> Option<i64> {
    uri.strip_prefix(BLANK_NODE_PREFIX)?.parse().ok()
}

fn is_blank_node(conn: &Connection, id: i64) -> Result<bool> {
    Ok(conn
        .prepare_cached("SELECT 1 FROM main.Resource WHERE ID = ?1 AND BlankNode = 1")?
        .query_row(params![id], |_| Ok(()))
        .optional()?
        .is_some())
}

pub fn lookup(conn: &Connection, uri: &str) -> Result<Option<i64>> {
    Ok(conn
        .prepare_cached("SELECT ID FROM main.Resource WHERE Uri = ?1")?
        .query_row(params![uri], |row| row.get(0))
        .optional()?)
}

/// IRI of a resource id; anonymous blank nodes report their `urn:bnode:` form.
pub fn uri_for_id(conn: &Connection, id: i64) -> Result<Option<String>> {
    let row: Option<(Option<String>, bool)> = conn
        .prepare_cached("SELECT Uri, BlankNode FROM main.Resource WHERE ID = ?1")?
        .query_row(params![id], |row| Ok((row.get(0)?, row.get(1)?)))
        .optional()?;
    Ok(match row {
        Some((Some(uri), _)) => Some(uri),
        Some((None, true)) => Some(format!("{}{}", BLANK_NODE_PREFIX, id)),
        _ => None,
    })
}

pub fn refcount(conn: &Connection, schema: &str, id: i64) -> Result<i64> {
    let sql = format!("SELECT Refcount FROM {}.Refcount WHERE ID = ?1", quote(schema));
    Ok(conn
        .prepare_cached(&sql)?
        .query_row(params![id], |row| row.get(0))
        .optional()?
        .unwrap_or(0))
}

/// Adds `delta` baseline references in the main database, keeping ontology and graph
/// ids out of garbage collection.
pub fn pin(conn: &Connection, ids: &[i64], delta: i64) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO main.Refcount (ID, Refcount) VALUES (?1, ?2) \
         ON CONFLICT(ID) DO UPDATE SET Refcount = Refcount + excluded.Refcount",
    )?;
    for id in ids {
        stmt.execute(params![id, delta])?;
    }
    Ok(())
}

/// Queues `ids` in `main.ResourceGc`. Ids that end up without any reference, such as
/// those interned for a statement that was then rejected, are collected at commit.
pub fn queue_for_collection(conn: &Connection, ids: &[i64]) -> Result<()> {
    let mut stmt = conn.prepare_cached("INSERT OR IGNORE INTO main.ResourceGc (ID) VALUES (?1)")?;
    for id in ids {
        stmt.execute(params![id])?;
    }
    Ok(())
}

/// Forgets resources whose refcount dropped to zero in `collect_from` and that no
/// database in `live` references any more. Returns the number of removed rows.
pub fn collect_garbage(conn: &Connection, collect_from: &[String], live: &[String]) -> Result<usize> {
    let referenced: Vec<String> = live
        .iter()
        .map(|schema| {
            format!(
                "NOT EXISTS (SELECT 1 FROM {}.Refcount r WHERE r.ID = Resource.ID)",
                quote(schema)
            )
        })
        .collect();
    let mut removed = 0;
    for schema in collect_from {
        let mut sql = format!(
            "DELETE FROM main.Resource WHERE ID IN (SELECT ID FROM {}.ResourceGc)",
            quote(schema)
        );
        for condition in &referenced {
            sql.push_str(" AND ");
            sql.push_str(condition);
        }
        removed += conn.execute(&sql, [])?;
        conn.execute(&format!("DELETE FROM {}.ResourceGc", quote(schema)), [])?;
    }
    if removed > 0 {
        debug!("Collected {} unreferenced resources", removed);
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn setup() -> Connection {
        let conn = db::open(None, 16).unwrap();
        db::create_core_tables(&conn).unwrap();
        conn.execute_batch(
            "CREATE TABLE main.Refcount (ID INTEGER NOT NULL PRIMARY KEY, Refcount INTEGER);
             CREATE TABLE main.ResourceGc (ID INTEGER NOT NULL PRIMARY KEY);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn interning_is_stable() {
        let conn = setup();
        let ontology = Ontologies::default();
        let mut resources = ResourceManager::new(BlankNodes::Named);
        let bob = resources
            .ensure_resource(&conn, &ontology, "http://example.org/bob")
            .unwrap();
        assert!(resources.is_new(bob));
        resources.clear();
        let again = resources
            .ensure_resource(&conn, &ontology, "http://example.org/bob")
            .unwrap();
        assert_eq!(bob, again);
        assert!(!resources.is_new(again));
        assert_eq!(lookup(&conn, "http://example.org/bob").unwrap(), Some(bob));
    }

    #[test]
    fn relative_iris_are_rejected() {
        let conn = setup();
        let mut resources = ResourceManager::default();
        let err = resources
            .ensure_resource(&conn, &Ontologies::default(), "bob")
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }

    #[test]
    fn blank_nodes_resolve_through_their_iri() {
        let conn = setup();
        let ontology = Ontologies::default();
        let mut resources = ResourceManager::new(BlankNodes::Named);
        let a = resources.generate_blank_node(&conn).unwrap();
        let b = resources.generate_blank_node(&conn).unwrap();
        assert_ne!(a, b);
        resources.clear();
        let uri = uri_for_id(&conn, a).unwrap().unwrap();
        assert_eq!(uri, format!("urn:bnode:{}", a));
        assert_eq!(resources.ensure_resource(&conn, &ontology, &uri).unwrap(), a);

        let mut anonymous = ResourceManager::new(BlankNodes::Anonymous);
        let c = anonymous.generate_blank_node(&conn).unwrap();
        let row: Option<String> = conn
            .query_row("SELECT Uri FROM Resource WHERE ID = ?1", [c], |row| row.get(0))
            .unwrap();
        assert_eq!(row, None);
        assert_eq!(uri_for_id(&conn, c).unwrap(), Some(format!("urn:bnode:{}", c)));
    }

    #[test]
    fn garbage_collection_spares_referenced_rows() {
        let conn = setup();
        let mut resources = ResourceManager::default();
        let ontology = Ontologies::default();
        let kept = resources
            .ensure_resource(&conn, &ontology, "http://example.org/kept")
            .unwrap();
        let gone = resources
            .ensure_resource(&conn, &ontology, "http://example.org/gone")
            .unwrap();
        pin(&conn, &[kept], 1).unwrap();
        conn.execute(
            "INSERT INTO ResourceGc (ID) VALUES (?1), (?2)",
            params![kept, gone],
        )
        .unwrap();
        let schemas = vec![db::MAIN_SCHEMA.to_string()];
        assert_eq!(collect_garbage(&conn, &schemas, &schemas).unwrap(), 1);
        assert_eq!(refcount(&conn, "main", kept).unwrap(), 1);
        assert_eq!(lookup(&conn, "http://example.org/gone").unwrap(), None);
        assert_eq!(lookup(&conn, "http://example.org/kept").unwrap(), Some(kept));
    }
}
