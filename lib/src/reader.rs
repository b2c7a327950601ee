//! Read access to committed data. The functions at the top are shared by [`Store`] and
//! [`StoreReader`]; a reader keeps its own read-only connection and follows the graph
//! generation counter of the store it was created from.
//!
//! [`Store`]: crate::store::Store

use crate::config::Config;
use crate::consts;
use crate::db::{self, MAIN_SCHEMA};
use crate::errors::{Result, StoreError};
use crate::fts;
use crate::graphs::GraphManager;
use crate::ontology::{ClassIdx, Ontologies, PropertyIdx};
use crate::util::quote;
use crate::value::Value;
use log::{debug, info};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Classes recorded in the `rdf:type` table of `schema` for `id`.
pub(crate) fn load_types(
    conn: &Connection,
    ontology: &Ontologies,
    schema: &str,
    id: i64,
) -> Result<Vec<ClassIdx>> {
    let rdf_type = ontology.rdf_type()?;
    let sql = format!(
        "SELECT {} FROM {}.{} WHERE ID = ?1",
        quote(ontology.property(rdf_type).name()),
        quote(schema),
        quote(&ontology.property_table(rdf_type))
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let ids = stmt.query_map(params![id], |row| row.get::<_, i64>(0))?;
    let mut types = Vec::new();
    for class_id in ids {
        if let Some(class) = ontology.class_by_id(class_id?) {
            types.push(class);
        }
    }
    Ok(types)
}

pub(crate) fn load_values(
    conn: &Connection,
    ontology: &Ontologies,
    schema: &str,
    id: i64,
    property: PropertyIdx,
) -> Result<Vec<Value>> {
    let p = ontology.property(property);
    let sql = format!(
        "SELECT {} FROM {}.{} WHERE ID = ?1",
        quote(p.name()),
        quote(schema),
        quote(&ontology.property_table(property))
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let mut rows = stmt.query(params![id])?;
    let mut values = Vec::new();
    while let Some(row) = rows.next()? {
        if let Some(value) = Value::from_sql(p.data_type(), row.get_ref(0)?)? {
            values.push(value);
        }
    }
    Ok(values)
}

/// Highest `nrl:modified` stamp stored in any of `schemas`.
pub(crate) fn max_modseq(conn: &Connection, ontology: &Ontologies, schemas: &[String]) -> Result<i64> {
    let modified = ontology.find_property(consts::MODIFIED.as_str())?;
    let mut max = 0;
    for schema in schemas {
        let sql = format!(
            "SELECT MAX({}) FROM {}.{}",
            quote(ontology.property(modified).name()),
            quote(schema),
            quote(&ontology.property_table(modified))
        );
        let value: Option<i64> = conn.query_row(&sql, [], |row| row.get(0))?;
        max = max.max(value.unwrap_or(0));
    }
    Ok(max)
}

pub(crate) fn find_resource(conn: &Connection, ontology: &Ontologies, uri: &str) -> Result<Option<i64>> {
    if let Some(id) = ontology.id_for_uri(uri) {
        return Ok(Some(id));
    }
    crate::resource::lookup(conn, uri)
}

pub(crate) fn class_uris(ontology: &Ontologies, classes: &[ClassIdx]) -> Vec<String> {
    classes
        .iter()
        .map(|class| ontology.class(*class).uri().to_string())
        .collect()
}

/// A read-only view of a file-backed store.
pub struct StoreReader {
    config: Config,
    conn: Connection,
    ontology: Arc<Ontologies>,
    graphs: BTreeMap<String, i64>,
    generation: Option<Arc<AtomicU64>>,
    seen: u64,
}

impl StoreReader {
    pub fn open(config: &Config) -> Result<Self> {
        Self::open_with_generation(config, None)
    }

    pub(crate) fn open_with_generation(
        config: &Config,
        generation: Option<Arc<AtomicU64>>,
    ) -> Result<Self> {
        let path = config
            .main_database_path()
            .ok_or_else(|| StoreError::Config("an in-memory store cannot be read from another connection".to_string()))?;
        if !path.exists() {
            return Err(StoreError::Config(format!(
                "no store at {}",
                path.display()
            )));
        }
        let conn = db::open_readonly(&path, config.statement_cache_size)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let seen = generation
            .as_ref()
            .map(|g| g.load(Ordering::Acquire))
            .unwrap_or_default();
        let mut reader = StoreReader {
            config: config.clone(),
            conn,
            ontology: Arc::new(Ontologies::default()),
            graphs: BTreeMap::new(),
            generation,
            seen,
        };
        reader.refresh()?;
        info!("Opened reader on {}", path.display());
        Ok(reader)
    }

    /// Reloads the ontology snapshot and the set of attached graphs.
    pub fn refresh(&mut self) -> Result<()> {
        let json = db::get_metadata(&self.conn, db::METADATA_ONTOLOGY)?
            .ok_or_else(|| StoreError::Config("store has not been initialized".to_string()))?;
        self.ontology = Arc::new(Ontologies::from_json(&json)?);
        let graphs = GraphManager::load(&self.conn)?;
        for name in self.graphs.keys() {
            if !graphs.contains_key(name) {
                db::detach(&self.conn, name)?;
            }
        }
        for name in graphs.keys() {
            if !self.graphs.contains_key(name) {
                GraphManager::attach(&self.conn, &self.config, name)?;
            }
        }
        self.graphs = graphs;
        debug!("Reader synchronized with {} graphs", self.graphs.len());
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        let Some(generation) = &self.generation else {
            return Ok(());
        };
        let current = generation.load(Ordering::Acquire);
        if current != self.seen {
            self.refresh()?;
            self.seen = current;
        }
        Ok(())
    }

    fn schema(&self, graph: Option<&str>) -> Result<String> {
        match graph {
            None => Ok(MAIN_SCHEMA.to_string()),
            Some(name) if self.graphs.contains_key(name) => Ok(name.to_string()),
            Some(name) => Err(StoreError::UnknownGraph(name.to_string())),
        }
    }

    pub fn ontology(&mut self) -> Result<Arc<Ontologies>> {
        self.sync()?;
        Ok(self.ontology.clone())
    }

    pub fn graphs(&mut self) -> Result<Vec<String>> {
        self.sync()?;
        Ok(self.graphs.keys().cloned().collect())
    }

    pub fn resource_id(&mut self, uri: &str) -> Result<Option<i64>> {
        self.sync()?;
        find_resource(&self.conn, &self.ontology, uri)
    }

    pub fn uri_for_id(&mut self, id: i64) -> Result<Option<String>> {
        self.sync()?;
        crate::resource::uri_for_id(&self.conn, id)
    }

    /// Class IRIs of a resource in `graph`.
    pub fn types(&mut self, graph: Option<&str>, id: i64) -> Result<Vec<String>> {
        self.sync()?;
        let schema = self.schema(graph)?;
        let types = load_types(&self.conn, &self.ontology, &schema, id)?;
        Ok(class_uris(&self.ontology, &types))
    }

    pub fn property_values(&mut self, graph: Option<&str>, id: i64, property: &str) -> Result<Vec<Value>> {
        self.sync()?;
        let schema = self.schema(graph)?;
        let property = self.ontology.find_property(property)?;
        load_values(&self.conn, &self.ontology, &schema, id, property)
    }

    pub fn search(&mut self, graph: Option<&str>, query: &str) -> Result<Vec<i64>> {
        self.sync()?;
        let schema = self.schema(graph)?;
        fts::search(&self.conn, &schema, &self.ontology, query)
    }

    /// The largest modification sequence number committed so far.
    pub fn modseq(&mut self) -> Result<i64> {
        self.sync()?;
        let schemas: Vec<String> = std::iter::once(MAIN_SCHEMA.to_string())
            .chain(self.graphs.keys().cloned())
            .collect();
        max_modseq(&self.conn, &self.ontology, &schemas)
    }
}

impl std::fmt::Debug for StoreReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreReader")
            .field("root", &self.config.root)
            .field("graphs", &self.graphs)
            .field("seen", &self.seen)
            .finish()
    }
}
