//! The store: one read-write connection over the main database and the attached graph
//! databases, the published ontology snapshot and the single write transaction.

use crate::config::Config;
use crate::consts;
use crate::db::{self, MAIN_SCHEMA};
use crate::errors::{Result, StoreError};
use crate::fts;
use crate::graphs::{GraphManager, DEFAULT_GRAPH};
use crate::log::{Statistics, UpdateLog};
use crate::migrate::{self, Migrator};
use crate::ontology::diff::diff;
use crate::ontology::{loader, Ontologies, OntologySource, PropertyIdx};
use crate::options::{TransactionKind, TransactionOutcome};
use crate::reader::{self, StoreReader};
use crate::resource::{self, ResourceManager};
use crate::transaction::{Listeners, TransactionManager};
use crate::update::{Context, DataUpdate};
use crate::util::{self, quote};
use crate::value::Value;
use log::{debug, error, info, warn};
use oxigraph::io::{RdfFormat, RdfParser};
use oxigraph::model::{GraphNameRef, NamedNodeRef, NamedOrBlankNodeRef, TermRef};
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;

pub struct Store {
    config: Config,
    conn: Connection,
    ontology: Arc<Ontologies>,
    checksum: String,
    graphs: GraphManager,
    update: DataUpdate,
    tx: TransactionManager,
}

impl Store {
    /// Opens the store described by `config`, creating or migrating its schema so that
    /// it matches the configured ontology.
    pub fn open(config: Config) -> Result<Self> {
        Self::with_listeners(config, Listeners::new())
    }

    pub fn with_listeners(config: Config, listeners: Listeners) -> Result<Self> {
        if config.readonly {
            return Err(StoreError::Config(
                "a readonly configuration can only be opened with StoreReader".to_string(),
            ));
        }
        if let Some(root) = &config.root {
            std::fs::create_dir_all(root)?;
        }
        let conn = db::open(
            config.main_database_path().as_deref(),
            config.statement_cache_size,
        )?;
        let (loaded, checksum) = loader::load(&config.ontology)?;
        let update = DataUpdate::new(
            UpdateLog::new(config.statement_cache_size),
            ResourceManager::new(config.blank_nodes),
        );
        let mut store = Store {
            conn,
            ontology: Arc::new(Ontologies::default()),
            checksum: String::new(),
            graphs: GraphManager::default(),
            update,
            tx: TransactionManager::new(listeners, 0),
            config,
        };
        if db::is_initialized(&store.conn)? {
            store.reopen(loaded, checksum)?;
        } else {
            store.initialize(loaded, checksum)?;
        }
        Ok(store)
    }

    fn location(&self) -> String {
        match &self.config.root {
            Some(root) => root.display().to_string(),
            None => "memory".to_string(),
        }
    }

    fn initialize(&mut self, mut loaded: Ontologies, checksum: String) -> Result<()> {
        info!("Initializing store at {}", self.location());
        self.run_ontology_transaction(|store| {
            db::create_core_tables(&store.conn)?;
            let changes = diff(None, &mut loaded);
            migrate::validate(None, &loaded, &changes)?;
            let ids = store.assign_ids(&mut loaded)?;
            Migrator::new(
                &store.conn,
                None,
                &loaded,
                &mut store.update.log,
                MAIN_SCHEMA,
                DEFAULT_GRAPH,
            )
            .apply(&changes)?;
            resource::pin(&store.conn, &ids, 1)?;
            store.write_metadata(&loaded, &checksum)
        })?;
        self.publish(loaded, checksum);
        Ok(())
    }

    fn reopen(&mut self, loaded: Ontologies, checksum: String) -> Result<()> {
        if let Some(version) = db::get_metadata(&self.conn, db::METADATA_SCHEMA_VERSION)? {
            if version != consts::SCHEMA_VERSION.to_string() {
                return Err(StoreError::Config(format!(
                    "unsupported schema version {}",
                    version
                )));
            }
        }
        let json = db::get_metadata(&self.conn, db::METADATA_ONTOLOGY)?.ok_or_else(|| {
            StoreError::Config(format!("{} holds no ontology snapshot", self.location()))
        })?;
        self.ontology = Arc::new(Ontologies::from_json(&json)?);
        self.checksum = db::get_metadata(&self.conn, db::METADATA_CHECKSUM)?.unwrap_or_default();

        let committed = GraphManager::load(&self.conn)?;
        for name in committed.keys() {
            GraphManager::attach(&self.conn, &self.config, name)?;
        }
        self.graphs = GraphManager::new(committed);
        self.tx.max_modseq =
            reader::max_modseq(&self.conn, &self.ontology, &self.graphs.live_schemas())?;
        self.check_locale()?;
        info!(
            "Opened store at {} with {} graphs, modseq {}",
            self.location(),
            self.graphs.get_graphs(false).len(),
            self.tx.max_modseq
        );

        if self.checksum != checksum {
            self.migrate_to(loaded, checksum)?;
        }
        Ok(())
    }

    fn check_locale(&mut self) -> Result<()> {
        let stored = db::get_metadata(&self.conn, db::METADATA_LOCALE)?;
        if stored.as_deref() == Some(self.config.locale.as_str()) {
            return Ok(());
        }
        warn!(
            "Locale changed from {} to {}, rebuilding collated indexes",
            stored.as_deref().unwrap_or("<unset>"),
            self.config.locale
        );
        db::reindex_locale(&self.conn)?;
        db::set_metadata(&self.conn, db::METADATA_LOCALE, &self.config.locale)
    }

    /// Replaces the ontology of the store. The previous ontology and schema stay in
    /// place when the change cannot be applied.
    pub fn update_ontology(&mut self, source: OntologySource) -> Result<()> {
        if self.tx.is_active() {
            return Err(StoreError::Transaction(
                "the ontology cannot change while a transaction is active".to_string(),
            ));
        }
        let (loaded, checksum) = loader::load(&source)?;
        if checksum != self.checksum {
            self.migrate_to(loaded, checksum)?;
        }
        self.config.ontology = source;
        Ok(())
    }

    fn migrate_to(&mut self, mut loaded: Ontologies, checksum: String) -> Result<()> {
        let snapshot = self.ontology.clone();
        let old: &Ontologies = &snapshot;
        let changes = diff(Some(old), &mut loaded);
        if changes.is_empty() {
            debug!("Ontology sources changed without structural changes");
            db::set_metadata(&self.conn, db::METADATA_CHECKSUM, &checksum)?;
            self.checksum = checksum;
            return Ok(());
        }
        migrate::validate(Some(old), &loaded, &changes)?;
        info!("Migrating ontology with {} changes", changes.len());

        self.run_ontology_transaction(|store| {
            let added = store.assign_ids(&mut loaded)?;
            resource::pin(&store.conn, &added, 1)?;

            let mut schemas = vec![(MAIN_SCHEMA.to_string(), DEFAULT_GRAPH)];
            schemas.extend(
                store
                    .graphs
                    .get_graphs(false)
                    .iter()
                    .map(|(name, id)| (name.clone(), *id)),
            );
            for (schema, graph) in &schemas {
                Migrator::new(
                    &store.conn,
                    Some(old),
                    &loaded,
                    &mut store.update.log,
                    schema,
                    *graph,
                )
                .apply(&changes)?;
            }

            let kept: HashSet<i64> = loaded.entity_ids().into_iter().collect();
            let removed: Vec<i64> = old
                .entity_ids()
                .into_iter()
                .filter(|id| !kept.contains(id))
                .collect();
            resource::pin(&store.conn, &removed, -1)?;
            store.write_metadata(&loaded, &checksum)
        })?;
        self.publish(loaded, checksum);
        Ok(())
    }

    fn assign_ids(&mut self, ontology: &mut Ontologies) -> Result<Vec<i64>> {
        let conn = &self.conn;
        let current = &*self.ontology;
        let resources = &mut self.update.resources;
        ontology.assign_ids(|uri| resources.ensure_resource(conn, current, uri))
    }

    fn write_metadata(&self, ontology: &Ontologies, checksum: &str) -> Result<()> {
        db::set_metadata(&self.conn, db::METADATA_ONTOLOGY, &ontology.to_json()?)?;
        db::set_metadata(&self.conn, db::METADATA_CHECKSUM, checksum)?;
        db::set_metadata(
            &self.conn,
            db::METADATA_SCHEMA_VERSION,
            &consts::SCHEMA_VERSION.to_string(),
        )?;
        db::set_metadata(&self.conn, db::METADATA_LOCALE, &self.config.locale)
    }

    fn publish(&mut self, ontology: Ontologies, checksum: String) {
        self.ontology = Arc::new(ontology);
        self.checksum = checksum;
        self.graphs.bump_generation();
    }

    fn run_ontology_transaction<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.tx
            .begin(&self.conn, &self.config, TransactionKind::Ontology)?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                error!("Ontology change failed: {}", err);
                if let Err(rollback_err) = self.rollback() {
                    error!("Rollback failed: {}", rollback_err);
                }
                Err(err)
            }
        }
    }

    // Transactions

    pub fn begin(&mut self) -> Result<()> {
        self.tx.begin(&self.conn, &self.config, TransactionKind::Data)
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.is_active()
    }

    /// Flushes pending work, collects unreferenced resources and commits. On failure the
    /// transaction is rolled back.
    pub fn commit(&mut self) -> Result<()> {
        self.tx.active()?;
        if let Err(err) = self.commit_physical() {
            error!("Commit failed, rolling back: {}", err);
            if let Err(rollback_err) = self.rollback() {
                error!("Rollback failed: {}", rollback_err);
            }
            return Err(err);
        }
        self.tx.committed();
        self.graphs.commit(&self.conn, &self.config);
        self.update.blank_labels.clear();
        self.tx.listeners.transaction(TransactionOutcome::Commit);
        Ok(())
    }

    fn commit_physical(&mut self) -> Result<()> {
        self.flush_pending()?;
        // rows interned for statements that never landed have no Refcount anywhere
        let interned = self.update.resources.take_interned();
        if !interned.is_empty() && db::table_exists(&self.conn, MAIN_SCHEMA, "ResourceGc")? {
            resource::queue_for_collection(&self.conn, &interned)?;
        }
        let mut collect_from = Vec::new();
        for schema in self.graphs.attached_schemas() {
            if db::is_attached(&self.conn, &schema)?
                && db::table_exists(&self.conn, &schema, "ResourceGc")?
            {
                collect_from.push(schema);
            }
        }
        resource::collect_garbage(&self.conn, &collect_from, &self.graphs.live_schemas())?;
        db::commit(&self.conn)
    }

    pub fn rollback(&mut self) -> Result<()> {
        let state = *self.tx.active()?;
        self.update.clear();
        let result = db::rollback(&self.conn);
        if state.kind.is_ontology() {
            self.update.log.clear_plans();
            self.conn.flush_prepared_statement_cache();
        }
        self.tx.rolled_back();
        self.graphs.rollback(&self.conn, &self.config);
        self.tx.listeners.transaction(TransactionOutcome::Rollback);
        debug!("Rolled back {:?} transaction", state.kind);
        result
    }

    /// Aborts the transaction when `result` carries an error it cannot survive.
    fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.requires_rollback() && self.tx.is_active() {
                warn!("Aborting transaction: {}", err);
                if let Err(rollback_err) = self.rollback() {
                    error!("Rollback failed: {}", rollback_err);
                }
            }
        }
        result
    }

    fn context(&mut self) -> (&mut DataUpdate, Context<'_>) {
        (
            &mut self.update,
            Context {
                conn: &self.conn,
                ontology: &*self.ontology,
                previous: None,
                graphs: &self.graphs,
                tx: &mut self.tx,
            },
        )
    }

    // Statements

    pub fn insert_statement(
        &mut self,
        graph: Option<&str>,
        subject: NamedOrBlankNodeRef<'_>,
        predicate: NamedNodeRef<'_>,
        object: TermRef<'_>,
    ) -> Result<bool> {
        self.tx.active()?;
        let result = self.insert_triple(graph, subject, predicate, object);
        self.guard(result)
    }

    fn insert_triple(
        &mut self,
        graph: Option<&str>,
        subject: NamedOrBlankNodeRef<'_>,
        predicate: NamedNodeRef<'_>,
        object: TermRef<'_>,
    ) -> Result<bool> {
        let graph = self.graph_id(graph)?;
        let property = self.ontology.find_property(predicate.as_str())?;
        let subject = self.intern_node(subject)?;
        let object = self.intern_object(property, object)?;
        let (update, mut ctx) = self.context();
        update.insert_statement(&mut ctx, graph, subject, property, object)
    }

    /// Deletes a triple; unknown subjects or objects are a no-op reported as `false`.
    pub fn delete_statement(
        &mut self,
        graph: Option<&str>,
        subject: NamedOrBlankNodeRef<'_>,
        predicate: NamedNodeRef<'_>,
        object: TermRef<'_>,
    ) -> Result<bool> {
        self.tx.active()?;
        let result = self.delete_triple(graph, subject, predicate, object);
        self.guard(result)
    }

    fn delete_triple(
        &mut self,
        graph: Option<&str>,
        subject: NamedOrBlankNodeRef<'_>,
        predicate: NamedNodeRef<'_>,
        object: TermRef<'_>,
    ) -> Result<bool> {
        let graph = self.graph_id(graph)?;
        let property = self.ontology.find_property(predicate.as_str())?;
        let Some(subject) = self.find_node(subject)? else {
            return Ok(false);
        };
        let Some(object) = self.find_object(property, object)? else {
            return Ok(false);
        };
        let (update, mut ctx) = self.context();
        update.delete_statement(&mut ctx, graph, subject, property, object)
    }

    /// Sets a single-valued property, replacing any previous value, or adds a value to a
    /// multi-valued one. `None` removes every value of the property.
    pub fn update_statement(
        &mut self,
        graph: Option<&str>,
        subject: NamedOrBlankNodeRef<'_>,
        predicate: NamedNodeRef<'_>,
        object: Option<TermRef<'_>>,
    ) -> Result<bool> {
        self.tx.active()?;
        let result = self.update_triple(graph, subject, predicate, object);
        self.guard(result)
    }

    fn update_triple(
        &mut self,
        graph: Option<&str>,
        subject: NamedOrBlankNodeRef<'_>,
        predicate: NamedNodeRef<'_>,
        object: Option<TermRef<'_>>,
    ) -> Result<bool> {
        let graph = self.graph_id(graph)?;
        let property = self.ontology.find_property(predicate.as_str())?;
        let subject = match object {
            Some(_) => self.intern_node(subject)?,
            None => match self.find_node(subject)? {
                Some(id) => id,
                None => return Ok(false),
            },
        };
        let object = match object {
            Some(object) => Some(self.intern_object(property, object)?),
            None => None,
        };
        let (update, mut ctx) = self.context();
        update.update_statement(&mut ctx, graph, subject, property, object)
    }

    /// Removes every type and value of `subject` in `graph`.
    pub fn delete_resource(&mut self, graph: Option<&str>, subject: NamedOrBlankNodeRef<'_>) -> Result<bool> {
        self.tx.active()?;
        let result = self.graph_id(graph).and_then(|graph| {
            let Some(subject) = self.find_node(subject)? else {
                return Ok(false);
            };
            let (update, mut ctx) = self.context();
            update.delete_resource(&mut ctx, graph, subject)
        });
        self.guard(result)
    }

    /// Writes all queued changes to the database without committing.
    pub fn flush(&mut self) -> Result<()> {
        self.tx.active()?;
        let result = self.flush_pending();
        self.guard(result)
    }

    fn flush_pending(&mut self) -> Result<()> {
        let (update, mut ctx) = self.context();
        update.flush(&mut ctx)
    }

    fn graph_id(&self, graph: Option<&str>) -> Result<i64> {
        match graph {
            None => Ok(DEFAULT_GRAPH),
            Some(name) => self
                .graphs
                .graph_id(name)
                .ok_or_else(|| StoreError::UnknownGraph(name.to_string())),
        }
    }

    fn intern_uri(&mut self, uri: &str) -> Result<i64> {
        self.update
            .resources
            .ensure_resource(&self.conn, &self.ontology, uri)
    }

    fn intern_blank(&mut self, label: &str) -> Result<i64> {
        if let Some(id) = self.update.blank_labels.get(label) {
            return Ok(*id);
        }
        let id = self.update.resources.generate_blank_node(&self.conn)?;
        self.update.blank_labels.insert(label.to_string(), id);
        Ok(id)
    }

    fn intern_node(&mut self, node: NamedOrBlankNodeRef<'_>) -> Result<i64> {
        match node {
            NamedOrBlankNodeRef::NamedNode(node) => self.intern_uri(node.as_str()),
            NamedOrBlankNodeRef::BlankNode(node) => self.intern_blank(node.as_str()),
        }
    }

    fn intern_object(&mut self, property: PropertyIdx, object: TermRef<'_>) -> Result<Value> {
        let ty = self.ontology.property(property).data_type();
        match object {
            TermRef::NamedNode(node) if ty.is_resource() => {
                Ok(Value::Resource(self.intern_uri(node.as_str())?))
            }
            TermRef::BlankNode(node) if ty.is_resource() => {
                Ok(Value::Resource(self.intern_blank(node.as_str())?))
            }
            TermRef::Literal(literal) if !ty.is_resource() => {
                Value::from_lexical(ty, literal.value(), literal.language())
            }
            other => Err(self.object_mismatch(property, other)),
        }
    }

    fn find_node(&self, node: NamedOrBlankNodeRef<'_>) -> Result<Option<i64>> {
        match node {
            NamedOrBlankNodeRef::NamedNode(node) => {
                reader::find_resource(&self.conn, &self.ontology, node.as_str())
            }
            NamedOrBlankNodeRef::BlankNode(node) => {
                Ok(self.update.blank_labels.get(node.as_str()).copied())
            }
        }
    }

    fn find_object(&self, property: PropertyIdx, object: TermRef<'_>) -> Result<Option<Value>> {
        let ty = self.ontology.property(property).data_type();
        let id = match object {
            TermRef::NamedNode(node) if ty.is_resource() => {
                reader::find_resource(&self.conn, &self.ontology, node.as_str())?
            }
            TermRef::BlankNode(node) if ty.is_resource() => {
                self.update.blank_labels.get(node.as_str()).copied()
            }
            TermRef::Literal(literal) if !ty.is_resource() => {
                return Value::from_lexical(ty, literal.value(), literal.language()).map(Some)
            }
            other => return Err(self.object_mismatch(property, other)),
        };
        Ok(id.map(Value::Resource))
    }

    fn object_mismatch(&self, property: PropertyIdx, object: TermRef<'_>) -> StoreError {
        let property = self.ontology.property(property);
        StoreError::constraint(format!(
            "{} is not a valid object of <{}>, which expects {:?}",
            object,
            property.uri(),
            property.data_type()
        ))
    }

    // Graphs

    /// Creates a named graph backed by its own database. Visible to other readers once
    /// the transaction commits.
    pub fn create_graph(&mut self, name: &str) -> Result<i64> {
        self.tx.active()?;
        let result = self.create_graph_inner(name);
        self.guard(result)
    }

    fn create_graph_inner(&mut self, name: &str) -> Result<i64> {
        if self.graphs.graph_id(name).is_some() {
            return Err(StoreError::constraint(format!("graph <{}> already exists", name)));
        }
        if self.graphs.was_dropped(name) {
            return Err(StoreError::constraint(format!(
                "graph <{}> was dropped in this transaction",
                name
            )));
        }
        if name == MAIN_SCHEMA || name == "temp" {
            return Err(StoreError::constraint(format!("'{}' is a reserved graph name", name)));
        }
        let id = self.intern_uri(name)?;
        if let Some(path) = self.config.graph_database_path(name) {
            if path.exists() {
                warn!("Removing stale database {} of graph <{}>", path.display(), name);
                std::fs::remove_file(&path)?;
            }
        }
        GraphManager::attach(&self.conn, &self.config, name)?;
        if let Err(err) = self.initialize_graph(name, id) {
            self.graphs.add_failed(name);
            return Err(err);
        }
        self.graphs.add_pending(name, id);
        Ok(id)
    }

    fn initialize_graph(&mut self, name: &str, id: i64) -> Result<()> {
        let mut fresh = (*self.ontology).clone();
        let changes = diff(None, &mut fresh);
        Migrator::new(
            &self.conn,
            None,
            &self.ontology,
            &mut self.update.log,
            name,
            id,
        )
        .apply(&changes)?;
        self.conn
            .execute("INSERT INTO main.Graph (ID) VALUES (?1)", params![id])?;
        resource::pin(&self.conn, &[id], 1)
    }

    /// Drops a named graph, or empties the default graph when `graph` is `None`.
    pub fn drop_graph(&mut self, graph: Option<&str>) -> Result<()> {
        self.tx.active()?;
        let result = match graph {
            None => self.clear_default_graph(),
            Some(name) => self.drop_named_graph(name),
        };
        self.guard(result)
    }

    fn clear_default_graph(&mut self) -> Result<()> {
        self.flush_pending()?;
        let resource = self.ontology.resource_class()?;
        let sql = format!(
            "SELECT ID FROM main.{}",
            quote(self.ontology.class(resource).name())
        );
        let ids = {
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
            rows.collect::<rusqlite::Result<Vec<i64>>>()?
        };
        info!("Clearing {} resources from the default graph", ids.len());
        let (update, mut ctx) = self.context();
        for id in ids {
            update.delete_resource(&mut ctx, DEFAULT_GRAPH, id)?;
            if update.might_flush() {
                update.flush(&mut ctx)?;
            }
        }
        Ok(())
    }

    fn drop_named_graph(&mut self, name: &str) -> Result<()> {
        let id = self
            .graphs
            .graph_id(name)
            .ok_or_else(|| StoreError::UnknownGraph(name.to_string()))?;
        self.flush_pending()?;
        // references held by the graph are released with it
        self.conn.execute(
            &format!(
                "INSERT OR IGNORE INTO main.ResourceGc (ID) SELECT ID FROM {}.Refcount",
                quote(name)
            ),
            [],
        )?;
        self.conn
            .execute("DELETE FROM main.Graph WHERE ID = ?1", params![id])?;
        resource::pin(&self.conn, &[id], -1)?;
        self.graphs.remove_pending(name);
        Ok(())
    }

    // Bulk loading

    /// Inserts every statement of an RDF document. Quads naming a graph go to that graph,
    /// everything else to `graph`; missing graphs are created. Returns the number of
    /// statements that changed the store.
    pub fn load_rdf(&mut self, reader: impl Read, format: RdfFormat, graph: Option<&str>) -> Result<usize> {
        self.tx.active()?;
        let result = self.load_quads(reader, format, graph, "<stream>");
        self.guard(result)
    }

    pub fn load_rdf_file(&mut self, path: &Path, graph: Option<&str>) -> Result<usize> {
        self.tx.active()?;
        let name = path.display().to_string();
        let result = util::format_for_path(path)
            .ok_or_else(|| StoreError::parse(&name, "unrecognized RDF file extension"))
            .and_then(|format| {
                let file = std::fs::File::open(path)?;
                self.load_quads(BufReader::new(file), format, graph, &name)
            });
        self.guard(result)
    }

    fn load_quads(
        &mut self,
        reader: impl Read,
        format: RdfFormat,
        graph: Option<&str>,
        name: &str,
    ) -> Result<usize> {
        debug!("Loading {} as {:?}", name, format);
        let mut changed = 0;
        for quad in RdfParser::from_format(format).for_reader(reader) {
            let quad = quad.map_err(|err| util::parse_error(name, err))?;
            let target = match quad.graph_name.as_ref() {
                GraphNameRef::DefaultGraph => graph,
                GraphNameRef::NamedNode(node) => Some(node.as_str()),
                GraphNameRef::BlankNode(node) => {
                    return Err(StoreError::constraint(format!(
                        "blank node graph name {} in {}",
                        node, name
                    )))
                }
            };
            if let Some(target) = target {
                if self.graphs.graph_id(target).is_none() {
                    self.create_graph_inner(target)?;
                }
            }
            if self.insert_triple(
                target,
                quad.subject.as_ref(),
                quad.predicate.as_ref(),
                quad.object.as_ref(),
            )? {
                changed += 1;
            }
            if self.update.might_flush() {
                self.flush_pending()?;
            }
        }
        info!("Loaded {} statements from {}", changed, name);
        Ok(changed)
    }

    // Reads, which see flushed changes only

    fn read_schema(&self, graph: Option<&str>) -> Result<String> {
        let id = self.graph_id(graph)?;
        self.graphs.schema_for(id)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The published ontology snapshot.
    pub fn ontology(&self) -> Arc<Ontologies> {
        self.ontology.clone()
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn resource_id(&self, uri: &str) -> Result<Option<i64>> {
        reader::find_resource(&self.conn, &self.ontology, uri)
    }

    pub fn uri_for_id(&self, id: i64) -> Result<Option<String>> {
        resource::uri_for_id(&self.conn, id)
    }

    /// Class IRIs of a resource in `graph`.
    pub fn types(&self, graph: Option<&str>, id: i64) -> Result<Vec<String>> {
        let schema = self.read_schema(graph)?;
        let types = reader::load_types(&self.conn, &self.ontology, &schema, id)?;
        Ok(reader::class_uris(&self.ontology, &types))
    }

    pub fn property_values(&self, graph: Option<&str>, id: i64, property: &str) -> Result<Vec<Value>> {
        let schema = self.read_schema(graph)?;
        let property = self.ontology.find_property(property)?;
        reader::load_values(&self.conn, &self.ontology, &schema, id, property)
    }

    pub fn refcount(&self, graph: Option<&str>, id: i64) -> Result<i64> {
        resource::refcount(&self.conn, &self.read_schema(graph)?, id)
    }

    /// Resources whose full-text indexed properties match `query`, best match first.
    pub fn search(&self, graph: Option<&str>, query: &str) -> Result<Vec<i64>> {
        fts::search(&self.conn, &self.read_schema(graph)?, &self.ontology, query)
    }

    pub fn fts_integrity_check(&self, graph: Option<&str>) -> Result<bool> {
        fts::integrity_check(&self.conn, &self.read_schema(graph)?, &self.ontology)
    }

    pub fn statistics(&self) -> Statistics {
        self.update.statistics()
    }

    /// The modification sequence number of the last committed data transaction.
    pub fn modseq(&self) -> i64 {
        self.tx.max_modseq
    }

    /// Named graphs as seen by the running transaction.
    pub fn graphs(&self) -> Vec<String> {
        self.graphs.get_graphs(true).keys().cloned().collect()
    }

    pub fn graph_generation(&self) -> u64 {
        self.graphs.generation()
    }

    /// A read-only connection that follows graph and ontology changes of this store.
    pub fn reader(&self) -> Result<StoreReader> {
        StoreReader::open_with_generation(&self.config, Some(self.graphs.generation_handle()))
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if self.tx.is_active() {
            warn!("Store dropped with an active transaction, rolling back");
            if let Err(err) = self.rollback() {
                error!("Rollback failed: {}", err);
            }
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("location", &self.location())
            .field("checksum", &self.checksum)
            .field("graphs", &self.graphs)
            .field("transaction", &self.tx.state)
            .finish()
    }
}
