//! Applies ontology change records to the tables of one database: class tables,
//! multi-valued side tables, value indexes, the refcount bookkeeping and the full-text
//! index. Unsupported changes are rejected by [`validate`] before anything is touched.

use crate::consts::TIME_SORT_FUNCTION;
use crate::db;
use crate::errors::{Result, StoreError};
use crate::fts;
use crate::log::{column_definition, Catalog, UpdateLog};
use crate::ontology::diff::Change;
use crate::ontology::{ClassIdx, Ontologies, PropertyIdx};
use crate::util::quote;
use crate::value::PropertyType;
use log::{debug, info};
use rusqlite::{params, Connection};
use std::collections::HashSet;

const COPY_TABLE: &str = "TMP_copy";

/// Rejects changes that have no migration path. Runs once per ontology update, before
/// any database is altered.
pub fn validate(old: Option<&Ontologies>, new: &Ontologies, changes: &[Change]) -> Result<()> {
    for change in changes {
        match change {
            Change::DomainChanged { property, from, to } => {
                return Err(StoreError::unsupported(format!(
                    "rdfs:domain of {} changed from {} to {}",
                    property, from, to
                )));
            }
            Change::RangeChanged { property, from, to } if !from.converts_to(*to) => {
                return Err(StoreError::unsupported(format!(
                    "rdfs:range of {} cannot change from {:?} to {:?}",
                    property, from, to
                )));
            }
            Change::CardinalityChanged {
                property,
                multiple_values: false,
            } => {
                return Err(StoreError::unsupported(format!(
                    "nrl:maxCardinality cannot be restricted on existing property {}",
                    property
                )));
            }
            Change::NewInverseFunctional { property }
                if old.map_or(false, |old| old.property_by_uri(property).is_some()) =>
            {
                return Err(StoreError::unsupported(format!(
                    "existing property {} cannot become inverse functional",
                    property
                )));
            }
            Change::NewSecondaryIndex { property, secondary } => {
                let p = new.property(new.find_property(property)?);
                let s = new.property(new.find_property(secondary)?);
                if p.multiple_values() || s.multiple_values() || p.domain() != s.domain() {
                    return Err(StoreError::unsupported(format!(
                        "secondary index {} on {} needs single-valued properties of one class",
                        secondary, property
                    )));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Order in which change kinds are applied: removals before additions, tables before
/// the columns, rows and indexes that live in them.
fn phase(change: &Change) -> u8 {
    match change {
        Change::DeleteDomainIndex { .. } => 0,
        Change::DeleteSuperClass { .. }
        | Change::DeleteSuperProperty { .. }
        | Change::DeleteIndex { .. }
        | Change::DeleteSecondaryIndex { .. }
        | Change::DeleteInverseFunctional { .. }
        | Change::DeleteFulltext { .. } => 1,
        Change::DeleteProperty { .. } => 2,
        Change::DeleteClass { .. } => 3,
        Change::DomainChanged { .. } | Change::RangeChanged { .. } => 4,
        Change::CardinalityChanged { .. } => 5,
        Change::NewClass { .. } => 6,
        Change::NewProperty { .. } => 7,
        Change::NewDomainIndex { .. } => 8,
        Change::NewSuperClass { .. } | Change::NewSuperProperty { .. } => 9,
        Change::NewIndex { .. }
        | Change::NewSecondaryIndex { .. }
        | Change::NewInverseFunctional { .. }
        | Change::NewFulltext { .. } => 10,
    }
}

fn index_name(table: &str, column: &str) -> String {
    format!("{}_{}_index", table, column)
}

/// Migrates the schema of one database, `main` or an attached graph.
pub struct Migrator<'a> {
    conn: &'a Connection,
    old: Option<&'a Ontologies>,
    new: &'a Ontologies,
    log: &'a mut UpdateLog,
    schema: String,
    graph: i64,
}

impl<'a> Migrator<'a> {
    pub fn new(
        conn: &'a Connection,
        old: Option<&'a Ontologies>,
        new: &'a Ontologies,
        log: &'a mut UpdateLog,
        schema: &str,
        graph: i64,
    ) -> Self {
        Migrator {
            conn,
            old,
            new,
            log,
            schema: schema.to_string(),
            graph,
        }
    }

    pub fn apply(&mut self, changes: &[Change]) -> Result<()> {
        self.log.clear_plans();
        let fresh = !db::table_exists(self.conn, &self.schema, "Refcount")?;
        if fresh {
            self.create_core_tables()?;
        }
        let rebuild_fts = fresh || changes.iter().any(Change::affects_fulltext);
        if rebuild_fts {
            fts::drop(self.conn, &self.schema)?;
        }

        let mut ordered: Vec<&Change> = changes.iter().collect();
        ordered.sort_by_key(|change| phase(change));
        for change in ordered {
            debug!("Applying {:?} to {}", change, self.schema);
            self.apply_change(change)?;
        }

        self.create_refcount_trigger()?;
        if rebuild_fts {
            fts::create(self.conn, &self.schema, self.new)?;
        }
        info!("Applied {} ontology changes to {}", changes.len(), self.schema);
        Ok(())
    }

    fn apply_change(&mut self, change: &Change) -> Result<()> {
        match change {
            Change::NewClass { class } => self.create_class_table(self.new.find_class(class)?),
            Change::NewProperty { property } => self.add_property(self.new.find_property(property)?),
            Change::NewSuperClass { class, super_class } => {
                self.add_super_class(self.new.find_class(class)?, self.new.find_class(super_class)?)
            }
            Change::NewSuperProperty {
                property,
                super_property,
            } => self.add_super_property(
                self.new.find_property(property)?,
                self.new.find_property(super_property)?,
            ),
            Change::NewDomainIndex { class, property } => {
                self.add_domain_index(self.new.find_class(class)?, self.new.find_property(property)?)
            }
            Change::NewIndex { property } => {
                self.create_property_indexes(self.new.find_property(property)?)
            }
            Change::NewSecondaryIndex { property, .. } => {
                let idx = self.new.find_property(property)?;
                let domain = self.new.property(idx).domain();
                self.drop_index(self.new.class(domain).name(), self.new.property(idx).name())?;
                self.create_column_index(domain, idx)
            }
            Change::DeleteDomainIndex { class, property } => self.remove_domain_index(class, property),
            Change::DeleteIndex { property } | Change::DeleteSecondaryIndex { property, .. } => {
                self.remove_property_indexes(property)
            }
            Change::DeleteProperty { property } => self.remove_property(property),
            Change::DeleteClass { class } => self.remove_class(class),
            Change::RangeChanged { property, from, to } => self.change_range(property, *from, *to),
            Change::CardinalityChanged { property, .. } => self.widen_cardinality(property),
            Change::DeleteSuperClass { class, super_class } => {
                debug!("{} is no longer a subclass of {}; memberships are kept", class, super_class);
                Ok(())
            }
            Change::DeleteSuperProperty {
                property,
                super_property,
            } => {
                debug!(
                    "{} is no longer a subproperty of {}; copied values are kept",
                    property, super_property
                );
                Ok(())
            }
            Change::NewFulltext { .. }
            | Change::DeleteFulltext { .. }
            | Change::NewInverseFunctional { .. }
            | Change::DeleteInverseFunctional { .. } => Ok(()),
            Change::DomainChanged { property, .. } => Err(StoreError::unsupported(format!(
                "rdfs:domain of {} changed",
                property
            ))),
        }
    }

    fn table(&self, name: &str) -> String {
        format!("{}.{}", quote(&self.schema), quote(name))
    }

    fn execute(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn flush_log(&mut self) -> Result<()> {
        let catalog = Catalog {
            current: self.new,
            previous: self.old,
        };
        let schema = self.schema.clone();
        self.log.flush(self.conn, &catalog, &move |_| Ok(schema.clone()))
    }

    /// Snapshot describing an entity that may be gone from the new ontology.
    fn old_property(&self, uri: &str) -> Result<(&'a Ontologies, PropertyIdx)> {
        self.old
            .into_iter()
            .chain(std::iter::once(self.new))
            .find_map(|ont| ont.property_by_uri(uri).map(|idx| (ont, idx)))
            .ok_or_else(|| StoreError::UnknownProperty(uri.to_string()))
    }

    fn old_class(&self, uri: &str) -> Result<(&'a Ontologies, ClassIdx)> {
        self.old
            .into_iter()
            .chain(std::iter::once(self.new))
            .find_map(|ont| ont.class_by_uri(uri).map(|idx| (ont, idx)))
            .ok_or_else(|| StoreError::UnknownClass(uri.to_string()))
    }

    fn type_table(&self) -> Result<String> {
        Ok(self.table(&self.new.property_table(self.new.rdf_type()?)))
    }

    fn create_core_tables(&self) -> Result<()> {
        self.execute(&format!(
            "CREATE TABLE IF NOT EXISTS {s}.Refcount (ID INTEGER NOT NULL PRIMARY KEY, Refcount INTEGER);
             CREATE TABLE IF NOT EXISTS {s}.ResourceGc (ID INTEGER NOT NULL PRIMARY KEY);",
            s = quote(&self.schema)
        ))
    }

    // Trigger bodies resolve tables in the trigger's own database.
    fn create_refcount_trigger(&self) -> Result<()> {
        let resource = self.new.class(self.new.resource_class()?).name();
        self.execute(&format!(
            "CREATE TRIGGER IF NOT EXISTS {s}.\"trigger_Refcount\" AFTER UPDATE OF Refcount ON Refcount
             FOR EACH ROW WHEN NEW.Refcount = 0 BEGIN
                 DELETE FROM {resource} WHERE ID = NEW.ID;
                 DELETE FROM Refcount WHERE ID = NEW.ID;
                 INSERT OR IGNORE INTO ResourceGc (ID) VALUES (NEW.ID);
             END;",
            s = quote(&self.schema),
            resource = quote(resource)
        ))
    }

    fn create_class_table(&self, class: ClassIdx) -> Result<()> {
        let mut columns = vec!["ID INTEGER NOT NULL PRIMARY KEY".to_string()];
        for property in self.new.class_columns(class) {
            columns.push(column_definition(self.new.property(property)));
        }
        self.execute(&format!(
            "CREATE TABLE {} ({})",
            self.table(self.new.class(class).name()),
            columns.join(", ")
        ))?;
        for property in self.new.class_columns(class) {
            self.create_column_index(class, property)?;
        }
        Ok(())
    }

    fn create_multivalued_table(&self, property: PropertyIdx) -> Result<()> {
        let p = self.new.property(property);
        let table = self.new.property_table(property);
        let column = quote(p.name());
        let key = match p.data_type() {
            PropertyType::DateTime => format!("{}({})", TIME_SORT_FUNCTION, column),
            _ => column.clone(),
        };
        self.execute(&format!(
            "CREATE TABLE {t} (ID INTEGER NOT NULL, {def});
             CREATE UNIQUE INDEX {s}.{unique} ON {name} (ID, {key});",
            t = self.table(&table),
            def = column_definition(p),
            s = quote(&self.schema),
            unique = quote(&format!("{}_ID_ID", table)),
            name = quote(&table),
            key = key
        ))?;
        self.create_property_indexes(property)
    }

    /// Value index of a single-valued column, composite when the property has a
    /// secondary index and `class` is its domain.
    fn create_column_index(&self, class: ClassIdx, property: PropertyIdx) -> Result<()> {
        let p = self.new.property(property);
        let secondary = p.secondary_index().filter(|_| class == p.domain());
        if !p.indexed() && secondary.is_none() {
            return Ok(());
        }
        let table = self.new.class(class).name();
        let mut columns = vec![match p.data_type() {
            PropertyType::DateTime => format!("{}({})", TIME_SORT_FUNCTION, quote(p.name())),
            _ => quote(p.name()),
        }];
        if let Some(secondary) = secondary {
            columns.push(quote(self.new.property(secondary).name()));
        }
        self.execute(&format!(
            "CREATE INDEX IF NOT EXISTS {}.{} ON {} ({})",
            quote(&self.schema),
            quote(&index_name(table, p.name())),
            quote(table),
            columns.join(", ")
        ))
    }

    fn create_property_indexes(&self, property: PropertyIdx) -> Result<()> {
        let p = self.new.property(property);
        if p.multiple_values() {
            if p.indexed() {
                let table = self.new.property_table(property);
                self.execute(&format!(
                    "CREATE INDEX IF NOT EXISTS {}.{} ON {} ({}, ID)",
                    quote(&self.schema),
                    quote(&format!("{}_ID", table)),
                    quote(&table),
                    quote(p.name())
                ))?;
            }
            return Ok(());
        }
        self.create_column_index(p.domain(), property)?;
        for class in p.domain_indexes() {
            self.create_column_index(*class, property)?;
        }
        Ok(())
    }

    fn drop_index(&self, table: &str, column: &str) -> Result<()> {
        self.execute(&format!(
            "DROP INDEX IF EXISTS {}.{}",
            quote(&self.schema),
            quote(&index_name(table, column))
        ))
    }

    /// Drops a column together with every index mentioning it.
    fn drop_column(&self, table: &str, column: &str) -> Result<()> {
        if !db::column_exists(self.conn, &self.schema, table, column)? {
            return Ok(());
        }
        let sql = format!(
            "SELECT name FROM {}.sqlite_master WHERE type = 'index' AND tbl_name = ?1 AND sql LIKE ?2",
            quote(&self.schema)
        );
        let indexes: Vec<String> = {
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params![table, format!("%{}%", quote(column))], |row| {
                row.get(0)
            })?;
            rows.collect::<rusqlite::Result<_>>()?
        };
        for index in indexes {
            self.execute(&format!("DROP INDEX {}", self.table(&index)))?;
        }
        self.execute(&format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.table(table),
            quote(column)
        ))
    }

    /// Recreates the value indexes of `class` that a column drop may have taken along.
    fn restore_class_indexes(&self, class: ClassIdx) -> Result<()> {
        for property in self.new.class_columns(class) {
            self.create_column_index(class, property)?;
        }
        Ok(())
    }

    fn add_column(&self, class: ClassIdx, property: PropertyIdx) -> Result<bool> {
        let table = self.new.class(class).name();
        let p = self.new.property(property);
        if db::column_exists(self.conn, &self.schema, table, p.name())? {
            return Ok(false);
        }
        self.execute(&format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.table(table),
            column_definition(p)
        ))?;
        Ok(true)
    }

    fn add_property(&self, property: PropertyIdx) -> Result<()> {
        let p = self.new.property(property);
        if p.multiple_values() {
            if !db::table_exists(self.conn, &self.schema, &self.new.property_table(property))? {
                self.create_multivalued_table(property)?;
            }
            return Ok(());
        }
        self.add_column(p.domain(), property)?;
        self.create_property_indexes(property)
    }

    /// Copies the domain table's values into the domain index column of `class`.
    fn refresh_domain_index(&self, class: ClassIdx, property: PropertyIdx) -> Result<()> {
        let p = self.new.property(property);
        let table = self.new.class(class).name();
        self.execute(&format!(
            "UPDATE {t} SET {c} = (SELECT v.{c} FROM {d} v WHERE v.ID = {name}.ID)",
            t = self.table(table),
            c = quote(p.name()),
            d = self.table(&self.new.property_table(property)),
            name = quote(table)
        ))
    }

    fn add_domain_index(&self, class: ClassIdx, property: PropertyIdx) -> Result<()> {
        self.add_column(class, property)?;
        self.refresh_domain_index(class, property)?;
        self.create_column_index(class, property)
    }

    fn remove_domain_index(&self, class: &str, property: &str) -> Result<()> {
        let Some(class) = self.new.class_by_uri(class) else {
            // the class table itself goes away
            return Ok(());
        };
        let (ont, idx) = self.old_property(property)?;
        let table = self.new.class(class).name();
        if db::table_exists(self.conn, &self.schema, table)? {
            self.drop_column(table, ont.property(idx).name())?;
            self.restore_class_indexes(class)?;
        }
        Ok(())
    }

    fn remove_property_indexes(&self, property: &str) -> Result<()> {
        let (ont, idx) = self.old_property(property)?;
        let p = ont.property(idx);
        if p.multiple_values() {
            self.execute(&format!(
                "DROP INDEX IF EXISTS {}",
                self.table(&format!("{}_ID", ont.property_table(idx)))
            ))?;
        } else {
            self.drop_index(ont.class(p.domain()).name(), p.name())?;
            for class in p.domain_indexes() {
                self.drop_index(ont.class(*class).name(), p.name())?;
            }
        }
        // a remaining index flag or secondary index is put back in its new shape
        if let Some(current) = self.new.property_by_uri(property) {
            if self.new.property(current).multiple_values() == p.multiple_values() {
                self.create_property_indexes(current)?;
            }
        }
        Ok(())
    }

    /// Drops the storage of a deleted property after releasing the references its
    /// resource values hold.
    fn remove_property(&mut self, property: &str) -> Result<()> {
        let (ont, idx) = self.old_property(property)?;
        let p = ont.property(idx);
        let table = ont.property_table(idx);
        if !db::table_exists(self.conn, &self.schema, &table)? {
            return Ok(());
        }
        if p.data_type().is_resource() {
            if p.multiple_values() {
                self.log
                    .ref_change_for_multivalued_property_clear(self.graph, p.id(), -1);
            } else {
                self.log.ref_change_for_property_clear(self.graph, p.id(), -1);
            }
            self.flush_log()?;
        }
        if p.multiple_values() {
            self.execute(&format!("DROP TABLE {}", self.table(&table)))?;
        } else if let Some(domain) = self.new.class_by_uri(ont.class(p.domain()).uri()) {
            self.drop_column(&table, p.name())?;
            self.restore_class_indexes(domain)?;
        }
        Ok(())
    }

    /// Drops a class table; its instances lose the membership and the references
    /// that come with it.
    fn remove_class(&self, class: &str) -> Result<()> {
        let (ont, idx) = self.old_class(class)?;
        let c = ont.class(idx);
        let table = self.table(c.name());
        if !db::table_exists(self.conn, &self.schema, c.name())? {
            return Ok(());
        }
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        if count > 0 {
            self.conn.execute(
                &format!(
                    "UPDATE {s}.Refcount SET Refcount = Refcount - 1 WHERE ID IN (SELECT ID FROM {t})",
                    s = quote(&self.schema),
                    t = table
                ),
                [],
            )?;
            self.conn.execute(
                &format!(
                    "UPDATE {}.Refcount SET Refcount = Refcount - ?1 WHERE ID = ?2",
                    quote(&self.schema)
                ),
                params![count, c.id()],
            )?;
            self.conn.execute(
                &format!(
                    "DELETE FROM {} WHERE {} = ?1",
                    self.type_table()?,
                    quote(self.new.property(self.new.rdf_type()?).name())
                ),
                params![c.id()],
            )?;
        }
        self.execute(&format!("DROP TABLE {}", table))?;
        debug!("Dropped class {} with {} instances", c.name(), count);
        Ok(())
    }

    /// Retypes stored values through a temporary table so each value is cast once.
    fn change_range(&self, property: &str, from: PropertyType, to: PropertyType) -> Result<()> {
        if from == to {
            return Ok(());
        }
        let (old, old_idx) = self.old_property(property)?;
        let new_idx = self.new.find_property(property)?;
        let p = self.new.property(new_idx);
        let column = quote(p.name());
        let cast = from.cast_expression(to, &column);

        if old.property(old_idx).multiple_values() {
            let table = old.property_table(old_idx);
            self.execute(&format!(
                "DROP TABLE IF EXISTS temp.{copy};
                 CREATE TEMP TABLE {copy} AS SELECT ID, {cast} AS value FROM {t};
                 DROP TABLE {t};",
                copy = quote(COPY_TABLE),
                cast = cast,
                t = self.table(&table)
            ))?;
            self.create_multivalued_table(new_idx)?;
            self.execute(&format!(
                "INSERT OR IGNORE INTO {t} (ID, {c}) SELECT ID, value FROM temp.{copy} WHERE value IS NOT NULL;
                 DROP TABLE temp.{copy};",
                t = self.table(&self.new.property_table(new_idx)),
                c = column,
                copy = quote(COPY_TABLE)
            ))?;
        } else {
            let old_p = old.property(old_idx);
            let mut classes = vec![old_p.domain()];
            classes.extend(old_p.domain_indexes().iter().copied());
            for class in classes {
                let name = old.class(class).name();
                if db::table_exists(self.conn, &self.schema, name)? {
                    self.retype_column(name, new_idx, &cast)?;
                }
            }
        }
        info!("Converted values of {} from {:?} to {:?}", property, from, to);
        Ok(())
    }

    fn retype_column(&self, table: &str, property: PropertyIdx, cast: &str) -> Result<()> {
        let p = self.new.property(property);
        let column = quote(p.name());
        self.execute(&format!(
            "DROP TABLE IF EXISTS temp.{copy};
             CREATE TEMP TABLE {copy} AS SELECT ID, {cast} AS value FROM {t} WHERE {c} IS NOT NULL;",
            copy = quote(COPY_TABLE),
            cast = cast,
            t = self.table(table),
            c = column
        ))?;
        self.drop_column(table, p.name())?;
        self.execute(&format!(
            "ALTER TABLE {t} ADD COLUMN {def};
             UPDATE {t} SET {c} = (SELECT v.value FROM temp.{copy} v WHERE v.ID = {name}.ID)
                 WHERE ID IN (SELECT ID FROM temp.{copy});
             DROP TABLE temp.{copy};",
            t = self.table(table),
            def = column_definition(p),
            c = column,
            copy = quote(COPY_TABLE),
            name = quote(table)
        ))?;
        if let Some(class) = self
            .new
            .classes()
            .find(|(_, c)| c.name() == table)
            .map(|(idx, _)| idx)
        {
            self.restore_class_indexes(class)?;
        }
        Ok(())
    }

    /// Moves a single-valued column into a new multi-valued side table.
    fn widen_cardinality(&self, property: &str) -> Result<()> {
        let (old, old_idx) = self.old_property(property)?;
        let new_idx = self.new.find_property(property)?;
        let old_p = old.property(old_idx);
        let domain = old.class(old_p.domain()).name();
        if !db::table_exists(self.conn, &self.schema, &self.new.property_table(new_idx))? {
            self.create_multivalued_table(new_idx)?;
        }
        let column = quote(old_p.name());
        self.execute(&format!(
            "INSERT OR IGNORE INTO {t} (ID, {c}) SELECT ID, {c} FROM {d} WHERE {c} IS NOT NULL",
            t = self.table(&self.new.property_table(new_idx)),
            c = column,
            d = self.table(domain)
        ))?;
        self.drop_column(domain, old_p.name())?;
        self.restore_class_indexes(self.new.property(new_idx).domain())?;
        info!("{} now allows multiple values", property);
        Ok(())
    }

    /// Makes every instance of `class` an instance of `super_class` and of all its
    /// ancestors.
    fn add_super_class(&self, class: ClassIdx, super_class: ClassIdx) -> Result<()> {
        let mut seen = HashSet::new();
        let targets = std::iter::once(super_class).chain(self.new.super_class_closure(super_class));
        for target in targets {
            if target != class && seen.insert(target) {
                self.copy_class_rows(class, target)?;
            }
        }
        Ok(())
    }

    /// Writes the tables directly, outside the update log. Refcounts are adjusted here
    /// and the full-text index is rebuilt at the end of `apply`.
    fn copy_class_rows(&self, class: ClassIdx, target: ClassIdx) -> Result<()> {
        let source = self.table(self.new.class(class).name());
        let dest = self.table(self.new.class(target).name());
        let missing = format!("ID NOT IN (SELECT ID FROM {})", dest);
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE {}", source, missing),
            [],
            |row| row.get(0),
        )?;
        if count == 0 {
            return Ok(());
        }
        let target_id = self.new.class(target).id();
        let refcount = format!("{}.Refcount", quote(&self.schema));
        self.conn.execute(
            &format!(
                "INSERT INTO {r} (ID, Refcount) SELECT ID, 1 FROM {src} WHERE {missing} \
                 ON CONFLICT(ID) DO UPDATE SET Refcount = Refcount + excluded.Refcount",
                r = refcount,
                src = source,
                missing = missing
            ),
            [],
        )?;
        self.conn.execute(
            &format!(
                "INSERT INTO {} (ID, Refcount) VALUES (?1, ?2) \
                 ON CONFLICT(ID) DO UPDATE SET Refcount = Refcount + excluded.Refcount",
                refcount
            ),
            params![target_id, count],
        )?;
        self.conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {} (ID, {}) SELECT ID, ?1 FROM {} WHERE {}",
                self.type_table()?,
                quote(self.new.property(self.new.rdf_type()?).name()),
                source,
                missing
            ),
            params![target_id],
        )?;

        let target_columns = self.new.class_columns(target);
        let shared: Vec<String> = self
            .new
            .class_columns(class)
            .into_iter()
            .filter(|p| target_columns.contains(p))
            .map(|p| quote(self.new.property(p).name()))
            .collect();
        let mut columns = vec!["ID".to_string()];
        columns.extend(shared);
        let columns = columns.join(", ");
        self.execute(&format!(
            "INSERT INTO {dest} ({cols}) SELECT {cols} FROM {src} WHERE {missing}",
            dest = dest,
            cols = columns,
            src = source,
            missing = missing
        ))?;
        debug!(
            "Copied {} rows of {} into {}",
            count,
            self.new.class(class).name(),
            self.new.class(target).name()
        );
        Ok(())
    }

    /// Copies the values of `property` into `super_property` and all its ancestors.
    fn add_super_property(&self, property: PropertyIdx, super_property: PropertyIdx) -> Result<()> {
        let mut seen = HashSet::new();
        let targets =
            std::iter::once(super_property).chain(self.new.super_property_closure(super_property));
        for target in targets {
            if target != property && seen.insert(target) {
                self.copy_property_values(property, target)?;
            }
        }
        Ok(())
    }

    /// Same contract as `copy_class_rows`: resource values gain one reference per copy.
    fn copy_property_values(&self, property: PropertyIdx, target: PropertyIdx) -> Result<()> {
        let p = self.new.property(property);
        let q = self.new.property(target);
        let source = self.table(&self.new.property_table(property));
        let dest_name = self.new.property_table(target);
        let dest = self.table(&dest_name);
        let (pc, qc) = (quote(p.name()), quote(q.name()));
        let copy = quote(COPY_TABLE);

        let pending = if q.multiple_values() {
            format!(
                "SELECT v.ID AS ID, v.{pc} AS value FROM {src} v WHERE v.{pc} IS NOT NULL \
                 AND NOT EXISTS (SELECT 1 FROM {dest} w WHERE w.ID = v.ID AND w.{qc} = v.{pc})",
                pc = pc,
                qc = qc,
                src = source,
                dest = dest
            )
        } else {
            format!(
                "SELECT w.ID AS ID, (SELECT v.{pc} FROM {src} v WHERE v.ID = w.ID AND v.{pc} IS NOT NULL LIMIT 1) AS value \
                 FROM {dest} w WHERE w.{qc} IS NULL",
                pc = pc,
                qc = qc,
                src = source,
                dest = dest
            )
        };
        self.execute(&format!(
            "DROP TABLE IF EXISTS temp.{copy};
             CREATE TEMP TABLE {copy} AS {pending};
             DELETE FROM temp.{copy} WHERE value IS NULL;",
            copy = copy,
            pending = pending
        ))?;
        if q.multiple_values() {
            self.execute(&format!(
                "INSERT OR IGNORE INTO {dest} (ID, {qc}) SELECT ID, value FROM temp.{copy}",
                dest = dest,
                qc = qc,
                copy = copy
            ))?;
        } else {
            self.execute(&format!(
                "UPDATE {dest} SET {qc} = (SELECT v.value FROM temp.{copy} v WHERE v.ID = {name}.ID)
                 WHERE ID IN (SELECT ID FROM temp.{copy})",
                dest = dest,
                qc = qc,
                copy = copy,
                name = quote(&dest_name)
            ))?;
        }
        if q.data_type().is_resource() {
            self.execute(&format!(
                "INSERT INTO {s}.Refcount (ID, Refcount) SELECT value, COUNT(*) FROM temp.{copy} \
                 WHERE value IS NOT NULL GROUP BY value \
                 ON CONFLICT(ID) DO UPDATE SET Refcount = Refcount + excluded.Refcount",
                s = quote(&self.schema),
                copy = copy
            ))?;
        }
        self.execute(&format!("DROP TABLE temp.{}", copy))?;
        if !q.multiple_values() {
            for class in q.domain_indexes() {
                self.refresh_domain_index(*class, target)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::diff::diff;
    use crate::ontology::loader;
    use crate::ontology::OntologySource;

    const PREAMBLE: &str = "@prefix rdf: <http://www.w3.org/1999/02/22-rdf-syntax-ns#> .\n\
        @prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .\n\
        @prefix xsd: <http://www.w3.org/2001/XMLSchema#> .\n\
        @prefix nrl: <http://www.semanticdesktop.org/ontologies/2007/08/15/nrl#> .\n\
        @prefix ex: <http://example.org/ns#> .\n\
        ex: a nrl:Namespace ; nrl:prefix \"ex\" .\n\
        ex:Person a rdfs:Class .\n";

    fn ontology(body: &str) -> Ontologies {
        let source = OntologySource::inline("ex.ontology", format!("{}{}", PREAMBLE, body));
        loader::load(&source).unwrap().0
    }

    fn with_ids(mut ont: Ontologies) -> Ontologies {
        let mut next = 0;
        ont.assign_ids(|_| {
            next += 1;
            Ok(next)
        })
        .unwrap();
        ont
    }

    const AGE_INTEGER: &str = "ex:age a rdf:Property ; rdfs:domain ex:Person ; \
        rdfs:range xsd:integer ; nrl:maxCardinality 1 .\n";

    #[test]
    fn lossless_range_changes_validate() {
        let old = with_ids(ontology(AGE_INTEGER));
        let mut new = ontology(&AGE_INTEGER.replace("xsd:integer", "xsd:string"));
        let changes = diff(Some(&old), &mut new);
        assert!(validate(Some(&old), &new, &changes).is_ok());

        let mut new = ontology(&AGE_INTEGER.replace("xsd:integer", "xsd:dateTime"));
        let changes = diff(Some(&old), &mut new);
        let err = validate(Some(&old), &new, &changes).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedOntologyChange(_)));
    }

    #[test]
    fn narrowing_cardinality_is_rejected() {
        let old = with_ids(ontology(&AGE_INTEGER.replace(" ; nrl:maxCardinality 1", "")));
        let mut new = ontology(AGE_INTEGER);
        let changes = diff(Some(&old), &mut new);
        let err = validate(Some(&old), &new, &changes).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedOntologyChange(_)));

        // widening goes the other way and is fine
        let old = with_ids(ontology(AGE_INTEGER));
        let mut new = ontology(&AGE_INTEGER.replace(" ; nrl:maxCardinality 1", ""));
        let changes = diff(Some(&old), &mut new);
        assert!(validate(Some(&old), &new, &changes).is_ok());
    }

    #[test]
    fn existing_property_cannot_become_inverse_functional() {
        let old = with_ids(ontology(AGE_INTEGER));
        let mut new = ontology(&AGE_INTEGER.replace("a rdf:Property", "a nrl:InverseFunctionalProperty"));
        let changes = diff(Some(&old), &mut new);
        assert!(changes
            .iter()
            .any(|c| matches!(c, Change::NewInverseFunctional { .. })));
        assert!(validate(Some(&old), &new, &changes).is_err());
    }

    #[test]
    fn removals_are_applied_before_additions() {
        let mut changes = vec![
            Change::NewIndex { property: "p".into() },
            Change::NewClass { class: "c".into() },
            Change::DeleteClass { class: "d".into() },
            Change::NewProperty { property: "q".into() },
            Change::DeleteDomainIndex {
                class: "c".into(),
                property: "p".into(),
            },
        ];
        changes.sort_by_key(phase);
        assert!(matches!(changes[0], Change::DeleteDomainIndex { .. }));
        assert!(matches!(changes[1], Change::DeleteClass { .. }));
        assert!(matches!(changes[2], Change::NewClass { .. }));
        assert!(matches!(changes[3], Change::NewProperty { .. }));
        assert!(matches!(changes[4], Change::NewIndex { .. }));
    }
}
