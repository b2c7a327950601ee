//! Statement semantics: turns inserts, deletes and updates of triples into update log
//! entries, tracking the types and values of every resource touched since the last
//! flush so that refcounts, domain indexes and super properties stay consistent.

use crate::errors::{Result, StoreError};
use crate::fts;
use crate::graphs::GraphManager;
use crate::log::{Catalog, Statistics, UpdateLog};
use crate::ontology::{ClassIdx, Ontologies, PropertyIdx};
use crate::options::StatementKind;
use crate::reader;
use crate::resource::ResourceManager;
use crate::transaction::{StatementEvent, TransactionManager};
use crate::util::quote;
use crate::value::Value;
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;

/// Everything a statement needs besides the update state itself.
pub(crate) struct Context<'a> {
    pub conn: &'a Connection,
    pub ontology: &'a Ontologies,
    /// Snapshot being migrated away from, while an ontology change is applied.
    pub previous: Option<&'a Ontologies>,
    pub graphs: &'a GraphManager,
    pub tx: &'a mut TransactionManager,
}

impl Context<'_> {
    fn schema(&self, graph: i64) -> Result<String> {
        self.graphs.schema_for(graph)
    }
}

/// Working copy of one resource: its types and the values read or written so far.
#[derive(Debug)]
struct ResourceBuffer {
    id: i64,
    graph: i64,
    types: Vec<ClassIdx>,
    /// The resource had no types when first touched, so nothing of it is stored.
    create: bool,
    fts_updated: bool,
    modified: bool,
    predicates: HashMap<PropertyIdx, Vec<Value>>,
}

pub struct DataUpdate {
    pub(crate) log: UpdateLog,
    buffers: HashMap<(i64, i64), ResourceBuffer>,
    current: Option<(i64, i64)>,
    pub(crate) resources: ResourceManager,
    /// Blank node labels of the running transaction.
    pub(crate) blank_labels: HashMap<String, i64>,
}

impl DataUpdate {
    pub fn new(log: UpdateLog, resources: ResourceManager) -> Self {
        DataUpdate {
            log,
            buffers: HashMap::new(),
            current: None,
            resources,
            blank_labels: HashMap::new(),
        }
    }

    pub fn statistics(&self) -> Statistics {
        self.log.statistics()
    }

    pub fn might_flush(&self) -> bool {
        self.log.might_flush()
    }

    /// Drops all queued work, for rollback.
    pub fn clear(&mut self) {
        self.log.clear();
        self.buffers.clear();
        self.current = None;
        self.resources.reset();
        self.blank_labels.clear();
    }

    pub(crate) fn insert_statement(
        &mut self,
        ctx: &mut Context<'_>,
        graph: i64,
        subject: i64,
        predicate: PropertyIdx,
        object: Value,
    ) -> Result<bool> {
        if needs_flush_for_inverse_functional(ctx.ontology, predicate) {
            self.flush(ctx)?;
        }
        self.with_buffer(ctx, graph, subject, |update, ctx, buf| {
            let changed = update.insert_value(ctx, buf, predicate, object, false)?;
            if changed {
                update.stamp_modified(ctx, buf)?;
            }
            Ok(changed)
        })
    }

    pub(crate) fn delete_statement(
        &mut self,
        ctx: &mut Context<'_>,
        graph: i64,
        subject: i64,
        predicate: PropertyIdx,
        object: Value,
    ) -> Result<bool> {
        self.with_buffer(ctx, graph, subject, |update, ctx, buf| {
            let changed = update.delete_value(ctx, buf, predicate, &object)?;
            if changed {
                update.stamp_modified(ctx, buf)?;
            }
            Ok(changed)
        })
    }

    /// Replaces the value of a single-valued property, or adds to a multi-valued one.
    /// `None` removes every value.
    pub(crate) fn update_statement(
        &mut self,
        ctx: &mut Context<'_>,
        graph: i64,
        subject: i64,
        predicate: PropertyIdx,
        object: Option<Value>,
    ) -> Result<bool> {
        if object.is_some() && needs_flush_for_inverse_functional(ctx.ontology, predicate) {
            self.flush(ctx)?;
        }
        self.with_buffer(ctx, graph, subject, |update, ctx, buf| {
            let changed = match object {
                Some(object) => update.insert_value(ctx, buf, predicate, object, true)?,
                None => update.clear_values(ctx, buf, predicate)?,
            };
            if changed {
                update.stamp_modified(ctx, buf)?;
            }
            Ok(changed)
        })
    }

    /// Removes every type, and with them every value, of a resource.
    pub(crate) fn delete_resource(&mut self, ctx: &mut Context<'_>, graph: i64, subject: i64) -> Result<bool> {
        let resource = ctx.ontology.resource_class()?;
        self.with_buffer(ctx, graph, subject, |update, ctx, buf| {
            update.delete_type(ctx, buf, resource)
        })
    }

    /// Writes queued entries and synchronizes the full-text index of touched resources.
    pub(crate) fn flush(&mut self, ctx: &mut Context<'_>) -> Result<()> {
        let result = self.flush_log(ctx);
        self.buffers.clear();
        self.current = None;
        self.resources.clear();
        result
    }

    fn flush_log(&mut self, ctx: &mut Context<'_>) -> Result<()> {
        let reindex: Vec<(i64, i64, bool)> = self
            .buffers
            .values()
            .filter(|buf| buf.fts_updated)
            .map(|buf| (buf.graph, buf.id, buf.create))
            .collect();
        for (graph, id, create) in &reindex {
            if !create {
                fts::delete_resource(ctx.conn, &ctx.schema(*graph)?, ctx.ontology, *id)?;
            }
        }
        let catalog = Catalog {
            current: ctx.ontology,
            previous: ctx.previous,
        };
        let graphs = ctx.graphs;
        self.log
            .flush(ctx.conn, &catalog, &|graph| graphs.schema_for(graph))?;
        for (graph, id, _) in &reindex {
            fts::insert_resource(ctx.conn, &ctx.schema(*graph)?, ctx.ontology, *id)?;
        }
        Ok(())
    }

    fn with_buffer<T>(
        &mut self,
        ctx: &mut Context<'_>,
        graph: i64,
        id: i64,
        f: impl FnOnce(&mut Self, &mut Context<'_>, &mut ResourceBuffer) -> Result<T>,
    ) -> Result<T> {
        let mut buf = self.take_buffer(ctx, graph, id)?;
        let result = f(self, ctx, &mut buf);
        self.buffers.insert((graph, id), buf);
        result
    }

    fn take_buffer(&mut self, ctx: &Context<'_>, graph: i64, id: i64) -> Result<ResourceBuffer> {
        if self.current != Some((graph, id)) {
            debug!("Switching to resource {} in graph {}", id, graph);
            self.current = Some((graph, id));
        }
        if let Some(buf) = self.buffers.remove(&(graph, id)) {
            return Ok(buf);
        }
        let types = if self.resources.is_new(id) {
            Vec::new()
        } else {
            load_types(ctx, graph, id)?
        };
        Ok(ResourceBuffer {
            id,
            graph,
            create: types.is_empty(),
            types,
            fts_updated: false,
            modified: false,
            predicates: HashMap::new(),
        })
    }

    /// Current values of `property`, read from the database on first use.
    fn values<'b>(
        &self,
        ctx: &Context<'_>,
        buf: &'b mut ResourceBuffer,
        property: PropertyIdx,
    ) -> Result<&'b mut Vec<Value>> {
        if !buf.predicates.contains_key(&property) {
            let values = if buf.create || self.resources.is_new(buf.id) {
                Vec::new()
            } else {
                load_values(ctx, buf.graph, buf.id, property)?
            };
            buf.predicates.insert(property, values);
        }
        Ok(buf.predicates.entry(property).or_default())
    }

    fn notify(
        &self,
        ctx: &mut Context<'_>,
        buf: &ResourceBuffer,
        kind: StatementKind,
        predicate: PropertyIdx,
        object: &Value,
        class: Option<ClassIdx>,
    ) {
        ctx.tx.mark_changed();
        if !ctx.tx.listeners.has_statement_listeners() {
            return;
        }
        let ontology = ctx.ontology;
        let graphs = ctx.graphs;
        let types: Vec<i64> = buf.types.iter().map(|c| ontology.class(*c).id()).collect();
        let class = class.unwrap_or_else(|| ontology.property(predicate).domain());
        let event = StatementEvent {
            kind,
            graph: graphs.name_for(buf.graph),
            subject: buf.id,
            predicate: ontology.property(predicate).id(),
            object,
            class: Some(ontology.class(class).id()),
            types: &types,
        };
        ctx.tx.listeners.statement(&event);
    }

    fn class_for_value(ontology: &Ontologies, value: &Value) -> Result<ClassIdx> {
        match value {
            Value::Resource(id) => ontology
                .class_by_id(*id)
                .ok_or_else(|| StoreError::UnknownClass(format!("resource {} is not a class", id))),
            other => Err(StoreError::constraint(format!(
                "rdf:type expects a class, got {}",
                other
            ))),
        }
    }

    /// Adds `class` and every missing super class, most general first.
    fn add_type(&mut self, ctx: &mut Context<'_>, buf: &mut ResourceBuffer, class: ClassIdx) -> Result<bool> {
        if buf.types.contains(&class) {
            return Ok(false);
        }
        let ontology = ctx.ontology;
        let rdf_type = ontology.rdf_type()?;
        let resource = ontology.resource_class()?;
        let added = ontology.find_property(crate::consts::ADDED.as_str())?;

        let mut classes: Vec<ClassIdx> = ontology.super_class_closure(class);
        classes.push(class);
        classes.retain(|c| !buf.types.contains(c));
        classes.sort_by_key(|c| ontology.depth(*c));

        for c in classes {
            let class_id = ontology.class(c).id();
            buf.types.push(c);
            self.log.class_insert(buf.graph, buf.id, class_id);
            let type_value = Value::Resource(class_id);
            self.log
                .multivalued_insert(buf.graph, buf.id, ontology.property(rdf_type).id(), type_value.clone());
            self.log.ref_change(buf.graph, class_id, 1);
            self.log.ref_change(buf.graph, buf.id, 1);
            if let Some(types) = buf.predicates.get_mut(&rdf_type) {
                types.push(type_value.clone());
            }

            if c == resource {
                // the row joins the full-text content view, indexed or not
                buf.fts_updated = true;
                let time = Value::DateTime(ctx.tx.active()?.resource_time);
                self.log.set_property(
                    buf.graph,
                    buf.id,
                    class_id,
                    ontology.property(added).id(),
                    Some(time.clone()),
                );
                buf.predicates.insert(added, vec![time]);
            }
            for property in ontology.class(c).domain_indexes() {
                let current = self.values(ctx, buf, *property)?.first().cloned();
                if let Some(value) = current {
                    self.log.set_property(
                        buf.graph,
                        buf.id,
                        class_id,
                        ontology.property(*property).id(),
                        Some(value),
                    );
                }
            }
            self.notify(ctx, buf, StatementKind::Insert, rdf_type, &type_value, Some(c));
        }
        Ok(true)
    }

    /// Writes a single-valued property on its domain table and every domain index.
    fn set_property(&mut self, ctx: &Context<'_>, buf: &ResourceBuffer, property: PropertyIdx, value: Option<Value>) {
        let ontology = ctx.ontology;
        let p = ontology.property(property);
        for class in p.domain_indexes() {
            if buf.types.contains(class) {
                self.log.set_property(
                    buf.graph,
                    buf.id,
                    ontology.class(*class).id(),
                    p.id(),
                    value.clone(),
                );
            }
        }
        self.log
            .set_property(buf.graph, buf.id, ontology.class(p.domain()).id(), p.id(), value);
    }

    fn check_inverse_functional(
        &self,
        ctx: &Context<'_>,
        buf: &ResourceBuffer,
        property: PropertyIdx,
        value: &Value,
    ) -> Result<()> {
        let ontology = ctx.ontology;
        let p = ontology.property(property);
        let sql = format!(
            "SELECT ID FROM {}.{} WHERE {} = ?1 AND ID != ?2 LIMIT 1",
            quote(&ctx.schema(buf.graph)?),
            quote(&ontology.property_table(property)),
            quote(p.name())
        );
        let other: Option<i64> = ctx
            .conn
            .prepare_cached(&sql)?
            .query_row(params![value, buf.id], |row| row.get(0))
            .optional()?;
        match other {
            Some(other) => Err(StoreError::constraint(format!(
                "inverse functional property {} already has value {} on resource {}",
                p.name(),
                value,
                other
            ))),
            None => Ok(()),
        }
    }

    fn insert_value(
        &mut self,
        ctx: &mut Context<'_>,
        buf: &mut ResourceBuffer,
        property: PropertyIdx,
        value: Value,
        replace: bool,
    ) -> Result<bool> {
        let ontology = ctx.ontology;
        if property == ontology.rdf_type()? {
            let class = Self::class_for_value(ontology, &value)?;
            return self.add_type(ctx, buf, class);
        }
        // nothing is queued unless the property and all its super properties accept the value
        let mut checked = Vec::new();
        self.check_insert(ctx, buf, property, &value, replace, &mut checked)?;
        self.apply_insert(ctx, buf, property, value)
    }

    /// Rejects a value the property, or one of its super properties, cannot take.
    fn check_insert(
        &self,
        ctx: &Context<'_>,
        buf: &mut ResourceBuffer,
        property: PropertyIdx,
        value: &Value,
        replace: bool,
        checked: &mut Vec<PropertyIdx>,
    ) -> Result<()> {
        if checked.contains(&property) {
            return Ok(());
        }
        checked.push(property);
        let ontology = ctx.ontology;
        let p = ontology.property(property);
        let domain = p.domain();
        let resource = ontology.resource_class()?;
        if !buf.types.contains(&domain) && !(buf.types.is_empty() && domain == resource) {
            return Err(StoreError::constraint(format!(
                "subject {} is not in domain {} of property {}",
                buf.id,
                ontology.class(domain).name(),
                p.name()
            )));
        }
        if p.inverse_functional() {
            self.check_inverse_functional(ctx, buf, property, value)?;
        }
        if !p.multiple_values() && !replace {
            if let Some(old) = self.values(ctx, buf, property)?.first() {
                if old != value {
                    return Err(StoreError::constraint(format!(
                        "unable to insert multiple values on single valued property {}",
                        p.name()
                    )));
                }
            }
        }
        for super_property in p.super_properties() {
            self.check_insert(ctx, buf, *super_property, value, replace, checked)?;
        }
        Ok(())
    }

    fn apply_insert(
        &mut self,
        ctx: &mut Context<'_>,
        buf: &mut ResourceBuffer,
        property: PropertyIdx,
        value: Value,
    ) -> Result<bool> {
        let ontology = ctx.ontology;
        let p = ontology.property(property);
        if !buf.types.contains(&p.domain()) {
            let resource = ontology.resource_class()?;
            self.add_type(ctx, buf, resource)?;
        }

        let current = self.values(ctx, buf, property)?.clone();
        if p.multiple_values() {
            if current.contains(&value) {
                return Ok(false);
            }
            self.log
                .multivalued_insert(buf.graph, buf.id, p.id(), value.clone());
            self.values(ctx, buf, property)?.push(value.clone());
        } else {
            if let Some(old) = current.first() {
                if *old == value {
                    return Ok(false);
                }
                if let Some(old_id) = old.as_resource() {
                    self.log.ref_change(buf.graph, old_id, -1);
                }
                self.notify(ctx, buf, StatementKind::Delete, property, old, None);
            }
            self.set_property(ctx, buf, property, Some(value.clone()));
            *self.values(ctx, buf, property)? = vec![value.clone()];
        }
        if let Some(id) = value.as_resource() {
            self.log.ref_change(buf.graph, id, 1);
        }
        if p.fulltext_indexed() {
            buf.fts_updated = true;
        }
        self.notify(ctx, buf, StatementKind::Insert, property, &value, None);

        for super_property in p.super_properties() {
            self.apply_insert(ctx, buf, *super_property, value.clone())?;
        }
        Ok(true)
    }

    fn delete_value(
        &mut self,
        ctx: &mut Context<'_>,
        buf: &mut ResourceBuffer,
        property: PropertyIdx,
        value: &Value,
    ) -> Result<bool> {
        let ontology = ctx.ontology;
        if property == ontology.rdf_type()? {
            let class = Self::class_for_value(ontology, value)?;
            return self.delete_type(ctx, buf, class);
        }
        let p = ontology.property(property);
        if !buf.types.contains(&p.domain()) {
            return Ok(false);
        }
        let values = self.values(ctx, buf, property)?;
        let Some(position) = values.iter().position(|v| v == value) else {
            return Ok(false);
        };
        values.remove(position);

        if p.multiple_values() {
            self.log
                .multivalued_delete(buf.graph, buf.id, p.id(), value.clone());
        } else {
            self.set_property(ctx, buf, property, None);
        }
        if let Some(id) = value.as_resource() {
            self.log.ref_change(buf.graph, id, -1);
        }
        if p.fulltext_indexed() {
            buf.fts_updated = true;
        }
        self.notify(ctx, buf, StatementKind::Delete, property, value, None);

        for super_property in p.super_properties() {
            self.delete_value(ctx, buf, *super_property, value)?;
        }
        Ok(true)
    }

    fn clear_values(
        &mut self,
        ctx: &mut Context<'_>,
        buf: &mut ResourceBuffer,
        property: PropertyIdx,
    ) -> Result<bool> {
        let ontology = ctx.ontology;
        let p = ontology.property(property);
        if property == ontology.rdf_type()? {
            let resource = ontology.resource_class()?;
            return self.delete_type(ctx, buf, resource);
        }
        if !buf.types.contains(&p.domain()) {
            return Ok(false);
        }
        let values = self.values(ctx, buf, property)?.clone();
        if values.is_empty() {
            return Ok(false);
        }
        if !p.multiple_values() {
            return self.delete_value(ctx, buf, property, &values[0]);
        }

        if p.data_type().is_resource() {
            self.log
                .ref_dec_for_multivalued_property(buf.graph, buf.id, p.id());
        }
        self.log.multivalued_clear(buf.graph, buf.id, p.id());
        self.values(ctx, buf, property)?.clear();
        if p.fulltext_indexed() {
            buf.fts_updated = true;
        }
        for value in &values {
            self.notify(ctx, buf, StatementKind::Delete, property, value, None);
            for super_property in p.super_properties() {
                self.delete_value(ctx, buf, *super_property, value)?;
            }
        }
        Ok(true)
    }

    /// Removes `class` and every subclass the resource has, most specific first,
    /// releasing the values stored for them.
    fn delete_type(&mut self, ctx: &mut Context<'_>, buf: &mut ResourceBuffer, class: ClassIdx) -> Result<bool> {
        if !buf.types.contains(&class) {
            return Ok(false);
        }
        let ontology = ctx.ontology;
        let rdf_type = ontology.rdf_type()?;
        let resource = ontology.resource_class()?;

        let mut removed: Vec<ClassIdx> = buf
            .types
            .iter()
            .copied()
            .filter(|t| ontology.is_subclass_of(*t, class))
            .collect();
        removed.sort_by_key(|c| std::cmp::Reverse(ontology.depth(*c)));

        for c in removed {
            let class_id = ontology.class(c).id();
            let properties: Vec<PropertyIdx> = ontology
                .properties_with_domain(c)
                .filter(|p| *p != rdf_type)
                .collect();
            for property in properties {
                self.release_values(ctx, buf, c, property)?;
            }

            let type_value = Value::Resource(class_id);
            self.log.multivalued_delete(
                buf.graph,
                buf.id,
                ontology.property(rdf_type).id(),
                type_value.clone(),
            );
            self.log.ref_change(buf.graph, class_id, -1);
            self.log.class_delete(buf.graph, buf.id, class_id);
            self.log.ref_change(buf.graph, buf.id, -1);

            buf.types.retain(|t| *t != c);
            if let Some(types) = buf.predicates.get_mut(&rdf_type) {
                types.retain(|v| *v != type_value);
            }
            if c == resource {
                buf.modified = false;
                buf.fts_updated = true;
            }
            self.notify(ctx, buf, StatementKind::Delete, rdf_type, &type_value, Some(c));
        }
        Ok(true)
    }

    /// Drops the values of `property` held by a class being removed. Values already
    /// known are released one by one; otherwise the refcounts are derived from the
    /// stored rows when the log is flushed.
    fn release_values(
        &mut self,
        ctx: &mut Context<'_>,
        buf: &mut ResourceBuffer,
        class: ClassIdx,
        property: PropertyIdx,
    ) -> Result<()> {
        let ontology = ctx.ontology;
        let p = ontology.property(property);
        let known = buf.create
            || self.resources.is_new(buf.id)
            || buf.predicates.contains_key(&property)
            || !p.super_properties().is_empty();
        if p.fulltext_indexed() {
            buf.fts_updated = true;
        }

        if known {
            let values = self.values(ctx, buf, property)?.clone();
            for value in &values {
                if let Some(id) = value.as_resource() {
                    self.log.ref_change(buf.graph, id, -1);
                }
                self.notify(ctx, buf, StatementKind::Delete, property, value, None);
                for super_property in p.super_properties() {
                    self.delete_value(ctx, buf, *super_property, value)?;
                }
            }
            if p.multiple_values() && !values.is_empty() {
                self.log.multivalued_clear(buf.graph, buf.id, p.id());
            }
        } else if p.multiple_values() {
            if p.data_type().is_resource() {
                self.log
                    .ref_dec_for_multivalued_property(buf.graph, buf.id, p.id());
            }
            self.log.multivalued_clear(buf.graph, buf.id, p.id());
        } else if p.data_type().is_resource() {
            self.log
                .ref_dec_for_property(buf.graph, buf.id, ontology.class(class).id(), p.id());
        }
        buf.predicates.remove(&property);
        Ok(())
    }

    /// Stamps `nrl:modified` with the transaction's sequence number, once per resource.
    fn stamp_modified(&mut self, ctx: &mut Context<'_>, buf: &mut ResourceBuffer) -> Result<()> {
        let active = *ctx.tx.active()?;
        if active.kind.is_ontology() || buf.modified {
            return Ok(());
        }
        let ontology = ctx.ontology;
        let resource = ontology.resource_class()?;
        if !buf.types.contains(&resource) {
            return Ok(());
        }
        let modified = ontology.find_property(crate::consts::MODIFIED.as_str())?;
        let value = Value::Integer(active.modseq);
        self.set_property(ctx, buf, modified, Some(value.clone()));
        buf.predicates.insert(modified, vec![value]);
        buf.modified = true;
        Ok(())
    }
}

fn needs_flush_for_inverse_functional(ontology: &Ontologies, property: PropertyIdx) -> bool {
    ontology.property(property).inverse_functional()
        || ontology
            .super_property_closure(property)
            .into_iter()
            .any(|p| ontology.property(p).inverse_functional())
}

fn load_types(ctx: &Context<'_>, graph: i64, id: i64) -> Result<Vec<ClassIdx>> {
    reader::load_types(ctx.conn, ctx.ontology, &ctx.schema(graph)?, id)
}

fn load_values(ctx: &Context<'_>, graph: i64, id: i64, property: PropertyIdx) -> Result<Vec<Value>> {
    reader::load_values(ctx.conn, ctx.ontology, &ctx.schema(graph)?, id, property)
}
