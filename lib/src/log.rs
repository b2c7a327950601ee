//! The update log: a transaction's mutations queued as typed entries, coalesced where
//! the relational effect allows it, and flushed in arrival order as prepared statements.
//!
//! Single-valued property writes to one resource and class share one entry whose values
//! form a singly linked list threaded through `properties`, so a flush issues one
//! multi-column `INSERT` or `UPDATE` per resource and class. Plain refcount deltas for
//! the same id accumulate into one entry. The SQL text of every entry is cached by shape
//! in an LRU and executed through SQLite's prepared statement cache.

use crate::consts::{LOCALE_COLLATION, TIME_SORT_FUNCTION};
use crate::errors::{Result, StoreError};
use crate::ontology::{Class, Ontologies, Property, PropertyIdx};
use crate::util::quote;
use crate::value::{PropertyType, Value};
use log::debug;
use lru::LruCache;
use rusqlite::{Connection, ToSql};
use std::collections::HashMap;
use std::num::NonZeroUsize;

/// Entries per chunk; a full chunk makes [`UpdateLog::might_flush`] true.
pub const CHUNK_SIZE: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    ClassInsert { class_id: i64, last: Option<usize> },
    ClassUpdate { class_id: i64, last: Option<usize> },
    ClassDelete { class_id: i64 },
    MultivaluedInsert { property_id: i64, value: Value },
    MultivaluedDelete { property_id: i64, value: Value },
    MultivaluedClear { property_id: i64 },
    RefInc(i64),
    RefDec(i64),
    /// Drops the reference held by the current value of a single-valued property.
    RefDecForProperty { property_id: i64 },
    /// Drops the references held by every value of a multi-valued property.
    RefDecForMultivaluedProperty { property_id: i64 },
    /// Adds `delta` per stored value of a property across the whole table.
    RefChangeForPropertyClear { property_id: i64, delta: i64 },
    RefChangeForMultivaluedPropertyClear { property_id: i64, delta: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Graph id, 0 for the default graph.
    pub graph: i64,
    pub id: i64,
    pub op: Op,
}

#[derive(Debug, Clone, PartialEq)]
struct PropertyValue {
    property_id: i64,
    value: Option<Value>,
    prev: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum PlanKind {
    ClassInsert,
    ClassUpdate,
    ClassDelete,
    MultivaluedInsert,
    MultivaluedDelete,
    MultivaluedClear,
    RefInc,
    RefDec,
    RefDecForProperty,
    RefDecForMultivaluedProperty,
    RefIncForPropertyClear,
    RefDecForPropertyClear,
}

/// Structural shape of an entry: equal keys produce identical SQL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PlanKey {
    kind: PlanKind,
    graph: i64,
    table: i64,
    properties: Vec<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    pub flushes: u64,
    pub statements: u64,
    pub plan_hits: u64,
    pub plan_misses: u64,
}

/// Resolves class and property ids to names, trying the live ontology first and the
/// snapshot being migrated away from second.
#[derive(Clone, Copy)]
pub struct Catalog<'a> {
    pub current: &'a Ontologies,
    pub previous: Option<&'a Ontologies>,
}

impl<'a> Catalog<'a> {
    pub fn new(current: &'a Ontologies) -> Self {
        Catalog {
            current,
            previous: None,
        }
    }

    fn snapshots(&self) -> impl Iterator<Item = &'a Ontologies> {
        std::iter::once(self.current).chain(self.previous)
    }

    fn class(&self, id: i64) -> Result<&'a Class> {
        self.snapshots()
            .find_map(|ont| ont.class_by_id(id).map(|idx| ont.class(idx)))
            .ok_or_else(|| StoreError::UnknownClass(format!("class id {}", id)))
    }

    fn property(&self, id: i64) -> Result<(&'a Ontologies, PropertyIdx)> {
        self.snapshots()
            .find_map(|ont| ont.property_by_id(id).map(|idx| (ont, idx)))
            .ok_or_else(|| StoreError::UnknownProperty(format!("property id {}", id)))
    }

    fn property_info(&self, id: i64) -> Result<(&'a Property, String)> {
        let (ont, idx) = self.property(id)?;
        Ok((ont.property(idx), ont.property_table(idx)))
    }
}

pub struct UpdateLog {
    chunks: Vec<Vec<LogEntry>>,
    properties: Vec<PropertyValue>,
    class_entries: HashMap<(i64, i64, i64), (usize, usize)>,
    ref_entries: HashMap<(i64, i64), (usize, usize)>,
    plans: LruCache<PlanKey, String>,
    stats: Statistics,
}

impl UpdateLog {
    pub fn new(plan_cache_size: usize) -> Self {
        let capacity = NonZeroUsize::new(plan_cache_size).unwrap_or(NonZeroUsize::MIN);
        UpdateLog {
            chunks: Vec::new(),
            properties: Vec::new(),
            class_entries: HashMap::new(),
            ref_entries: HashMap::new(),
            plans: LruCache::new(capacity),
            stats: Statistics::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.iter().all(Vec::is_empty)
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.chunks.iter().flatten()
    }

    /// True once the current chunk is full.
    pub fn might_flush(&self) -> bool {
        self.chunks.last().map_or(false, |chunk| chunk.len() >= CHUNK_SIZE)
    }

    pub fn statistics(&self) -> Statistics {
        self.stats
    }

    /// Forgets compiled plans; names may change with the ontology.
    pub fn clear_plans(&mut self) {
        self.plans.clear();
    }

    /// Drops every queued entry without executing it.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.properties.clear();
        self.class_entries.clear();
        self.ref_entries.clear();
    }

    fn push(&mut self, entry: LogEntry) -> (usize, usize) {
        if self.chunks.last().map_or(true, |chunk| chunk.len() >= CHUNK_SIZE) {
            self.chunks.push(Vec::with_capacity(CHUNK_SIZE));
        }
        let chunk = self.chunks.len() - 1;
        self.chunks[chunk].push(entry);
        (chunk, self.chunks[chunk].len() - 1)
    }

    fn entry_mut(&mut self, at: (usize, usize)) -> &mut LogEntry {
        &mut self.chunks[at.0][at.1]
    }

    pub fn class_insert(&mut self, graph: i64, id: i64, class_id: i64) {
        let at = self.push(LogEntry {
            graph,
            id,
            op: Op::ClassInsert { class_id, last: None },
        });
        self.class_entries.insert((graph, id, class_id), at);
    }

    pub fn class_delete(&mut self, graph: i64, id: i64, class_id: i64) {
        self.class_entries.remove(&(graph, id, class_id));
        self.push(LogEntry {
            graph,
            id,
            op: Op::ClassDelete { class_id },
        });
    }

    /// Queues a single-valued column write on the row of `class_id`. Writes to the same
    /// property of an open entry replace the queued value.
    pub fn set_property(
        &mut self,
        graph: i64,
        id: i64,
        class_id: i64,
        property_id: i64,
        value: Option<Value>,
    ) {
        let at = match self.class_entries.get(&(graph, id, class_id)) {
            Some(at) => *at,
            None => {
                let at = self.push(LogEntry {
                    graph,
                    id,
                    op: Op::ClassUpdate { class_id, last: None },
                });
                self.class_entries.insert((graph, id, class_id), at);
                at
            }
        };
        let last = match &self.chunks[at.0][at.1].op {
            Op::ClassInsert { last, .. } | Op::ClassUpdate { last, .. } => *last,
            _ => None,
        };
        let mut cursor = last;
        while let Some(i) = cursor {
            if self.properties[i].property_id == property_id {
                // the column is written once per entry, so only the last value matters
                self.properties[i].value = value;
                return;
            }
            cursor = self.properties[i].prev;
        }
        self.properties.push(PropertyValue {
            property_id,
            value,
            prev: last,
        });
        let new_last = Some(self.properties.len() - 1);
        match &mut self.entry_mut(at).op {
            Op::ClassInsert { last, .. } | Op::ClassUpdate { last, .. } => *last = new_last,
            _ => {}
        }
    }

    pub fn multivalued_insert(&mut self, graph: i64, id: i64, property_id: i64, value: Value) {
        self.push(LogEntry {
            graph,
            id,
            op: Op::MultivaluedInsert { property_id, value },
        });
    }

    pub fn multivalued_delete(&mut self, graph: i64, id: i64, property_id: i64, value: Value) {
        self.push(LogEntry {
            graph,
            id,
            op: Op::MultivaluedDelete { property_id, value },
        });
    }

    pub fn multivalued_clear(&mut self, graph: i64, id: i64, property_id: i64) {
        self.push(LogEntry {
            graph,
            id,
            op: Op::MultivaluedClear { property_id },
        });
    }

    /// Adds `delta` to the refcount of `id`, merged with earlier deltas for the same id.
    pub fn ref_change(&mut self, graph: i64, id: i64, delta: i64) {
        if delta == 0 {
            return;
        }
        if let Some(at) = self.ref_entries.get(&(graph, id)).copied() {
            let entry = self.entry_mut(at);
            let total = match entry.op {
                Op::RefInc(n) => n + delta,
                Op::RefDec(n) => delta - n,
                _ => delta,
            };
            entry.op = if total >= 0 {
                Op::RefInc(total)
            } else {
                Op::RefDec(-total)
            };
            return;
        }
        let op = if delta > 0 {
            Op::RefInc(delta)
        } else {
            Op::RefDec(-delta)
        };
        let at = self.push(LogEntry { graph, id, op });
        self.ref_entries.insert((graph, id), at);
    }

    // Entries computed from table contents observe everything queued before them, so
    // nothing queued later may be merged into an earlier entry.
    fn push_barrier(&mut self, entry: LogEntry, closes_class: Option<i64>) {
        self.ref_entries.clear();
        if let Some(class_id) = closes_class {
            self.class_entries.remove(&(entry.graph, entry.id, class_id));
        }
        self.push(entry);
    }

    pub fn ref_dec_for_property(&mut self, graph: i64, id: i64, class_id: i64, property_id: i64) {
        self.push_barrier(
            LogEntry {
                graph,
                id,
                op: Op::RefDecForProperty { property_id },
            },
            Some(class_id),
        );
    }

    pub fn ref_dec_for_multivalued_property(&mut self, graph: i64, id: i64, property_id: i64) {
        self.push_barrier(
            LogEntry {
                graph,
                id,
                op: Op::RefDecForMultivaluedProperty { property_id },
            },
            None,
        );
    }

    pub fn ref_change_for_property_clear(&mut self, graph: i64, property_id: i64, delta: i64) {
        self.class_entries.clear();
        self.push_barrier(
            LogEntry {
                graph,
                id: 0,
                op: Op::RefChangeForPropertyClear { property_id, delta },
            },
            None,
        );
    }

    pub fn ref_change_for_multivalued_property_clear(
        &mut self,
        graph: i64,
        property_id: i64,
        delta: i64,
    ) {
        self.push_barrier(
            LogEntry {
                graph,
                id: 0,
                op: Op::RefChangeForMultivaluedPropertyClear { property_id, delta },
            },
            None,
        );
    }

    /// Property ids and values of a class entry, in the order they were first written.
    fn class_values(&self, last: Option<usize>) -> Vec<&PropertyValue> {
        let mut values = Vec::new();
        let mut cursor = last;
        while let Some(i) = cursor {
            values.push(&self.properties[i]);
            cursor = self.properties[i].prev;
        }
        values.reverse();
        values
    }

    /// Executes every queued entry in arrival order and empties the log. Any failure
    /// aborts the flush; the caller must roll the transaction back.
    pub fn flush(
        &mut self,
        conn: &Connection,
        catalog: &Catalog<'_>,
        schema_for: &dyn Fn(i64) -> Result<String>,
    ) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let result = self.execute_all(conn, catalog, schema_for);
        self.clear();
        result
    }

    fn execute_all(
        &mut self,
        conn: &Connection,
        catalog: &Catalog<'_>,
        schema_for: &dyn Fn(i64) -> Result<String>,
    ) -> Result<()> {
        let chunks = std::mem::take(&mut self.chunks);
        let mut executed = 0;
        for entry in chunks.iter().flatten() {
            if self.execute(conn, catalog, schema_for, entry)? {
                executed += 1;
            }
        }
        self.stats.flushes += 1;
        self.stats.statements += executed;
        debug!(
            "Flushed {} log entries as {} statements",
            chunks.iter().map(Vec::len).sum::<usize>(),
            executed
        );
        Ok(())
    }

    fn plan(
        &mut self,
        key: PlanKey,
        compile: impl FnOnce() -> Result<String>,
    ) -> Result<String> {
        if let Some(sql) = self.plans.get(&key) {
            self.stats.plan_hits += 1;
            return Ok(sql.clone());
        }
        self.stats.plan_misses += 1;
        let sql = compile()?;
        debug!("Compiled plan {:?}: {}", key.kind, sql);
        self.plans.put(key, sql.clone());
        Ok(sql)
    }

    fn execute(
        &mut self,
        conn: &Connection,
        catalog: &Catalog<'_>,
        schema_for: &dyn Fn(i64) -> Result<String>,
        entry: &LogEntry,
    ) -> Result<bool> {
        let graph = entry.graph;
        let key = |kind, table, properties| PlanKey {
            kind,
            graph,
            table,
            properties,
        };
        let schema = || schema_for(graph).map(|s| quote(&s));

        match &entry.op {
            Op::ClassInsert { class_id, last } | Op::ClassUpdate { class_id, last } => {
                let insert = matches!(entry.op, Op::ClassInsert { .. });
                let values: Vec<(i64, Option<Value>)> = self
                    .class_values(*last)
                    .into_iter()
                    .map(|v| (v.property_id, v.value.clone()))
                    .collect();
                if !insert && values.is_empty() {
                    return Ok(false);
                }
                let ids: Vec<i64> = values.iter().map(|(p, _)| *p).collect();
                let kind = if insert {
                    PlanKind::ClassInsert
                } else {
                    PlanKind::ClassUpdate
                };
                let sql = self.plan(key(kind, *class_id, ids.clone()), || {
                    let table = format!("{}.{}", schema()?, quote(catalog.class(*class_id)?.name()));
                    let mut columns = Vec::with_capacity(ids.len());
                    for id in &ids {
                        let (property, _) = catalog.property_info(*id)?;
                        columns.push(quote(property.name()));
                    }
                    Ok(if insert {
                        let mut names = vec!["ID".to_string()];
                        names.extend(columns);
                        let marks = vec!["?"; names.len()].join(", ");
                        format!("INSERT INTO {} ({}) VALUES ({})", table, names.join(", "), marks)
                    } else {
                        let sets: Vec<String> =
                            columns.iter().map(|c| format!("{} = ?", c)).collect();
                        format!("UPDATE {} SET {} WHERE ID = ?", table, sets.join(", "))
                    })
                })?;
                let mut params: Vec<&dyn ToSql> = Vec::with_capacity(values.len() + 1);
                if insert {
                    params.push(&entry.id);
                }
                for (_, value) in &values {
                    params.push(value);
                }
                if !insert {
                    params.push(&entry.id);
                }
                conn.prepare_cached(&sql)?.execute(params.as_slice())?;
            }
            Op::ClassDelete { class_id } => {
                let sql = self.plan(key(PlanKind::ClassDelete, *class_id, Vec::new()), || {
                    Ok(format!(
                        "DELETE FROM {}.{} WHERE ID = ?1",
                        schema()?,
                        quote(catalog.class(*class_id)?.name())
                    ))
                })?;
                conn.prepare_cached(&sql)?.execute([entry.id])?;
            }
            Op::MultivaluedInsert { property_id, value } => {
                let sql = self.plan(key(PlanKind::MultivaluedInsert, *property_id, Vec::new()), || {
                    let (property, table) = catalog.property_info(*property_id)?;
                    Ok(format!(
                        "INSERT OR IGNORE INTO {}.{} (ID, {}) VALUES (?1, ?2)",
                        schema()?,
                        quote(&table),
                        quote(property.name())
                    ))
                })?;
                conn.prepare_cached(&sql)?
                    .execute(rusqlite::params![entry.id, value])?;
            }
            Op::MultivaluedDelete { property_id, value } => {
                let sql = self.plan(key(PlanKind::MultivaluedDelete, *property_id, Vec::new()), || {
                    let (property, table) = catalog.property_info(*property_id)?;
                    let column = quote(property.name());
                    let condition = match property.data_type() {
                        PropertyType::DateTime => format!(
                            "{f}({c}) = {f}(?2)",
                            f = TIME_SORT_FUNCTION,
                            c = column
                        ),
                        _ => format!("{} = ?2", column),
                    };
                    Ok(format!(
                        "DELETE FROM {}.{} WHERE ID = ?1 AND {}",
                        schema()?,
                        quote(&table),
                        condition
                    ))
                })?;
                conn.prepare_cached(&sql)?
                    .execute(rusqlite::params![entry.id, value])?;
            }
            Op::MultivaluedClear { property_id } => {
                let sql = self.plan(key(PlanKind::MultivaluedClear, *property_id, Vec::new()), || {
                    let (_, table) = catalog.property_info(*property_id)?;
                    Ok(format!("DELETE FROM {}.{} WHERE ID = ?1", schema()?, quote(&table)))
                })?;
                conn.prepare_cached(&sql)?.execute([entry.id])?;
            }
            Op::RefInc(0) | Op::RefDec(0) => return Ok(false),
            Op::RefInc(n) => {
                let sql = self.plan(key(PlanKind::RefInc, 0, Vec::new()), || {
                    Ok(format!(
                        "INSERT INTO {}.Refcount (ID, Refcount) VALUES (?1, ?2) \
                         ON CONFLICT(ID) DO UPDATE SET Refcount = Refcount + excluded.Refcount",
                        schema()?
                    ))
                })?;
                conn.prepare_cached(&sql)?.execute([entry.id, *n])?;
            }
            Op::RefDec(n) => {
                let sql = self.plan(key(PlanKind::RefDec, 0, Vec::new()), || {
                    Ok(format!(
                        "UPDATE {}.Refcount SET Refcount = Refcount - ?2 WHERE ID = ?1",
                        schema()?
                    ))
                })?;
                conn.prepare_cached(&sql)?.execute([entry.id, *n])?;
            }
            Op::RefDecForProperty { property_id } => {
                let sql = self.plan(key(PlanKind::RefDecForProperty, *property_id, Vec::new()), || {
                    let (property, table) = catalog.property_info(*property_id)?;
                    let schema = schema()?;
                    Ok(format!(
                        "UPDATE {s}.Refcount SET Refcount = Refcount - 1 \
                         WHERE ID = (SELECT {c} FROM {s}.{t} WHERE ID = ?1)",
                        s = schema,
                        c = quote(property.name()),
                        t = quote(&table)
                    ))
                })?;
                conn.prepare_cached(&sql)?.execute([entry.id])?;
            }
            Op::RefDecForMultivaluedProperty { property_id } => {
                let sql = self.plan(
                    key(PlanKind::RefDecForMultivaluedProperty, *property_id, Vec::new()),
                    || {
                        let (property, table) = catalog.property_info(*property_id)?;
                        let schema = schema()?;
                        Ok(format!(
                            "UPDATE {s}.Refcount SET Refcount = Refcount - 1 \
                             WHERE ID IN (SELECT {c} FROM {s}.{t} WHERE ID = ?1)",
                            s = schema,
                            c = quote(property.name()),
                            t = quote(&table)
                        ))
                    },
                )?;
                conn.prepare_cached(&sql)?.execute([entry.id])?;
            }
            Op::RefChangeForPropertyClear { property_id, delta }
            | Op::RefChangeForMultivaluedPropertyClear { property_id, delta } => {
                if *delta == 0 {
                    return Ok(false);
                }
                let kind = if *delta > 0 {
                    PlanKind::RefIncForPropertyClear
                } else {
                    PlanKind::RefDecForPropertyClear
                };
                let sql = self.plan(key(kind, *property_id, Vec::new()), || {
                    let (property, table) = catalog.property_info(*property_id)?;
                    let schema = schema()?;
                    let column = quote(property.name());
                    let table = quote(&table);
                    Ok(if kind == PlanKind::RefIncForPropertyClear {
                        format!(
                            "INSERT INTO {s}.Refcount (ID, Refcount) \
                             SELECT {c}, COUNT(*) * ?1 FROM {s}.{t} WHERE {c} IS NOT NULL GROUP BY {c} \
                             ON CONFLICT(ID) DO UPDATE SET Refcount = Refcount + excluded.Refcount",
                            s = schema,
                            c = column,
                            t = table
                        )
                    } else {
                        format!(
                            "UPDATE {s}.Refcount SET Refcount = Refcount + ?1 * \
                             (SELECT COUNT(*) FROM {s}.{t} v WHERE v.{c} = Refcount.ID) \
                             WHERE ID IN (SELECT {c} FROM {s}.{t})",
                            s = schema,
                            c = column,
                            t = table
                        )
                    })
                })?;
                conn.prepare_cached(&sql)?.execute([*delta])?;
            }
        }
        Ok(true)
    }
}

/// SQL column definition of a property, with the locale collation on text columns.
pub fn column_definition(property: &Property) -> String {
    let ty = property.data_type();
    if ty.is_text() {
        format!(
            "{} {} COLLATE {}",
            quote(property.name()),
            ty.sql_type(),
            LOCALE_COLLATION
        )
    } else {
        format!("{} {}", quote(property.name()), ty.sql_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_valued_writes_share_one_entry() {
        let mut log = UpdateLog::new(8);
        log.class_insert(0, 10, 1);
        log.set_property(0, 10, 1, 100, Some(Value::Integer(30)));
        log.set_property(0, 10, 1, 101, Some(Value::String("Bob".into())));
        log.set_property(0, 10, 1, 100, Some(Value::Integer(31)));
        assert_eq!(log.len(), 1);
        let Op::ClassInsert { last, .. } = &log.entries().next().unwrap().op else {
            panic!("expected a class insert");
        };
        let values = log.class_values(*last);
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].property_id, 100);
        assert_eq!(values[0].value, Some(Value::Integer(31)));
        assert_eq!(values[1].property_id, 101);
    }

    #[test]
    fn deletes_close_the_open_entry() {
        let mut log = UpdateLog::new(8);
        log.set_property(0, 10, 1, 100, Some(Value::Integer(1)));
        log.class_delete(0, 10, 1);
        log.class_insert(0, 10, 1);
        log.set_property(0, 10, 1, 100, Some(Value::Integer(2)));
        let ops: Vec<&Op> = log.entries().map(|e| &e.op).collect();
        assert_eq!(ops.len(), 3);
        assert!(matches!(ops[0], Op::ClassUpdate { .. }));
        assert!(matches!(ops[1], Op::ClassDelete { .. }));
        assert!(matches!(ops[2], Op::ClassInsert { last: Some(_), .. }));
    }

    #[test]
    fn refcount_deltas_coalesce_and_flip() {
        let mut log = UpdateLog::new(8);
        log.ref_change(0, 5, 1);
        log.ref_change(0, 5, 1);
        log.ref_change(0, 6, -1);
        log.ref_change(0, 5, -3);
        let ops: Vec<&Op> = log.entries().map(|e| &e.op).collect();
        assert_eq!(ops, vec![&Op::RefDec(1), &Op::RefDec(1)]);
        log.ref_change(0, 5, 1);
        assert_eq!(log.entries().next().unwrap().op, Op::RefInc(0));
    }

    #[test]
    fn query_based_entries_stop_coalescing() {
        let mut log = UpdateLog::new(8);
        log.ref_change(0, 5, 1);
        log.ref_dec_for_multivalued_property(0, 7, 200);
        log.ref_change(0, 5, 1);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn chunks_fill_up() {
        let mut log = UpdateLog::new(8);
        for id in 0..CHUNK_SIZE as i64 {
            assert!(!log.might_flush());
            log.multivalued_clear(0, id, 1);
        }
        assert!(log.might_flush());
        log.multivalued_clear(0, 1000, 1);
        assert!(!log.might_flush());
        assert_eq!(log.len(), CHUNK_SIZE + 1);
    }
}
