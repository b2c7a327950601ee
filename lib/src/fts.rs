//! Full-text search over fulltext-indexed properties: an FTS5 table whose external
//! content is a per-database view joining every such property onto `rdfs:Resource`.

use crate::errors::Result;
use crate::ontology::Ontologies;
use crate::util::{fts_column, quote};
use crate::value::PropertyType;
use log::debug;
use rusqlite::{params, Connection, ErrorCode};

const VIEW: &str = "fts_view";
const TABLE: &str = "fts5";

fn columns(ontology: &Ontologies) -> Vec<String> {
    ontology
        .fulltext_properties()
        .into_iter()
        .map(|p| fts_column(ontology.property(p).name()))
        .collect()
}

/// Builds the view, the FTS5 table and its ranking from scratch, then indexes existing rows.
pub fn create(conn: &Connection, schema: &str, ontology: &Ontologies) -> Result<()> {
    let properties = ontology.fulltext_properties();
    if properties.is_empty() {
        return Ok(());
    }
    let resource = quote(ontology.class(ontology.resource_class()?).name());
    let mut selects = vec![format!("{}.ID AS ID", resource)];
    let mut weights = Vec::with_capacity(properties.len());
    for idx in &properties {
        let property = ontology.property(*idx);
        let column = quote(property.name());
        let value = match property.data_type() {
            PropertyType::LangString => format!("CAST({} AS TEXT)", column),
            _ => column.clone(),
        };
        let table = quote(&ontology.property_table(*idx));
        let alias = fts_column(property.name());
        // tables inside a view resolve against the view's own database
        let select = if property.multiple_values() {
            format!(
                "(SELECT group_concat({}, ' ') FROM {} WHERE ID = {}.ID) AS {}",
                value, table, resource, alias
            )
        } else {
            format!(
                "(SELECT {} FROM {} WHERE ID = {}.ID) AS {}",
                value, table, resource, alias
            )
        };
        selects.push(select);
        weights.push(property.weight().to_string());
    }
    let schema_q = quote(schema);
    let columns = columns(ontology);
    conn.execute_batch(&format!(
        "CREATE VIEW {s}.{view} AS SELECT {selects} FROM {resource};
         CREATE VIRTUAL TABLE {s}.{table} USING fts5(content='{view_name}', content_rowid='ID', {columns}, tokenize='unicode61 remove_diacritics 2');
         INSERT INTO {s}.{table} ({table}, rank) VALUES ('rank', 'bm25({weights})');
         INSERT INTO {s}.{table} ({table}) VALUES ('rebuild');",
        s = schema_q,
        view = quote(VIEW),
        view_name = VIEW,
        selects = selects.join(", "),
        resource = resource,
        table = quote(TABLE),
        columns = columns.join(", "),
        weights = weights.join(", "),
    ))?;
    debug!("Created full-text index with {} columns in {}", properties.len(), schema);
    Ok(())
}

pub fn drop(conn: &Connection, schema: &str) -> Result<()> {
    let schema = quote(schema);
    conn.execute_batch(&format!(
        "DROP TABLE IF EXISTS {s}.{table}; DROP VIEW IF EXISTS {s}.{view};",
        s = schema,
        table = quote(TABLE),
        view = quote(VIEW)
    ))?;
    Ok(())
}

fn sync(conn: &Connection, schema: &str, ontology: &Ontologies, id: i64, delete: bool) -> Result<()> {
    let columns = columns(ontology);
    if columns.is_empty() {
        return Ok(());
    }
    let schema = quote(schema);
    let columns = columns.join(", ");
    let sql = if delete {
        format!(
            "INSERT INTO {s}.{table} ({table}, rowid, {c}) SELECT 'delete', ID, {c} FROM {s}.{view} WHERE ID = ?1",
            s = schema,
            table = quote(TABLE),
            view = quote(VIEW),
            c = columns
        )
    } else {
        format!(
            "INSERT INTO {s}.{table} (rowid, {c}) SELECT ID, {c} FROM {s}.{view} WHERE ID = ?1",
            s = schema,
            table = quote(TABLE),
            view = quote(VIEW),
            c = columns
        )
    };
    conn.prepare_cached(&sql)?.execute(params![id])?;
    Ok(())
}

/// Removes the indexed text of `id`; must run while the stored values are still the
/// ones that were indexed.
pub fn delete_resource(conn: &Connection, schema: &str, ontology: &Ontologies, id: i64) -> Result<()> {
    sync(conn, schema, ontology, id, true)
}

pub fn insert_resource(conn: &Connection, schema: &str, ontology: &Ontologies, id: i64) -> Result<()> {
    sync(conn, schema, ontology, id, false)
}

/// Ids matching an FTS5 query, best ranked first.
pub fn search(conn: &Connection, schema: &str, ontology: &Ontologies, query: &str) -> Result<Vec<i64>> {
    if ontology.fulltext_properties().is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT rowid FROM {}.{t} WHERE {t} MATCH ?1 ORDER BY rank",
        quote(schema),
        t = quote(TABLE)
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let ids = stmt.query_map(params![query], |row| row.get(0))?;
    Ok(ids.collect::<rusqlite::Result<Vec<i64>>>()?)
}

/// Checks the index against its content view; a mismatch is reported as `false`.
pub fn integrity_check(conn: &Connection, schema: &str, ontology: &Ontologies) -> Result<bool> {
    if ontology.fulltext_properties().is_empty() {
        return Ok(true);
    }
    let sql = format!(
        "INSERT INTO {}.{t} ({t}, rank) VALUES ('integrity-check', 1)",
        quote(schema),
        t = quote(TABLE)
    );
    match conn.execute(&sql, []) {
        Ok(_) => Ok(true),
        Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == ErrorCode::DatabaseCorrupt => {
            Ok(false)
        }
        Err(err) => Err(err.into()),
    }
}
