//! Thin layer over the SQLite connection: opening and configuring databases, the custom
//! functions the schema relies on, attached graph databases and the metadata table.

use crate::consts::{LOCALE_COLLATION, TIME_SORT_FUNCTION};
use crate::errors::Result;
use crate::util::quote;
use crate::value::time_sort_key;
use log::debug;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::cmp::Ordering;
use std::path::Path;

pub const MAIN_SCHEMA: &str = "main";

/// Path SQLite attaches for graphs of an in-memory store.
pub const MEMORY: &str = ":memory:";

pub const METADATA_ONTOLOGY: &str = "ontology";
pub const METADATA_CHECKSUM: &str = "ontology-checksum";
pub const METADATA_SCHEMA_VERSION: &str = "schema-version";
pub const METADATA_LOCALE: &str = "locale";

/// Opens the main database read-write, creating it when missing.
pub fn open(path: Option<&Path>, statement_cache_size: usize) -> Result<Connection> {
    let conn = match path {
        Some(path) => {
            debug!("Opening database {}", path.display());
            Connection::open(path)?
        }
        None => Connection::open_in_memory()?,
    };
    configure(&conn, statement_cache_size)?;
    Ok(conn)
}

pub fn open_readonly(path: &Path, statement_cache_size: usize) -> Result<Connection> {
    debug!("Opening database {} read-only", path.display());
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    configure(&conn, statement_cache_size)?;
    Ok(conn)
}

fn configure(conn: &Connection, statement_cache_size: usize) -> Result<()> {
    conn.set_prepared_statement_cache_capacity(statement_cache_size);
    // rollback journal: a commit spanning attached files stays atomic
    conn.execute_batch(
        "PRAGMA foreign_keys = OFF;
         PRAGMA recursive_triggers = OFF;
         PRAGMA temp_store = MEMORY;",
    )?;
    register_functions(conn)?;
    Ok(())
}

/// Registers the datetime sort function and the locale collation used by the schema.
pub fn register_functions(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        TIME_SORT_FUNCTION,
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            Ok(match ctx.get_raw(0) {
                ValueRef::Text(text) => std::str::from_utf8(text).ok().and_then(time_sort_key),
                ValueRef::Integer(i) => Some(i as f64),
                ValueRef::Real(r) => Some(r),
                _ => None,
            })
        },
    )?;
    conn.create_collation(LOCALE_COLLATION, locale_compare)?;
    Ok(())
}

/// Case-insensitive ordering with byte order as the tie-breaker, so distinct strings
/// never compare equal.
pub fn locale_compare(a: &str, b: &str) -> Ordering {
    let folded = a
        .chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase));
    folded.then_with(|| a.cmp(b))
}

/// Attaches `path` under `schema`. SQLite allows ten attached databases by default.
pub fn attach(conn: &Connection, path: &str, schema: &str) -> Result<()> {
    debug!("Attaching {} as {}", path, schema);
    conn.execute("ATTACH DATABASE ?1 AS ?2", params![path, schema])?;
    Ok(())
}

pub fn detach(conn: &Connection, schema: &str) -> Result<()> {
    debug!("Detaching {}", schema);
    conn.execute("DETACH DATABASE ?1", params![schema])?;
    Ok(())
}

pub fn is_attached(conn: &Connection, schema: &str) -> Result<bool> {
    let mut stmt = conn.prepare("PRAGMA database_list")?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == schema {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn table_exists(conn: &Connection, schema: &str, table: &str) -> Result<bool> {
    let sql = format!(
        "SELECT 1 FROM {}.sqlite_master WHERE type = 'table' AND name = ?1",
        quote(schema)
    );
    Ok(conn
        .query_row(&sql, params![table], |_| Ok(()))
        .optional()?
        .is_some())
}

pub fn column_exists(conn: &Connection, schema: &str, table: &str, column: &str) -> Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM pragma_table_info(?1, ?2) WHERE name = ?3",
            params![table, schema, column],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

pub fn get_metadata(conn: &Connection, key: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT value FROM main.metadata WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn set_metadata(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO main.metadata (key, value) VALUES (?1, ?2) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

/// Creates the tables only the main database carries.
pub fn create_core_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS main.Resource (
             ID INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
             Uri TEXT UNIQUE,
             BlankNode INTEGER DEFAULT 0
         );
         CREATE TABLE IF NOT EXISTS main.Graph (ID INTEGER NOT NULL PRIMARY KEY);
         CREATE TABLE IF NOT EXISTS main.metadata (key TEXT NOT NULL PRIMARY KEY, value TEXT);",
    )?;
    Ok(())
}

pub fn is_initialized(conn: &Connection) -> Result<bool> {
    table_exists(conn, MAIN_SCHEMA, "metadata")
}

pub fn begin(conn: &Connection) -> Result<()> {
    conn.execute_batch("BEGIN")?;
    Ok(())
}

pub fn commit(conn: &Connection) -> Result<()> {
    conn.execute_batch("COMMIT")?;
    Ok(())
}

pub fn rollback(conn: &Connection) -> Result<()> {
    if !conn.is_autocommit() {
        conn.execute_batch("ROLLBACK")?;
    }
    Ok(())
}

/// Rebuilds every index using the locale collation, needed when the locale changed.
pub fn reindex_locale(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!("REINDEX {}", LOCALE_COLLATION))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locale_collation_folds_case_and_keeps_order_total() {
        assert_eq!(locale_compare("apple", "Banana"), Ordering::Less);
        assert_eq!(locale_compare("Zebra", "apple"), Ordering::Greater);
        assert_ne!(locale_compare("Apple", "apple"), Ordering::Equal);
        assert_eq!(locale_compare("same", "same"), Ordering::Equal);
    }

    #[test]
    fn time_sort_function_orders_offsets() {
        let conn = open(None, 16).unwrap();
        let earlier: bool = conn
            .query_row(
                "SELECT SparqlTimeSort('2024-01-01T10:00:00+02:00') < SparqlTimeSort('2024-01-01T09:00:00Z')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(earlier);
    }

    #[test]
    fn metadata_round_trips() {
        let conn = open(None, 16).unwrap();
        assert!(!is_initialized(&conn).unwrap());
        create_core_tables(&conn).unwrap();
        assert!(is_initialized(&conn).unwrap());
        assert_eq!(get_metadata(&conn, METADATA_LOCALE).unwrap(), None);
        set_metadata(&conn, METADATA_LOCALE, "C").unwrap();
        set_metadata(&conn, METADATA_LOCALE, "en_US.UTF-8").unwrap();
        assert_eq!(
            get_metadata(&conn, METADATA_LOCALE).unwrap().as_deref(),
            Some("en_US.UTF-8")
        );
    }

    #[test]
    fn attach_and_detach_memory_databases() {
        let conn = open(None, 16).unwrap();
        attach(&conn, MEMORY, "http://example.org/g1").unwrap();
        assert!(is_attached(&conn, "http://example.org/g1").unwrap());
        conn.execute_batch("CREATE TABLE \"http://example.org/g1\".t (x)").unwrap();
        assert!(table_exists(&conn, "http://example.org/g1", "t").unwrap());
        assert!(column_exists(&conn, "http://example.org/g1", "t", "x").unwrap());
        detach(&conn, "http://example.org/g1").unwrap();
        assert!(!is_attached(&conn, "http://example.org/g1").unwrap());
    }
}
