//! Typed property values: the storage type of a property and the tagged values bound
//! into, and read back from, the relational tables.

use crate::consts;
use crate::errors::{Result, StoreError};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat};
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage type of a property, derived from its `rdfs:range`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyType {
    String,
    LangString,
    Boolean,
    Integer,
    Double,
    Date,
    DateTime,
    /// Reference to another resource, stored as its row id.
    Resource,
}

impl PropertyType {
    pub fn from_range(range: &str) -> PropertyType {
        match range.strip_prefix(consts::XSD_NS) {
            Some("string") => PropertyType::String,
            Some("boolean") => PropertyType::Boolean,
            Some("integer") | Some("int") | Some("long") | Some("nonNegativeInteger") => {
                PropertyType::Integer
            }
            Some("double") | Some("float") | Some("decimal") => PropertyType::Double,
            Some("date") => PropertyType::Date,
            Some("dateTime") => PropertyType::DateTime,
            _ if range == consts::LANG_STRING.as_str() => PropertyType::LangString,
            _ => PropertyType::Resource,
        }
    }

    pub fn sql_type(self) -> &'static str {
        match self {
            PropertyType::String | PropertyType::Date | PropertyType::DateTime => "TEXT",
            PropertyType::LangString => "BLOB",
            PropertyType::Boolean | PropertyType::Integer | PropertyType::Resource => "INTEGER",
            PropertyType::Double => "REAL",
        }
    }

    /// Whether columns of this type compare with the locale collation.
    pub fn is_text(self) -> bool {
        matches!(self, PropertyType::String | PropertyType::LangString)
    }

    pub fn is_resource(self) -> bool {
        matches!(self, PropertyType::Resource)
    }

    /// Range changes that can be migrated by casting the stored values.
    /// The list is asymmetric: boolean values never convert back.
    pub fn converts_to(self, to: PropertyType) -> bool {
        use PropertyType::*;
        if self == to {
            return true;
        }
        matches!(
            (self, to),
            (Integer, String)
                | (Integer, Double)
                | (Integer, Boolean)
                | (String, Integer)
                | (String, Double)
                | (String, Boolean)
                | (Double, Integer)
                | (Double, String)
                | (Double, Boolean)
        )
    }

    /// SQL expression converting `column` (holding values of `self`) to `to`.
    pub fn cast_expression(self, to: PropertyType, column: &str) -> String {
        use PropertyType::*;
        match (self, to) {
            (Integer, Boolean) | (Double, Boolean) => {
                format!("CASE WHEN {column} IS NULL THEN NULL ELSE {column} != 0 END")
            }
            (String, Boolean) => format!(
                "CASE WHEN {column} IS NULL THEN NULL \
                 WHEN lower({column}) IN ('true', '1') THEN 1 ELSE 0 END"
            ),
            (_, Integer) => format!("CAST({column} AS INTEGER)"),
            (_, Double) => format!("CAST({column} AS REAL)"),
            (_, String) => format!("CAST({column} AS TEXT)"),
            _ => column.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    LangString { text: String, lang: String },
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Date(NaiveDate),
    DateTime(DateTime<FixedOffset>),
    Resource(i64),
}

impl Value {
    /// Parses the lexical form of a literal into the storage type of a property.
    pub fn from_lexical(ty: PropertyType, lexical: &str, lang: Option<&str>) -> Result<Value> {
        let invalid = || {
            StoreError::constraint(format!("'{}' is not a valid {:?} value", lexical, ty))
        };
        Ok(match ty {
            PropertyType::String => Value::String(lexical.to_string()),
            PropertyType::LangString => match lang {
                Some(lang) => Value::LangString {
                    text: lexical.to_string(),
                    lang: lang.to_string(),
                },
                None => Value::String(lexical.to_string()),
            },
            PropertyType::Boolean => match lexical {
                "true" | "1" => Value::Boolean(true),
                "false" | "0" => Value::Boolean(false),
                _ => return Err(invalid()),
            },
            PropertyType::Integer => Value::Integer(lexical.trim().parse().map_err(|_| invalid())?),
            PropertyType::Double => Value::Double(lexical.trim().parse().map_err(|_| invalid())?),
            PropertyType::Date => Value::Date(
                NaiveDate::parse_from_str(lexical.trim(), "%Y-%m-%d").map_err(|_| invalid())?,
            ),
            PropertyType::DateTime => Value::DateTime(parse_datetime(lexical).ok_or_else(invalid)?),
            PropertyType::Resource => {
                return Err(StoreError::constraint(format!(
                    "literal '{}' given for a resource-valued property",
                    lexical
                )))
            }
        })
    }

    /// Decodes a stored column value according to the property's storage type.
    pub fn from_sql(ty: PropertyType, value: ValueRef<'_>) -> Result<Option<Value>> {
        let mismatch = |value: ValueRef<'_>| {
            StoreError::Query(rusqlite::Error::InvalidColumnType(
                0,
                format!("{:?}", ty),
                value.data_type(),
            ))
        };
        let value = match (ty, value) {
            (_, ValueRef::Null) => return Ok(None),
            (PropertyType::Resource, ValueRef::Integer(id)) => Value::Resource(id),
            (PropertyType::Integer, ValueRef::Integer(i)) => Value::Integer(i),
            (PropertyType::Boolean, ValueRef::Integer(i)) => Value::Boolean(i != 0),
            (PropertyType::Double, ValueRef::Real(f)) => Value::Double(f),
            (PropertyType::Double, ValueRef::Integer(i)) => Value::Double(i as f64),
            (PropertyType::String, ValueRef::Text(text)) => {
                Value::String(String::from_utf8_lossy(text).into_owned())
            }
            (PropertyType::LangString, ValueRef::Text(text)) => {
                Value::String(String::from_utf8_lossy(text).into_owned())
            }
            (PropertyType::LangString, ValueRef::Blob(blob)) => {
                let mut parts = blob.splitn(2, |b| *b == 0);
                let text = String::from_utf8_lossy(parts.next().unwrap_or_default()).into_owned();
                match parts.next() {
                    Some(lang) if !lang.is_empty() => Value::LangString {
                        text,
                        lang: String::from_utf8_lossy(lang).into_owned(),
                    },
                    _ => Value::String(text),
                }
            }
            (PropertyType::Date, ValueRef::Text(text)) => {
                let text = String::from_utf8_lossy(text);
                NaiveDate::parse_from_str(&text, "%Y-%m-%d")
                    .map(Value::Date)
                    .map_err(|_| mismatch(value))?
            }
            (PropertyType::DateTime, ValueRef::Text(text)) => {
                let text = String::from_utf8_lossy(text);
                parse_datetime(&text)
                    .map(Value::DateTime)
                    .ok_or_else(|| mismatch(value))?
            }
            (_, value) => return Err(mismatch(value)),
        };
        Ok(Some(value))
    }

    pub fn as_resource(&self) -> Option<i64> {
        match self {
            Value::Resource(id) => Some(*id),
            _ => None,
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::String(s) => ToSqlOutput::from(s.as_str()),
            Value::LangString { text, lang } => {
                let mut blob = Vec::with_capacity(text.len() + lang.len() + 1);
                blob.extend_from_slice(text.as_bytes());
                blob.push(0);
                blob.extend_from_slice(lang.as_bytes());
                ToSqlOutput::from(blob)
            }
            Value::Boolean(b) => ToSqlOutput::from(*b),
            Value::Integer(i) | Value::Resource(i) => ToSqlOutput::from(*i),
            Value::Double(f) => ToSqlOutput::from(*f),
            Value::Date(d) => ToSqlOutput::from(d.format("%Y-%m-%d").to_string()),
            Value::DateTime(dt) => {
                ToSqlOutput::from(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::LangString { text, lang } => write!(f, "\"{}\"@{}", text, lang),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{}", d),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::DateTime(dt) => write!(f, "{}", dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::Resource(id) => write!(f, "<{}>", id),
        }
    }
}

/// Accepts RFC 3339 timestamps and offset-less `xsd:dateTime` values, the latter read as UTC.
pub fn parse_datetime(text: &str) -> Option<DateTime<FixedOffset>> {
    let text = text.trim();
    DateTime::parse_from_rfc3339(text).ok().or_else(|| {
        NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc().fixed_offset())
    })
}

/// Sort key for stored datetime or date text: seconds since the epoch, as a float so
/// sub-second precision survives. Values with different offsets order by instant.
pub fn time_sort_key(text: &str) -> Option<f64> {
    if let Some(dt) = parse_datetime(text) {
        return Some(dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_nanos()) / 1e9);
    }
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_maps_to_storage_type() {
        assert_eq!(
            PropertyType::from_range("http://www.w3.org/2001/XMLSchema#integer"),
            PropertyType::Integer
        );
        assert_eq!(
            PropertyType::from_range("http://www.w3.org/1999/02/22-rdf-syntax-ns#langString"),
            PropertyType::LangString
        );
        assert_eq!(
            PropertyType::from_range("http://example.org/Person"),
            PropertyType::Resource
        );
    }

    #[test]
    fn conversion_allow_list_is_asymmetric() {
        assert!(PropertyType::Double.converts_to(PropertyType::Boolean));
        assert!(!PropertyType::Boolean.converts_to(PropertyType::Double));
        assert!(PropertyType::Integer.converts_to(PropertyType::String));
        assert!(!PropertyType::Integer.converts_to(PropertyType::DateTime));
        assert!(!PropertyType::Resource.converts_to(PropertyType::String));
    }

    #[test]
    fn lexical_forms_are_validated() {
        assert_eq!(
            Value::from_lexical(PropertyType::Integer, "42", None).unwrap(),
            Value::Integer(42)
        );
        assert!(Value::from_lexical(PropertyType::Integer, "forty", None).is_err());
        assert_eq!(
            Value::from_lexical(PropertyType::LangString, "hallo", Some("de")).unwrap(),
            Value::LangString {
                text: "hallo".into(),
                lang: "de".into()
            }
        );
        assert!(Value::from_lexical(PropertyType::DateTime, "2024-02-01T10:00:00", None).is_ok());
    }

    #[test]
    fn time_sort_orders_by_instant() {
        let a = time_sort_key("2024-01-01T12:00:00+02:00").unwrap();
        let b = time_sort_key("2024-01-01T11:00:00Z").unwrap();
        assert!(a < b);
        assert!(time_sort_key("2024-01-01").is_some());
        assert!(time_sort_key("yesterday").is_none());
    }

    #[test]
    fn lang_string_survives_blob_encoding() {
        let value = Value::LangString {
            text: "bonjour".into(),
            lang: "fr".into(),
        };
        let ToSqlOutput::Owned(rusqlite::types::Value::Blob(blob)) = value.to_sql().unwrap() else {
            panic!("expected a blob");
        };
        let decoded = Value::from_sql(PropertyType::LangString, ValueRef::Blob(&blob)).unwrap();
        assert_eq!(decoded, Some(value));
    }
}
