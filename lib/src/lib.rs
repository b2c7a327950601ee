//! Ontology-driven relational storage for RDF data.
//!
//! Classes and properties of an ontology become tables and columns. Statements are
//! buffered per resource and coalesced in an update log before being written; named
//! graphs live in attached databases; ontology changes are diffed and migrated in place.

extern crate derive_builder;

pub mod config;
pub mod consts;
pub mod db;
pub mod errors;
pub mod fts;
pub mod graphs;
pub mod log;
pub mod migrate;
pub mod ontology;
pub mod options;
pub mod reader;
pub mod resource;
pub mod store;
pub mod transaction;
pub mod update;
pub mod util;
pub mod value;

pub use crate::config::Config;
pub use crate::errors::{Result, StoreError};
pub use crate::ontology::{Ontologies, OntologySource};
pub use crate::options::{BlankNodes, StatementKind, TransactionKind, TransactionOutcome};
pub use crate::reader::StoreReader;
pub use crate::store::Store;
pub use crate::transaction::{Listeners, StatementEvent};
pub use crate::value::{PropertyType, Value};

/// Installs `env_logger`. `ONTOSTORE_LOG` takes precedence over `RUST_LOG`; calling
/// this more than once is harmless.
pub fn init_logging() {
    if let Ok(log_level) = std::env::var("ONTOSTORE_LOG") {
        std::env::set_var("RUST_LOG", log_level);
    }
    let _ = env_logger::try_init();
}
