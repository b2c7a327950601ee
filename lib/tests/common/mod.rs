#![allow(dead_code)]

use ontostore::consts::TYPE;
use ontostore::{Config, OntologySource, Result, Store};
use oxigraph::model::{Literal, NamedNode, NamedOrBlankNodeRef, TermRef};
use std::path::{Path, PathBuf};

pub const EX: &str = "http://example.org/ns#";
pub const WORK: &str = "http://example.org/graphs/work";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures").join(name)
}

pub fn ex(local: &str) -> NamedNode {
    NamedNode::new_unchecked(format!("{}{}", EX, local))
}

pub fn people_ontology() -> String {
    std::fs::read_to_string(fixture("people.ontology")).unwrap()
}

/// The people ontology with declarations swapped for others.
pub fn people_with(edits: &[(&str, &str)]) -> OntologySource {
    let mut content = people_ontology();
    for (from, to) in edits {
        assert!(content.contains(from), "fixture has no '{}'", from);
        content = content.replace(from, to);
    }
    OntologySource::inline("people.ontology", content)
}

pub fn memory_store() -> Store {
    init_logging();
    Store::open(Config::in_memory(OntologySource::Files(vec![fixture(
        "people.ontology",
    )])))
    .unwrap()
}

pub fn file_config(root: &Path, ontology: OntologySource) -> Config {
    Config::builder()
        .root(root)
        .ontology(ontology)
        .min_free_space(0u64)
        .build()
        .unwrap()
}

pub fn file_store(root: &Path) -> Store {
    init_logging();
    Store::open(file_config(
        root,
        OntologySource::Files(vec![fixture("people.ontology")]),
    ))
    .unwrap()
}

pub fn add_type(store: &mut Store, graph: Option<&str>, subject: &NamedNode, class: &str) -> Result<bool> {
    store.insert_statement(
        graph,
        NamedOrBlankNodeRef::from(subject.as_ref()),
        TYPE,
        TermRef::from(ex(class).as_ref()),
    )
}

pub fn set(
    store: &mut Store,
    graph: Option<&str>,
    subject: &NamedNode,
    property: &str,
    value: impl Into<Literal>,
) -> Result<bool> {
    let value = value.into();
    store.insert_statement(
        graph,
        NamedOrBlankNodeRef::from(subject.as_ref()),
        ex(property).as_ref(),
        TermRef::from(value.as_ref()),
    )
}

pub fn link(
    store: &mut Store,
    graph: Option<&str>,
    subject: &NamedNode,
    property: &str,
    object: &NamedNode,
) -> Result<bool> {
    store.insert_statement(
        graph,
        NamedOrBlankNodeRef::from(subject.as_ref()),
        ex(property).as_ref(),
        TermRef::from(object.as_ref()),
    )
}

/// Adds a person with a name in one committed transaction, returning its id.
pub fn add_person(store: &mut Store, local: &str, name: &str) -> i64 {
    let person = ex(local);
    store.begin().unwrap();
    add_type(store, None, &person, "Person").unwrap();
    set(store, None, &person, "name", name).unwrap();
    store.commit().unwrap();
    store.resource_id(person.as_str()).unwrap().unwrap()
}

pub fn count(store: &Store, sql: &str) -> i64 {
    store
        .connection()
        .query_row(sql, [], |row| row.get(0))
        .unwrap()
}
