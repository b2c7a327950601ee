mod common;

use common::{add_person, add_type, count, ex, file_config, link, memory_store, people_with, set, EX};
use ontostore::db;
use ontostore::ontology::diff::diff;
use ontostore::ontology::loader;
use ontostore::{Config, OntologySource, Store, StoreError, Value};
use oxigraph::model::{Literal, NamedOrBlankNodeRef, TermRef};

const AGE: &str =
    "ex:age a rdf:Property ; rdfs:domain ex:Person ; rdfs:range xsd:integer ; nrl:maxCardinality 1 .";
const EMPLOYEE: &str = "ex:Employee a rdfs:Class .";
const KNOWS: &str = "ex:knows a rdf:Property ;\n    rdfs:domain ex:Person ;\n    rdfs:range ex:Person .";
const BADGE_DOMAIN: &str = "rdfs:domain ex:Employee ;";
const DOCUMENT: &str = "ex:Document a rdfs:Class .";
const AUTHOR: &str = "ex:author a rdf:Property ;\n    rdfs:domain ex:Document ;\n    rdfs:range ex:Person ;\n    nrl:maxCardinality 1 .";
const TITLE: &str = "ex:title a rdf:Property ;\n    rdfs:domain ex:Document ;\n    rdfs:range xsd:string ;\n    nrl:maxCardinality 1 ;\n    nrl:fulltextIndexed true .";

fn schema_sql(store: &Store) -> Vec<String> {
    let mut stmt = store
        .connection()
        .prepare("SELECT COALESCE(sql, name) FROM main.sqlite_master ORDER BY name")
        .unwrap();
    let rows = stmt.query_map([], |row| row.get(0)).unwrap();
    rows.collect::<Result<Vec<String>, _>>().unwrap()
}

/// Replaces the age of `person`; the property is single valued.
fn set_age(store: &mut Store, person: &str, age: i64) {
    let age = Literal::from(age);
    store.begin().unwrap();
    store
        .update_statement(
            None,
            NamedOrBlankNodeRef::from(ex(person).as_ref()),
            ex("age").as_ref(),
            Some(TermRef::from(age.as_ref())),
        )
        .unwrap();
    store.commit().unwrap();
}

fn assert_no_pending_changes(store: &Store, source: &OntologySource) {
    let (mut loaded, _) = loader::load(source).unwrap();
    let changes = diff(Some(&*store.ontology()), &mut loaded);
    assert!(changes.is_empty(), "{:?}", changes);
}

#[test]
fn test_range_change_casts_values() {
    let mut store = memory_store();
    let id = add_person(&mut store, "bob", "Bob");
    set_age(&mut store, "bob", 30);

    let source = people_with(&[(AGE, AGE.replace("xsd:integer", "xsd:string").as_str())]);
    store.update_ontology(source.clone()).unwrap();
    assert_eq!(
        store.property_values(None, id, &format!("{}age", EX)).unwrap(),
        vec![Value::String("30".to_string())]
    );
    assert_no_pending_changes(&store, &source);

    // the column keeps accepting writes of the new type
    store.begin().unwrap();
    store
        .update_statement(
            None,
            NamedOrBlankNodeRef::from(ex("bob").as_ref()),
            ex("age").as_ref(),
            Some(TermRef::from(Literal::from("thirty-one").as_ref())),
        )
        .unwrap();
    store.commit().unwrap();
}

#[test]
fn test_unsupported_range_change_leaves_store_intact() {
    let mut store = memory_store();
    let id = add_person(&mut store, "bob", "Bob");
    set_age(&mut store, "bob", 30);
    let checksum = store.checksum().to_string();
    let schema = schema_sql(&store);

    let err = store
        .update_ontology(people_with(&[(AGE, AGE.replace("xsd:integer", "xsd:dateTime").as_str())]))
        .unwrap_err();
    assert!(matches!(err, StoreError::UnsupportedOntologyChange(_)), "{}", err);

    assert_eq!(store.checksum(), checksum);
    assert_eq!(schema_sql(&store), schema);
    assert_eq!(
        store.property_values(None, id, &format!("{}age", EX)).unwrap(),
        vec![Value::Integer(30)]
    );
    // data transactions still work against the old schema
    set_age(&mut store, "bob", 31);
}

#[test]
fn test_rejected_changes() {
    let mut store = memory_store();
    let cases = [
        // narrowing cardinality
        people_with(&[(
            "rdfs:range xsd:string .",
            "rdfs:range xsd:string ;\n    nrl:maxCardinality 1 .",
        )]),
        // moving a property to another class
        people_with(&[(BADGE_DOMAIN, "rdfs:domain ex:Person ;")]),
        // an existing property becoming inverse functional
        people_with(&[(AGE, AGE.replace("a rdf:Property", "a rdf:Property, nrl:InverseFunctionalProperty").as_str())]),
    ];
    for source in cases {
        let err = store.update_ontology(source).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedOntologyChange(_)), "{}", err);
        assert!(!store.in_transaction());
    }
}

#[test]
fn test_new_super_class_copies_rows() {
    let mut store = memory_store();
    store.begin().unwrap();
    for i in 0..1000 {
        let employee = ex(&format!("employee{}", i));
        add_type(&mut store, None, &employee, "Employee").unwrap();
        set(&mut store, None, &employee, "badge", format!("B{:04}", i).as_str()).unwrap();
    }
    store.commit().unwrap();
    let first = store.resource_id(&format!("{}employee0", EX)).unwrap().unwrap();
    assert_eq!(store.refcount(None, first).unwrap(), 2);
    let person_class = store.resource_id(&format!("{}Person", EX)).unwrap().unwrap();
    assert_eq!(store.refcount(None, person_class).unwrap(), 1);

    let source = people_with(&[(EMPLOYEE, "ex:Employee a rdfs:Class ;\n    rdfs:subClassOf ex:Person .")]);
    store.update_ontology(source.clone()).unwrap();

    assert_eq!(count(&store, "SELECT COUNT(*) FROM \"ex:Person\""), 1000);
    assert_eq!(store.refcount(None, first).unwrap(), 3);
    assert_eq!(store.refcount(None, person_class).unwrap(), 1001);
    assert!(store
        .types(None, first)
        .unwrap()
        .contains(&format!("{}Person", EX)));
    assert_eq!(
        count(
            &store,
            &format!(
                "SELECT COUNT(*) FROM \"rdfs:Resource_rdf:type\" WHERE \"rdf:type\" = {}",
                person_class
            )
        ),
        1000
    );
    assert_no_pending_changes(&store, &source);

    // employees now accept person properties
    store.begin().unwrap();
    set(&mut store, None, &ex("employee0"), "name", "Erin").unwrap();
    store.commit().unwrap();
    assert_eq!(
        store.property_values(None, first, &format!("{}name", EX)).unwrap(),
        vec![Value::String("Erin".to_string())]
    );
}

#[test]
fn test_widened_cardinality_moves_values() {
    let mut store = memory_store();
    let id = add_person(&mut store, "bob", "Bob");
    set_age(&mut store, "bob", 30);

    store
        .update_ontology(people_with(&[(AGE, AGE.replace(" ; nrl:maxCardinality 1", "").as_str())]))
        .unwrap();
    assert_eq!(count(&store, "SELECT COUNT(*) FROM \"ex:Person_ex:age\""), 1);

    store.begin().unwrap();
    set(&mut store, None, &ex("bob"), "age", 31).unwrap();
    store.commit().unwrap();
    let mut ages = store.property_values(None, id, &format!("{}age", EX)).unwrap();
    ages.sort_by_key(|v| v.to_string());
    assert_eq!(ages, vec![Value::Integer(30), Value::Integer(31)]);
}

#[test]
fn test_added_property() {
    let mut store = memory_store();
    let id = add_person(&mut store, "bob", "Bob");
    let nickname = "\nex:nickname a rdf:Property ;\n    rdfs:domain ex:Person ;\n    rdfs:range xsd:string ;\n    nrl:maxCardinality 1 ;\n    nrl:indexed true .\n";
    store
        .update_ontology(people_with(&[(EMPLOYEE, format!("{}\n{}", EMPLOYEE, nickname).as_str())]))
        .unwrap();

    store.begin().unwrap();
    set(&mut store, None, &ex("bob"), "nickname", "Bobby").unwrap();
    store.commit().unwrap();
    assert_eq!(
        store.property_values(None, id, &format!("{}nickname", EX)).unwrap(),
        vec![Value::String("Bobby".to_string())]
    );
    assert_eq!(
        count(
            &store,
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND sql LIKE '%\"ex:nickname\"%'"
        ),
        1
    );
}

#[test]
fn test_removed_property_releases_references() {
    let mut store = memory_store();
    let bob_id = add_person(&mut store, "bob", "Bob");
    add_person(&mut store, "alice", "Alice");
    store.begin().unwrap();
    link(&mut store, None, &ex("alice"), "knows", &ex("bob")).unwrap();
    store.commit().unwrap();
    assert_eq!(store.refcount(None, bob_id).unwrap(), 3);

    store.update_ontology(people_with(&[(KNOWS, "")])).unwrap();
    assert_eq!(store.refcount(None, bob_id).unwrap(), 2);
    assert_eq!(
        count(
            &store,
            "SELECT COUNT(*) FROM sqlite_master WHERE name = 'ex:Person_ex:knows'"
        ),
        0
    );
    assert_eq!(store.resource_id(&format!("{}knows", EX)).unwrap(), None);
}

#[test]
fn test_removed_class() {
    let mut store = memory_store();
    let alice_id = add_person(&mut store, "alice", "Alice");
    let report = ex("report");
    store.begin().unwrap();
    add_type(&mut store, None, &report, "Document").unwrap();
    link(&mut store, None, &report, "author", &ex("alice")).unwrap();
    set(&mut store, None, &report, "title", "Quarterly report").unwrap();
    store.commit().unwrap();
    let report_id = store.resource_id(report.as_str()).unwrap().unwrap();
    assert_eq!(store.refcount(None, report_id).unwrap(), 2);
    assert_eq!(store.refcount(None, alice_id).unwrap(), 3);

    store
        .update_ontology(people_with(&[(DOCUMENT, ""), (AUTHOR, ""), (TITLE, "")]))
        .unwrap();
    assert_eq!(store.refcount(None, report_id).unwrap(), 1);
    assert_eq!(store.refcount(None, alice_id).unwrap(), 2);
    assert_eq!(
        count(&store, "SELECT COUNT(*) FROM sqlite_master WHERE name = 'ex:Document'"),
        0
    );
    assert_eq!(store.resource_id(&format!("{}Document", EX)).unwrap(), None);
    assert!(store.search(None, "quarterly").unwrap().is_empty());
    assert_eq!(store.types(None, report_id).unwrap().len(), 1);
}

#[test]
fn test_reopen_migrates_changed_ontology() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let source = OntologySource::Files(vec![common::fixture("people.ontology")]);
    let bob_id = {
        let mut store = Store::open(file_config(dir.path(), source.clone())).unwrap();
        let id = add_person(&mut store, "bob", "Bob");
        set_age(&mut store, "bob", 30);
        id
    };

    // unchanged sources reopen without a migration
    let store = Store::open(file_config(dir.path(), source)).unwrap();
    assert_eq!(store.modseq(), 2);
    assert_eq!(
        store.property_values(None, bob_id, &format!("{}age", EX)).unwrap(),
        vec![Value::Integer(30)]
    );
    drop(store);

    let changed = people_with(&[(AGE, AGE.replace("xsd:integer", "xsd:double").as_str())]);
    let store = Store::open(file_config(dir.path(), changed.clone())).unwrap();
    assert_eq!(
        store.property_values(None, bob_id, &format!("{}age", EX)).unwrap(),
        vec![Value::Double(30.0)]
    );
    assert_no_pending_changes(&store, &changed);
    assert_eq!(
        db::get_metadata(store.connection(), db::METADATA_CHECKSUM).unwrap().as_deref(),
        Some(store.checksum())
    );
}

#[test]
fn test_locale_change_is_recorded() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let source = OntologySource::Files(vec![common::fixture("people.ontology")]);
    let mut config = file_config(dir.path(), source);
    config.locale = "C".to_string();
    drop(Store::open(config.clone()).unwrap());

    config.locale = "en_US.UTF-8".to_string();
    let store = Store::open(config).unwrap();
    assert_eq!(
        db::get_metadata(store.connection(), db::METADATA_LOCALE).unwrap().as_deref(),
        Some("en_US.UTF-8")
    );
}

const NAME: &str = "ex:name a rdf:Property ;\n    rdfs:domain ex:Person ;";
const LABEL: &str = "\nex:label a rdf:Property ;\n    rdfs:domain ex:Person ;\n    rdfs:range xsd:string ;\n    nrl:maxCardinality 1 .\n";

#[test]
fn test_new_super_property_copies_values() {
    let mut store = memory_store();
    let bob = add_person(&mut store, "bob", "Bob");
    let source = people_with(&[
        (EMPLOYEE, format!("{}\n{}", EMPLOYEE, LABEL).as_str()),
        (
            NAME,
            "ex:name a rdf:Property ;\n    rdfs:subPropertyOf ex:label ;\n    rdfs:domain ex:Person ;",
        ),
    ]);
    store.update_ontology(source.clone()).unwrap();
    assert_eq!(
        store.property_values(None, bob, &format!("{}label", EX)).unwrap(),
        vec![Value::String("Bob".to_string())]
    );
    assert_no_pending_changes(&store, &source);

    // later writes keep the two in step
    let alice = add_person(&mut store, "alice", "Alice");
    assert_eq!(
        store.property_values(None, alice, &format!("{}label", EX)).unwrap(),
        vec![Value::String("Alice".to_string())]
    );
}

#[test]
fn test_new_domain_index_copies_values() {
    common::init_logging();
    let employee = "ex:Employee a rdfs:Class ;\n    rdfs:subClassOf ex:Person .";
    let initial = people_with(&[(EMPLOYEE, employee)]);
    let mut store = Store::open(Config::in_memory(initial)).unwrap();
    add_person(&mut store, "bob", "Bob");
    store.begin().unwrap();
    add_type(&mut store, None, &ex("bob"), "Employee").unwrap();
    store.commit().unwrap();
    assert_eq!(count(&store, "SELECT COUNT(*) FROM \"ex:Employee\""), 1);

    let indexed = format!("{} ;\n    nrl:domainIndex ex:name .", employee.trim_end_matches(" ."));
    let source = people_with(&[(EMPLOYEE, indexed.as_str())]);
    store.update_ontology(source.clone()).unwrap();
    assert_eq!(
        count(&store, "SELECT COUNT(*) FROM \"ex:Employee\" WHERE \"ex:name\" = 'Bob'"),
        1
    );
    assert_no_pending_changes(&store, &source);
}

#[test]
fn test_secondary_index_is_created() {
    let mut store = memory_store();
    add_person(&mut store, "bob", "Bob");
    let index = "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' \
                 AND name = 'ex:Person_ex:age_index' AND sql LIKE '%\"ex:age\", \"ex:name\"%'";
    assert_eq!(count(&store, index), 0);

    let source = people_with(&[(
        AGE,
        AGE.replace("nrl:maxCardinality 1 .", "nrl:maxCardinality 1 ; nrl:secondaryIndex ex:name .")
            .as_str(),
    )]);
    store.update_ontology(source.clone()).unwrap();
    assert_eq!(count(&store, index), 1);
    assert_no_pending_changes(&store, &source);
    set_age(&mut store, "bob", 30);

    // a fresh store creates it with the schema
    common::init_logging();
    let fresh = Store::open(Config::in_memory(source)).unwrap();
    assert_eq!(count(&fresh, index), 1);
}
