mod common;

use common::{add_type, count, ex, file_store, fixture, memory_store, set, EX, WORK};
use ontostore::db;
use ontostore::{StoreError, Value};

const G1: &str = "http://example.org/graphs/g1";

#[test]
fn test_rolled_back_graph_leaves_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = file_store(dir.path());
    let path = store.config().graph_database_path(G1).unwrap();

    store.begin().unwrap();
    store.create_graph(G1).unwrap();
    assert!(path.exists());
    assert_eq!(store.graphs(), vec![G1.to_string()]);
    add_type(&mut store, Some(G1), &ex("bob"), "Person").unwrap();
    store.rollback().unwrap();

    assert!(store.graphs().is_empty());
    assert!(!path.exists());
    assert!(!db::is_attached(store.connection(), G1).unwrap());
    assert!(matches!(store.refcount(Some(G1), 1), Err(StoreError::UnknownGraph(_))));

    store.begin().unwrap();
    let err = add_type(&mut store, Some(G1), &ex("bob"), "Person").unwrap_err();
    assert!(matches!(err, StoreError::UnknownGraph(_)), "{}", err);
    // not a fatal error
    assert!(store.in_transaction());
    store.commit().unwrap();
}

#[test]
fn test_graph_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let carol = ex("carol");
    {
        let mut store = file_store(dir.path());
        store.begin().unwrap();
        store.create_graph(WORK).unwrap();
        add_type(&mut store, Some(WORK), &carol, "Person").unwrap();
        set(&mut store, Some(WORK), &carol, "email", "carol@work.example.org").unwrap();
        store.commit().unwrap();
    }

    let store = file_store(dir.path());
    assert_eq!(store.graphs(), vec![WORK.to_string()]);
    let id = store.resource_id(carol.as_str()).unwrap().unwrap();
    assert!(store
        .types(Some(WORK), id)
        .unwrap()
        .contains(&format!("{}Person", EX)));
    assert!(store.types(None, id).unwrap().is_empty());
    assert_eq!(
        store.property_values(Some(WORK), id, &format!("{}email", EX)).unwrap(),
        vec![Value::String("carol@work.example.org".to_string())]
    );
    assert_eq!(store.modseq(), 1);
}

#[test]
fn test_graphs_keep_separate_refcounts() {
    let mut store = memory_store();
    store.begin().unwrap();
    let changed = store.load_rdf_file(&fixture("graphs.trig"), None).unwrap();
    store.commit().unwrap();
    assert_eq!(changed, 4);
    assert_eq!(store.graphs(), vec![WORK.to_string()]);

    let carol = store.resource_id(&format!("{}carol", EX)).unwrap().unwrap();
    assert_eq!(store.refcount(None, carol).unwrap(), 2);
    assert_eq!(store.refcount(Some(WORK), carol).unwrap(), 2);
    assert!(store
        .property_values(None, carol, &format!("{}email", EX))
        .unwrap()
        .is_empty());
    assert!(store
        .property_values(Some(WORK), carol, &format!("{}name", EX))
        .unwrap()
        .is_empty());
    assert_eq!(
        store.property_values(None, carol, &format!("{}name", EX)).unwrap(),
        vec![Value::String("Carol".to_string())]
    );

    // the graph itself is a resource pinned by the Graph table
    let graph = store.resource_id(WORK).unwrap().unwrap();
    assert_eq!(store.refcount(None, graph).unwrap(), 1);
    assert_eq!(
        count(&store, &format!("SELECT COUNT(*) FROM main.Graph WHERE ID = {}", graph)),
        1
    );
}

#[test]
fn test_drop_graph() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = file_store(dir.path());
    let path = store.config().graph_database_path(WORK).unwrap();
    let carol = ex("carol");
    store.begin().unwrap();
    store.create_graph(WORK).unwrap();
    add_type(&mut store, Some(WORK), &carol, "Person").unwrap();
    store.commit().unwrap();
    assert!(path.exists());

    store.begin().unwrap();
    store.drop_graph(Some(WORK)).unwrap();
    // gone from the transaction view, and the name is blocked until commit
    assert!(store.graphs().is_empty());
    let err = store.create_graph(WORK).unwrap_err();
    assert!(matches!(err, StoreError::Constraint(_)), "{}", err);
    store.commit().unwrap();

    assert!(store.graphs().is_empty());
    assert!(!path.exists());
    assert_eq!(store.resource_id(WORK).unwrap(), None);
    // carol was only referenced from the dropped graph
    assert_eq!(store.resource_id(carol.as_str()).unwrap(), None);

    // the name can be reused by a later transaction
    store.begin().unwrap();
    store.create_graph(WORK).unwrap();
    store.commit().unwrap();
    assert_eq!(store.graphs(), vec![WORK.to_string()]);
}

#[test]
fn test_drop_graph_rollback_keeps_graph() {
    let mut store = memory_store();
    store.begin().unwrap();
    store.create_graph(WORK).unwrap();
    add_type(&mut store, Some(WORK), &ex("carol"), "Person").unwrap();
    store.commit().unwrap();

    store.begin().unwrap();
    store.drop_graph(Some(WORK)).unwrap();
    store.rollback().unwrap();
    assert_eq!(store.graphs(), vec![WORK.to_string()]);
    let carol = store.resource_id(&format!("{}carol", EX)).unwrap().unwrap();
    assert_eq!(store.refcount(Some(WORK), carol).unwrap(), 2);
}

#[test]
fn test_clear_default_graph() {
    let mut store = memory_store();
    store.begin().unwrap();
    store.load_rdf_file(&fixture("people.ttl"), None).unwrap();
    store.commit().unwrap();
    assert_eq!(count(&store, "SELECT COUNT(*) FROM \"ex:Person\""), 3);

    store.begin().unwrap();
    store.drop_graph(None).unwrap();
    store.commit().unwrap();
    assert_eq!(count(&store, "SELECT COUNT(*) FROM \"ex:Person\""), 0);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM \"rdfs:Resource\""), 0);
    assert_eq!(store.resource_id(&format!("{}alice", EX)).unwrap(), None);
    // ontology entities stay
    assert!(store.resource_id(&format!("{}Person", EX)).unwrap().is_some());
}

#[test]
fn test_invalid_graph_operations() {
    let mut store = memory_store();
    store.begin().unwrap();
    store.create_graph(WORK).unwrap();
    for name in [WORK, "main", "temp"] {
        let err = store.create_graph(name).unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)), "{}", err);
    }
    let err = store.drop_graph(Some(G1)).unwrap_err();
    assert!(matches!(err, StoreError::UnknownGraph(_)), "{}", err);
    assert!(store.in_transaction());
    store.commit().unwrap();
    assert_eq!(store.graphs(), vec![WORK.to_string()]);

    let err = store.create_graph(G1).unwrap_err();
    assert!(matches!(err, StoreError::Transaction(_)), "{}", err);
}

#[test]
fn test_reader_follows_graphs() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = file_store(dir.path());
    let mut reader = store.reader().unwrap();
    assert!(reader.graphs().unwrap().is_empty());
    assert_eq!(reader.modseq().unwrap(), 0);

    store.begin().unwrap();
    store.create_graph(WORK).unwrap();
    add_type(&mut store, Some(WORK), &ex("carol"), "Person").unwrap();
    // uncommitted graphs are not visible
    assert!(reader.graphs().unwrap().is_empty());
    store.commit().unwrap();

    assert_eq!(reader.graphs().unwrap(), vec![WORK.to_string()]);
    let carol = reader.resource_id(&format!("{}carol", EX)).unwrap().unwrap();
    assert!(reader
        .types(Some(WORK), carol)
        .unwrap()
        .contains(&format!("{}Person", EX)));
    assert_eq!(reader.modseq().unwrap(), 1);

    store.begin().unwrap();
    store.drop_graph(Some(WORK)).unwrap();
    store.commit().unwrap();
    assert!(reader.graphs().unwrap().is_empty());
    assert!(matches!(
        reader.types(Some(WORK), carol),
        Err(StoreError::UnknownGraph(_))
    ));
}

#[test]
fn test_reader_requires_a_store() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::file_config(
        dir.path(),
        ontostore::OntologySource::Files(vec![fixture("people.ontology")]),
    );
    let err = ontostore::StoreReader::open(&config).unwrap_err();
    assert!(matches!(err, StoreError::Config(_)), "{}", err);
}
