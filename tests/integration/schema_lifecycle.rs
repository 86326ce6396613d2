#![allow(missing_docs)]

use tempfile::{tempdir, TempDir};
use tessera::error::Result;
use tessera::model::TripleSpec;
use tessera::store::{StoreConfig, TripleStore};

fn open_store() -> Result<(TempDir, TripleStore)> {
    let dir = tempdir()?;
    let store = TripleStore::open(StoreConfig::new(dir.path().join("store.db")))?;
    Ok((dir, store))
}

fn table_set(store: &TripleStore) -> Result<Vec<String>> {
    let mut conn = store.connection()?;
    let mut tables = conn.database_tables()?;
    conn.close()?;
    tables.sort();
    Ok(tables)
}

#[test]
fn init_creates_base_tables() -> Result<()> {
    let (_dir, store) = open_store()?;
    store.init_database()?;

    let tables = table_set(&store)?;
    assert_eq!(tables, vec!["metadata", "namespaces", "nodes", "triples"]);

    let mut conn = store.connection()?;
    assert_eq!(conn.database_version()?, store.dialect().schema_version());
    conn.close()?;
    Ok(())
}

#[test]
fn init_twice_is_a_noop() -> Result<()> {
    let (_dir, store) = open_store()?;
    store.init_database()?;

    let mut conn = store.connection()?;
    let node = conn.store_uri("http://example.org/s")?;
    conn.commit()?;
    conn.close()?;

    // a second init must neither fail (the create script would collide with
    // the existing tables) nor disturb stored data
    store.init_database()?;

    let mut conn = store.connection()?;
    assert_eq!(conn.node_by_id(node.id())?, Some(node));
    assert_eq!(conn.database_version()?, 2);
    conn.close()?;
    Ok(())
}

#[test]
fn drop_then_init_recreates_required_tables() -> Result<()> {
    let (_dir, store) = open_store()?;
    store.init_database()?;
    store.drop_database()?;

    assert!(table_set(&store)?.is_empty());

    store.init_database()?;
    let tables = table_set(&store)?;
    assert_eq!(tables, vec!["metadata", "namespaces", "nodes", "triples"]);
    Ok(())
}

#[test]
fn drop_is_weakly_guaranteed_on_missing_schema() -> Result<()> {
    let (_dir, store) = open_store()?;
    // nothing initialised; the drop script still runs and must not error out
    store.drop_database()?;
    Ok(())
}

#[test]
fn init_migrates_version_1_schema() -> Result<()> {
    let (_dir, store) = open_store()?;

    // lay down a version 1 schema by hand: triples without provenance columns
    let mut conn = store.connection()?;
    conn.execute_script(
        "CREATE TABLE nodes (id INTEGER PRIMARY KEY, ntype TEXT NOT NULL, \
         svalue TEXT NOT NULL, lang TEXT, ltype INTEGER);\n\
         CREATE TABLE triples (id INTEGER PRIMARY KEY, subject INTEGER NOT NULL, \
         predicate INTEGER NOT NULL, object INTEGER NOT NULL, context INTEGER, \
         deleted INTEGER NOT NULL DEFAULT 0);\n\
         CREATE TABLE namespaces (prefix TEXT PRIMARY KEY, uri TEXT NOT NULL);\n\
         CREATE TABLE metadata (mkey TEXT PRIMARY KEY, mvalue TEXT NOT NULL);\n\
         INSERT INTO metadata (mkey, mvalue) VALUES ('version', '1');",
    )?;
    conn.commit()?;
    conn.close()?;

    store.init_database()?;

    let mut conn = store.connection()?;
    assert_eq!(conn.database_version()?, 2);

    // the migrated table must accept provenance fields
    let s = conn.store_uri("http://example.org/s")?;
    let p = conn.store_uri("http://example.org/p")?;
    let o = conn.store_uri("http://example.org/o")?;
    let creator = conn.store_uri("http://example.org/agent")?;
    let triple = conn.add_triple(
        TripleSpec::new(s.id(), p.id(), o.id())
            .creator(creator.id())
            .inferred(true),
    )?;
    assert_eq!(triple.creator, Some(creator.id()));
    conn.commit()?;
    conn.close()?;
    Ok(())
}

#[test]
fn namespaces_and_metadata_round_trip() -> Result<()> {
    let (_dir, store) = open_store()?;
    store.init_database()?;

    let mut conn = store.connection()?;
    conn.store_namespace("ex", "http://example.org/")?;
    conn.store_namespace("rdf", "http://www.w3.org/1999/02/22-rdf-syntax-ns#")?;
    conn.store_namespace("ex", "http://example.org/v2/")?;
    assert_eq!(
        conn.namespace_by_prefix("ex")?.as_deref(),
        Some("http://example.org/v2/")
    );
    assert_eq!(conn.namespaces()?.len(), 2);

    conn.set_metadata("owner", "tests")?;
    assert_eq!(conn.metadata("owner")?.as_deref(), Some("tests"));
    assert_eq!(conn.metadata("absent")?, None);
    conn.commit()?;
    conn.close()?;
    Ok(())
}

#[test]
fn rollback_discards_uncommitted_work() -> Result<()> {
    let (_dir, store) = open_store()?;
    store.init_database()?;

    let node_id = {
        let mut conn = store.connection()?;
        let node = conn.store_uri("http://example.org/gone")?;
        let id = node.id();
        conn.rollback()?;
        conn.close()?;
        id
    };

    store.clear_cache();
    let mut conn = store.connection()?;
    assert_eq!(conn.node_by_id(node_id)?, None);
    conn.close()?;
    Ok(())
}
