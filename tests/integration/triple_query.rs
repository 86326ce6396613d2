#![allow(missing_docs)]

use std::collections::HashSet;
use std::time::Duration;

use tempfile::{tempdir, TempDir};
use tessera::error::Result;
use tessera::model::{NodeId, TriplePattern, TripleSpec};
use tessera::store::{PoolConfig, StoreConfig, TripleStore};

fn open_store(config: StoreConfig) -> Result<TripleStore> {
    let store = TripleStore::open(config)?;
    store.init_database()?;
    Ok(store)
}

fn config_at(dir: &TempDir) -> StoreConfig {
    StoreConfig::new(dir.path().join("store.db"))
}

struct Fixture {
    x: NodeId,
    asserted_about_x: Vec<i64>,
    inferred_about_x: i64,
}

/// Two asserted triples and one inferred triple with subject `x`, plus one
/// asserted triple with subject `y`.
fn populate(store: &TripleStore) -> Result<Fixture> {
    let mut conn = store.connection()?;
    let x = conn.store_uri("http://example.org/x")?.id();
    let y = conn.store_uri("http://example.org/y")?.id();
    let knows = conn.store_uri("http://example.org/knows")?.id();
    let a = conn.store_uri("http://example.org/a")?.id();
    let b = conn.store_uri("http://example.org/b")?.id();

    let t1 = conn.add_triple(TripleSpec::new(x, knows, a))?;
    let t2 = conn.add_triple(TripleSpec::new(x, knows, b))?;
    let inferred = conn.add_triple(TripleSpec::new(x, knows, y).inferred(true))?;
    conn.add_triple(TripleSpec::new(y, knows, a))?;
    conn.commit()?;
    conn.close()?;

    Ok(Fixture {
        x,
        asserted_about_x: vec![t1.id, t2.id],
        inferred_about_x: inferred.id,
    })
}

fn collect_ids(store: &TripleStore, pattern: TriplePattern) -> Result<Vec<i64>> {
    let mut ids = Vec::new();
    for item in store.list_triples(pattern)? {
        ids.push(item?.id);
    }
    Ok(ids)
}

#[test]
fn subject_pattern_returns_each_match_exactly_once() -> Result<()> {
    let dir = tempdir()?;
    let store = open_store(config_at(&dir))?;
    let fx = populate(&store)?;

    let ids = collect_ids(&store, TriplePattern::any().subject(fx.x))?;
    let unique: HashSet<i64> = ids.iter().copied().collect();
    assert_eq!(ids.len(), unique.len());
    assert_eq!(
        unique,
        fx.asserted_about_x.iter().copied().collect::<HashSet<_>>()
    );
    Ok(())
}

#[test]
fn include_inferred_widens_the_result() -> Result<()> {
    let dir = tempdir()?;
    let store = open_store(config_at(&dir))?;
    let fx = populate(&store)?;

    let ids = collect_ids(
        &store,
        TriplePattern::any().subject(fx.x).include_inferred(true),
    )?;
    assert_eq!(ids.len(), 3);
    assert!(ids.contains(&fx.inferred_about_x));
    Ok(())
}

#[test]
fn soft_deleted_triples_never_match() -> Result<()> {
    let dir = tempdir()?;
    let store = open_store(config_at(&dir))?;
    let fx = populate(&store)?;

    let mut conn = store.connection()?;
    assert!(conn.delete_triple(fx.asserted_about_x[0])?);
    conn.commit()?;
    conn.close()?;

    let ids = collect_ids(&store, TriplePattern::any().subject(fx.x))?;
    assert_eq!(ids, vec![fx.asserted_about_x[1]]);
    Ok(())
}

#[test]
fn iteration_spans_multiple_batches() -> Result<()> {
    let dir = tempdir()?;
    let store = open_store(config_at(&dir).query_batch_size(2))?;

    let mut conn = store.connection()?;
    let s = conn.store_uri("http://example.org/s")?.id();
    let p = conn.store_uri("http://example.org/p")?.id();
    let mut expected = HashSet::new();
    for i in 0..5 {
        let o = conn.store_uri(&format!("http://example.org/o{i}"))?.id();
        expected.insert(conn.add_triple(TripleSpec::new(s, p, o))?.id);
    }
    conn.commit()?;
    conn.close()?;

    let ids = collect_ids(&store, TriplePattern::any().subject(s))?;
    assert_eq!(ids.iter().copied().collect::<HashSet<_>>(), expected);
    assert_eq!(ids.len(), 5);
    Ok(())
}

#[test]
fn exhausted_result_releases_its_connection() -> Result<()> {
    let dir = tempdir()?;
    let pool = PoolConfig {
        min_size: 1,
        max_size: 1,
        acquire_increment: 1,
        acquire_timeout: Duration::from_millis(300),
        ..PoolConfig::default()
    };
    let store = open_store(config_at(&dir).pool(pool))?;
    let fx = populate(&store)?;

    // the result owns the pool's only connection
    let mut result = store.list_triples(TriplePattern::any().subject(fx.x))?;
    for item in result.by_ref() {
        item?;
    }
    // fully consumed: the connection must already be back in the pool even
    // though the result value is still alive
    store.connection()?.close()?;
    drop(result);
    Ok(())
}

#[test]
fn closing_a_result_midway_releases_its_connection() -> Result<()> {
    let dir = tempdir()?;
    let pool = PoolConfig {
        min_size: 1,
        max_size: 1,
        acquire_increment: 1,
        acquire_timeout: Duration::from_millis(300),
        ..PoolConfig::default()
    };
    let store = open_store(config_at(&dir).pool(pool).query_batch_size(1))?;
    let fx = populate(&store)?;

    let mut result = store.list_triples(TriplePattern::any().subject(fx.x))?;
    let first = result.next();
    assert!(first.is_some());
    result.close()?;
    assert!(result.next().is_none());

    store.connection()?.close()?;
    Ok(())
}

#[test]
fn dropping_a_result_releases_its_connection() -> Result<()> {
    let dir = tempdir()?;
    let pool = PoolConfig {
        min_size: 1,
        max_size: 1,
        acquire_increment: 1,
        acquire_timeout: Duration::from_millis(300),
        ..PoolConfig::default()
    };
    let store = open_store(config_at(&dir).pool(pool).query_batch_size(1))?;
    let fx = populate(&store)?;

    let result = store.list_triples(TriplePattern::any().subject(fx.x))?;
    drop(result);

    store.connection()?.close()?;
    Ok(())
}

#[test]
fn context_pattern_matches_only_that_graph() -> Result<()> {
    let dir = tempdir()?;
    let store = open_store(config_at(&dir))?;

    let mut conn = store.connection()?;
    let s = conn.store_uri("http://example.org/s")?.id();
    let p = conn.store_uri("http://example.org/p")?.id();
    let o = conn.store_uri("http://example.org/o")?.id();
    let g = conn.store_uri("http://example.org/graph1")?.id();
    let in_graph = conn.add_triple(TripleSpec::new(s, p, o).context(g))?;
    conn.add_triple(TripleSpec::new(s, p, o))?;
    conn.commit()?;
    conn.close()?;

    let ids = collect_ids(&store, TriplePattern::any().context(g))?;
    assert_eq!(ids, vec![in_graph.id]);
    Ok(())
}
