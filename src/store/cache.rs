//! Node/triple object cache.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};

use lru::LruCache;
use parking_lot::Mutex;

use crate::model::{Node, NodeId, Triple, TripleId};

use super::config::CacheConfig;

/// LRU caches for materialized nodes and triples, keyed by row identifier.
///
/// Populated lazily by connection wrappers on read; write paths inside the
/// wrapper evict the entries they touch. There is no TTL and no piecemeal
/// invalidation beyond that: the only wholesale operations are [`clear`] and
/// [`shutdown`].
///
/// [`clear`]: CacheManager::clear
/// [`shutdown`]: CacheManager::shutdown
pub struct CacheManager {
    nodes: Mutex<LruCache<NodeId, Node>>,
    triples: Mutex<LruCache<TripleId, Triple>>,
    open: AtomicBool,
}

impl CacheManager {
    pub(crate) fn new(cfg: &CacheConfig) -> Self {
        let node_cap = NonZeroUsize::new(cfg.node_capacity).unwrap_or(NonZeroUsize::MIN);
        let triple_cap = NonZeroUsize::new(cfg.triple_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            nodes: Mutex::new(LruCache::new(node_cap)),
            triples: Mutex::new(LruCache::new(triple_cap)),
            open: AtomicBool::new(true),
        }
    }

    /// Cached node, if present.
    pub fn node(&self, id: NodeId) -> Option<Node> {
        self.nodes.lock().get(&id).cloned()
    }

    /// Cached triple, if present.
    pub fn triple(&self, id: TripleId) -> Option<Triple> {
        self.triples.lock().get(&id).copied()
    }

    pub(crate) fn put_node(&self, node: Node) {
        if self.open.load(Ordering::Acquire) {
            self.nodes.lock().put(node.id(), node);
        }
    }

    pub(crate) fn put_triple(&self, triple: Triple) {
        if self.open.load(Ordering::Acquire) {
            self.triples.lock().put(triple.id, triple);
        }
    }

    pub(crate) fn evict_triple(&self, id: TripleId) {
        self.triples.lock().pop(&id);
    }

    pub(crate) fn evict_node(&self, id: NodeId) {
        self.nodes.lock().pop(&id);
    }

    /// Drops every entry. In-flight transactions keep whatever objects they
    /// already fetched.
    pub fn clear(&self) {
        self.nodes.lock().clear();
        self.triples.lock().clear();
    }

    pub(crate) fn shutdown(&self) {
        self.open.store(false, Ordering::Release);
        self.clear();
    }
}
