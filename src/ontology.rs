//! Ontology registry: who listens where.
//!
//! The registry owns one [`FactTrie`] whose leaves are subscriber lists.
//! `post` walks to a leaf, snapshots its list, and invokes `posit` on every
//! handle in turn. A handle whose invocation fails is evicted from the live
//! list and delivery continues with the next one; the failure never reaches
//! the poster.
//!
//! # Locking
//!
//! The trie structure sits behind an `RwLock` that is held only while
//! resolving or creating nodes. Each leaf owns its own `Mutex<Vec<Handle>>`,
//! so registrations on unrelated paths never contend, and invocations run
//! with no registry lock held at all.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::TrieResult;
use crate::handle::Handle;
use crate::invoke::{Invoker, methods};
use crate::key::{Fact, KeyPath};
use crate::trie::FactTrie;

/// Live subscriber list stored at a registry leaf.
type SubscriberList = Arc<Mutex<Vec<Handle>>>;

/// Point-in-time counters describing registry traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Successful `post` calls.
    pub posts: u64,
    /// Individual `posit` deliveries that succeeded.
    pub deliveries: u64,
    /// Handles evicted after a failed delivery.
    pub evictions: u64,
}

#[derive(Debug, Default)]
struct Counters {
    posts: AtomicU64,
    deliveries: AtomicU64,
    evictions: AtomicU64,
}

/// Hierarchical registry of subscriber handles.
#[derive(Default)]
pub struct OntologyRegistry {
    trie: RwLock<FactTrie<SubscriberList>>,
    counters: Counters,
}

impl OntologyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a registry from a snapshot taken with [`Self::snapshot`].
    pub fn from_snapshot(snapshot: &FactTrie<Vec<Handle>>) -> Self {
        Self {
            trie: RwLock::new(snapshot.map(|handles| Arc::new(Mutex::new(handles.clone())))),
            counters: Counters::default(),
        }
    }

    /// Register `handle` at `path`, creating intermediate nodes as needed.
    /// The same handle may be registered any number of times.
    pub fn register(&self, handle: Handle, path: &KeyPath) -> TrieResult<()> {
        {
            let trie = self.trie.read().unwrap_or_else(PoisonError::into_inner);
            if let Ok(list) = trie.get(path) {
                lock(list).push(handle);
                tracing::debug!(%path, "registered subscriber");
                return Ok(());
            }
        }
        // Slow path: the leaf (or some branch above it) does not exist yet.
        let mut trie = self.trie.write().unwrap_or_else(PoisonError::into_inner);
        let list = trie.get_or_insert_with(path, SubscriberList::default)?;
        lock(list).push(handle);
        tracing::debug!(%path, "registered subscriber on new path");
        Ok(())
    }

    /// Remove the first occurrence of `handle` at `path`.
    ///
    /// Fails with `PathNotFound` when nothing was ever registered at `path`.
    /// Removing a handle that is not in the list is a no-op that returns
    /// `Ok(false)`.
    pub fn unregister(&self, handle: &Handle, path: &KeyPath) -> TrieResult<bool> {
        let list = self.leaf(path)?;
        let removed = remove_first(&list, handle);
        tracing::debug!(%path, %handle, removed, "unregister");
        Ok(removed)
    }

    /// Deliver `fact` to every handle registered at `path`, serially.
    ///
    /// Fails only when `path` does not resolve to a registration leaf.
    /// Handles that fail delivery are evicted and logged.
    pub fn post(&self, fact: &Fact, path: &KeyPath, invoker: &dyn Invoker) -> TrieResult<()> {
        let list = self.leaf(path)?;
        let snapshot: Vec<Handle> = lock(&list).clone();

        let args = json!({ "fact": fact, "keys": path });

        for handle in &snapshot {
            match invoker.invoke(handle, methods::POSIT, args.clone()) {
                Ok(_) => {
                    self.counters.deliveries.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    if remove_first(&list, handle) {
                        self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                    }
                    tracing::warn!(%path, %handle, error = %e, "evicting unreachable subscriber");
                }
            }
        }

        self.counters.posts.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(%path, subscribers = snapshot.len(), "posted fact");
        Ok(())
    }

    /// Current subscribers at `path`, in registration order.
    pub fn subscribers(&self, path: &KeyPath) -> TrieResult<Vec<Handle>> {
        let list = self.leaf(path)?;
        let handles = lock(&list).clone();
        Ok(handles)
    }

    /// Copy of the whole registration trie.
    pub fn snapshot(&self) -> FactTrie<Vec<Handle>> {
        let trie = self.trie.read().unwrap_or_else(PoisonError::into_inner);
        trie.map(|list| lock(list).clone())
    }

    /// Drop empty subscriber lists and the branches left empty by that.
    /// Returns how many lists were dropped. Never called implicitly.
    pub fn compact(&self) -> usize {
        let mut trie = self.trie.write().unwrap_or_else(PoisonError::into_inner);
        let dropped = trie.prune(|list| lock(list).is_empty());
        tracing::debug!(dropped, "compacted ontology");
        dropped
    }

    /// Number of registration leaves, empty ones included.
    pub fn path_count(&self) -> usize {
        self.trie.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Snapshot of the traffic counters since creation.
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            posts: self.counters.posts.load(Ordering::Relaxed),
            deliveries: self.counters.deliveries.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }

    /// Resolve the live list at `path` without creating anything.
    fn leaf(&self, path: &KeyPath) -> TrieResult<SubscriberList> {
        let trie = self.trie.read().unwrap_or_else(PoisonError::into_inner);
        trie.get(path).map(Arc::clone)
    }
}

impl std::fmt::Debug for OntologyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OntologyRegistry")
            .field("paths", &self.path_count())
            .field("stats", &self.stats())
            .finish()
    }
}

fn lock(list: &SubscriberList) -> MutexGuard<'_, Vec<Handle>> {
    list.lock().unwrap_or_else(PoisonError::into_inner)
}

fn remove_first(list: &SubscriberList, handle: &Handle) -> bool {
    let mut handles = lock(list);
    match handles.iter().position(|h| h == handle) {
        Some(idx) => {
            handles.remove(idx);
            true
        }
        None => false,
    }
}
