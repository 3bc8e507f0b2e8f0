//! N-level fact trie keyed by [`KeyPath`]s.
//!
//! A node is either a branch (token → child node) or a leaf payload. The
//! engine's ontology stores subscriber lists at its leaves; every rule keeps a
//! private trie whose leaves are facts. Writes create intermediate branches on
//! demand and nothing is ever pruned implicitly: empty branches stay until an
//! owner calls [`FactTrie::prune`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{TrieError, TrieResult};
use crate::key::{KeyPath, Token};

/// One trie node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    rename_all = "snake_case",
    bound(serialize = "T: Serialize", deserialize = "T: Deserialize<'de>")
)]
pub enum Node<T> {
    Branch(#[serde(with = "entries")] HashMap<Token, Node<T>>),
    Leaf(T),
}

/// A trie whose full paths terminate at payloads of type `T`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: Deserialize<'de>"))]
pub struct FactTrie<T> {
    #[serde(with = "entries")]
    root: HashMap<Token, Node<T>>,
}

impl<T> Default for FactTrie<T> {
    fn default() -> Self {
        Self {
            root: HashMap::new(),
        }
    }
}

impl<T> FactTrie<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the top level holds no entries.
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Look up the payload at `path`.
    ///
    /// Any path that does not end exactly at a leaf is a `PathNotFound`,
    /// including one that stops at a branch or runs past a leaf. Only writes
    /// report `ShapeConflict`.
    pub fn get(&self, path: &KeyPath) -> TrieResult<&T> {
        let (prefix, last) = path.split_last();
        let mut level = &self.root;
        for token in prefix {
            level = match level.get(token) {
                Some(Node::Branch(children)) => children,
                _ => return Err(not_found(path)),
            };
        }
        match level.get(last) {
            Some(Node::Leaf(value)) => Ok(value),
            _ => Err(not_found(path)),
        }
    }

    /// Mutable lookup; never creates nodes.
    pub fn get_mut(&mut self, path: &KeyPath) -> TrieResult<&mut T> {
        let (prefix, last) = path.split_last();
        let mut level = &mut self.root;
        for token in prefix {
            level = match level.get_mut(token) {
                Some(Node::Branch(children)) => children,
                _ => return Err(not_found(path)),
            };
        }
        match level.get_mut(last) {
            Some(Node::Leaf(value)) => Ok(value),
            _ => Err(not_found(path)),
        }
    }

    /// Walk `path`, creating missing branches, and return the leaf payload,
    /// inserting `make()` if the terminal token is absent.
    pub fn get_or_insert_with(
        &mut self,
        path: &KeyPath,
        make: impl FnOnce() -> T,
    ) -> TrieResult<&mut T> {
        let (prefix, last) = path.split_last();
        let level = self.branch_mut(path, prefix)?;
        match level
            .entry(last.clone())
            .or_insert_with(|| Node::Leaf(make()))
        {
            Node::Leaf(value) => Ok(value),
            Node::Branch(_) => Err(shape_conflict(path, prefix.len())),
        }
    }

    /// Store `value` at `path`, creating branches as needed. Returns the
    /// payload it replaced, if any.
    pub fn insert(&mut self, path: &KeyPath, value: T) -> TrieResult<Option<T>> {
        let (prefix, last) = path.split_last();
        let level = self.branch_mut(path, prefix)?;
        match level.get(last) {
            Some(Node::Branch(_)) => Err(shape_conflict(path, prefix.len())),
            _ => Ok(match level.insert(last.clone(), Node::Leaf(value)) {
                Some(Node::Leaf(old)) => Some(old),
                _ => None,
            }),
        }
    }

    /// Remove the leaf at `path`. Branches above it are kept.
    pub fn remove(&mut self, path: &KeyPath) -> TrieResult<T> {
        let (prefix, last) = path.split_last();
        let mut level = &mut self.root;
        for token in prefix {
            level = match level.get_mut(token) {
                Some(Node::Branch(children)) => children,
                _ => return Err(not_found(path)),
            };
        }
        if !matches!(level.get(last), Some(Node::Leaf(_))) {
            return Err(not_found(path));
        }
        match level.remove(last) {
            Some(Node::Leaf(value)) => Ok(value),
            _ => Err(not_found(path)),
        }
    }

    /// Every leaf with its full path, in no particular order.
    pub fn leaves(&self) -> Vec<(KeyPath, &T)> {
        let mut out = Vec::new();
        let mut prefix = Vec::new();
        collect_leaves(&self.root, &mut prefix, &mut out);
        out
    }

    /// Number of leaves.
    pub fn len(&self) -> usize {
        fn count<T>(level: &HashMap<Token, Node<T>>) -> usize {
            level
                .values()
                .map(|node| match node {
                    Node::Leaf(_) => 1,
                    Node::Branch(children) => count(children),
                })
                .sum()
        }
        count(&self.root)
    }

    /// Drop leaves for which `is_empty` holds, then any branch left without
    /// children. Returns how many leaves were dropped.
    pub fn prune(&mut self, is_empty: impl Fn(&T) -> bool + Copy) -> usize {
        fn prune_level<T>(
            level: &mut HashMap<Token, Node<T>>,
            is_empty: impl Fn(&T) -> bool + Copy,
        ) -> usize {
            let mut dropped = 0;
            level.retain(|_, node| match node {
                Node::Leaf(value) => {
                    if is_empty(&*value) {
                        dropped += 1;
                        false
                    } else {
                        true
                    }
                }
                Node::Branch(children) => {
                    dropped += prune_level(children, is_empty);
                    !children.is_empty()
                }
            });
            dropped
        }
        prune_level(&mut self.root, is_empty)
    }

    /// Map every leaf payload into a new trie of the same shape.
    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> FactTrie<U> {
        fn map_level<T, U>(
            level: &HashMap<Token, Node<T>>,
            f: &mut impl FnMut(&T) -> U,
        ) -> HashMap<Token, Node<U>> {
            level
                .iter()
                .map(|(token, node)| {
                    let mapped = match node {
                        Node::Leaf(value) => Node::Leaf(f(value)),
                        Node::Branch(children) => Node::Branch(map_level(children, f)),
                    };
                    (token.clone(), mapped)
                })
                .collect()
        }
        FactTrie {
            root: map_level(&self.root, &mut f),
        }
    }

    /// Walk `prefix` creating branches; the returned map is where the
    /// terminal token of `path` lives.
    fn branch_mut(
        &mut self,
        path: &KeyPath,
        prefix: &[Token],
    ) -> TrieResult<&mut HashMap<Token, Node<T>>> {
        let mut level = &mut self.root;
        for (depth, token) in prefix.iter().enumerate() {
            let node = level
                .entry(token.clone())
                .or_insert_with(|| Node::Branch(HashMap::new()));
            level = match node {
                Node::Branch(children) => children,
                Node::Leaf(_) => return Err(shape_conflict(path, depth)),
            };
        }
        Ok(level)
    }
}

fn collect_leaves<'a, T>(
    level: &'a HashMap<Token, Node<T>>,
    prefix: &mut Vec<Token>,
    out: &mut Vec<(KeyPath, &'a T)>,
) {
    for (token, node) in level {
        prefix.push(token.clone());
        match node {
            Node::Leaf(value) => {
                if let Ok(path) = KeyPath::new(prefix.iter().cloned()) {
                    out.push((path, value));
                }
            }
            Node::Branch(children) => collect_leaves(children, prefix, out),
        }
        prefix.pop();
    }
}

fn not_found(path: &KeyPath) -> TrieError {
    TrieError::PathNotFound {
        path: path.to_string(),
    }
}

fn shape_conflict(path: &KeyPath, depth: usize) -> TrieError {
    TrieError::ShapeConflict {
        path: path.to_string(),
        depth,
    }
}

/// Serialize token maps as `(token, node)` entry lists so integer tokens
/// survive formats whose map keys must be strings.
mod entries {
    use std::collections::HashMap;
    use std::hash::Hash;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<K, V, S>(map: &HashMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        K: Serialize,
        V: Serialize,
        S: Serializer,
    {
        serializer.collect_seq(map.iter())
    }

    pub fn deserialize<'de, K, V, D>(deserializer: D) -> Result<HashMap<K, V>, D::Error>
    where
        K: Deserialize<'de> + Eq + Hash,
        V: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        let entries: Vec<(K, V)> = Vec::deserialize(deserializer)?;
        Ok(entries.into_iter().collect())
    }
}
