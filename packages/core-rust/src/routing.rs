//! Shard table: ordered shard names with deterministic key resolution.
//!
//! A cluster is a fixed, configuration-ordered list of shard names. Key
//! placement is a pure function of the key and that list (via
//! [`shard_index`]), so routing is stable across restarts as long as the
//! configuration does not rename or reorder shards. This module provides:
//!
//! - [`ShardLookup`]: read-only placement queries
//! - [`ShardTable`]: the concrete ordered-name table

use crate::hash::shard_index;

/// Default shard names for a three-shard cluster.
pub const DEFAULT_SHARDS: [&str; 3] = ["node1", "node2", "node3"];

/// Read-only key-placement queries.
pub trait ShardLookup {
    /// Index of the shard owning `key`.
    fn shard_for_key(&self, key: &str) -> usize;

    /// Number of shards in the table.
    fn shard_count(&self) -> usize;

    /// Name of the shard at `index`, if in range.
    fn shard_name(&self, index: usize) -> Option<&str>;
}

/// Ordered shard-name table.
///
/// The order is the configuration order and is load-bearing: it defines the
/// modulo mapping from hash to shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardTable {
    names: Vec<String>,
}

impl ShardTable {
    /// Creates a table from configuration-ordered shard names.
    ///
    /// # Panics
    ///
    /// Panics if `names` is empty; an empty cluster cannot place keys.
    /// Configuration validation upstream reports this as a config error
    /// before a table is ever built.
    #[must_use]
    pub fn new(names: Vec<String>) -> Self {
        assert!(!names.is_empty(), "shard table requires at least one shard");
        Self { names }
    }

    /// Name of the shard owning `key`.
    #[must_use]
    pub fn shard_name_for_key(&self, key: &str) -> &str {
        &self.names[self.shard_for_key(key)]
    }

    /// All shard names in configuration order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Position of a shard by name, if present.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

impl Default for ShardTable {
    fn default() -> Self {
        Self::new(DEFAULT_SHARDS.iter().map(ToString::to_string).collect())
    }
}

impl ShardLookup for ShardTable {
    fn shard_for_key(&self, key: &str) -> usize {
        shard_index(key, self.names.len())
    }

    fn shard_count(&self) -> usize {
        self.names.len()
    }

    fn shard_name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }
}
