//! Stateless router over the shard set.
//!
//! Maps every key to exactly one store via the shard-hash contract and
//! aggregates read-only views across shards. The router holds shared
//! references to the stores and no mutable state of its own, so it is
//! freely cloneable and reentrant. There is no cross-shard atomicity:
//! aggregations read each shard independently.

use std::collections::BTreeSet;
use std::sync::Arc;

use kvgrid_core::routing::{ShardLookup, ShardTable};

use crate::storage::{Store, StoreInfo};

/// Consistent-hash front over N shard stores.
#[derive(Debug, Clone)]
pub struct Router {
    table: ShardTable,
    stores: Vec<Arc<Store>>,
}

impl Router {
    /// Builds a router over `stores`, in configuration order.
    ///
    /// # Panics
    ///
    /// Panics if `stores` is empty; engine assembly validates the shard
    /// list before any store is built.
    #[must_use]
    pub fn new(stores: Vec<Arc<Store>>) -> Self {
        let table = ShardTable::new(stores.iter().map(|s| s.name().to_string()).collect());
        Self { table, stores }
    }

    /// The store owning `key`.
    #[must_use]
    pub fn route(&self, key: &str) -> &Arc<Store> {
        &self.stores[self.table.shard_for_key(key)]
    }

    /// A store by shard name, if configured.
    #[must_use]
    pub fn store_by_name(&self, name: &str) -> Option<&Arc<Store>> {
        self.table.position(name).map(|i| &self.stores[i])
    }

    /// All stores in configuration order.
    #[must_use]
    pub fn stores(&self) -> &[Arc<Store>] {
        &self.stores
    }

    /// The shard table backing this router.
    #[must_use]
    pub fn table(&self) -> &ShardTable {
        &self.table
    }

    /// Set union of every shard's live keys.
    #[must_use]
    pub fn all_keys(&self) -> BTreeSet<String> {
        self.stores
            .iter()
            .flat_map(|store| store.keys())
            .collect()
    }

    /// Per-shard statistics, in configuration order.
    #[must_use]
    pub fn info(&self) -> Vec<StoreInfo> {
        self.stores.iter().map(|store| store.info()).collect()
    }
}

#[cfg(test)]
mod tests {
    use kvgrid_core::types::Value;

    use super::*;

    fn three_shard_router() -> Router {
        Router::new(vec![
            Arc::new(Store::new("node1", 100)),
            Arc::new(Store::new("node2", 100)),
            Arc::new(Store::new("node3", 100)),
        ])
    }

    #[test]
    fn route_is_deterministic_and_stable() {
        let a = three_shard_router();
        let b = three_shard_router();
        for key in ["user:1", "user:2", "user:3", "", "x"] {
            assert_eq!(
                a.route(key).name(),
                b.route(key).name(),
                "placement of {key:?} must not depend on the router instance"
            );
        }
    }

    #[test]
    fn each_key_lands_on_exactly_one_shard() {
        let router = three_shard_router();
        router.route("user:1").set("user:1", Value::string("Alice"), None);
        router.route("user:2").set("user:2", Value::string("Bob"), None);
        router.route("user:3").set("user:3", Value::string("Carol"), None);

        let mut owners = 0;
        for store in router.stores() {
            let keys = store.keys();
            if keys.contains(&"user:1".to_string()) {
                owners += 1;
            }
        }
        assert_eq!(owners, 1);
    }

    #[test]
    fn all_keys_unions_the_shards() {
        let router = three_shard_router();
        router.route("user:1").set("user:1", Value::string("Alice"), None);
        router.route("user:2").set("user:2", Value::string("Bob"), None);
        router.route("user:3").set("user:3", Value::string("Carol"), None);

        let keys = router.all_keys();
        assert_eq!(keys.len(), 3);
        assert!(keys.contains("user:1"));
        assert!(keys.contains("user:2"));
        assert!(keys.contains("user:3"));
    }

    #[test]
    fn store_by_name_resolves_configured_shards() {
        let router = three_shard_router();
        assert_eq!(router.store_by_name("node2").unwrap().name(), "node2");
        assert!(router.store_by_name("node9").is_none());
    }

    #[test]
    fn info_covers_every_shard_in_order() {
        let router = three_shard_router();
        router.route("user:1").set("user:1", Value::string("Alice"), None);

        let infos = router.info();
        assert_eq!(infos.len(), 3);
        assert_eq!(infos[0].name, "node1");
        assert_eq!(infos[2].name, "node3");
        let total: usize = infos.iter().map(|i| i.entries).sum();
        assert_eq!(total, 1);
    }

    #[test]
    fn router_clone_shares_the_stores() {
        let router = three_shard_router();
        let clone = router.clone();
        router.route("k").set("k", Value::string("v"), None);
        assert_eq!(clone.route("k").get("k"), Some(Value::string("v")));
    }

    #[test]
    #[should_panic(expected = "at least one shard")]
    fn empty_router_panics() {
        let _ = Router::new(Vec::new());
    }
}
