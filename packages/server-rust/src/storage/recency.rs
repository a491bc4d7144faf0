//! LRU recency list: an index-based doubly linked list over keys.
//!
//! Nodes live in a dense arena (`Vec<Option<Node>>`) and link to each other
//! by index, which keeps the structure `unsafe`-free and the slots reusable
//! through a free list. All operations the store needs are O(1): touch an
//! existing key, insert a new key at the front, remove a key, pop the least
//! recent key from the tail.
//!
//! The list stores keys only. The store is responsible for keeping it in
//! lockstep with the entry map: a key is present here iff it is present
//! there, exactly once each.

use std::collections::HashMap;

/// One linked-list node in the arena.
#[derive(Debug)]
struct Node {
    key: String,
    /// Towards the front (more recent).
    prev: Option<usize>,
    /// Towards the tail (less recent).
    next: Option<usize>,
}

/// Doubly linked recency order over keys, most recent at the front.
#[derive(Debug, Default)]
pub struct RecencyList {
    /// Key to arena slot.
    index: HashMap<String, usize>,
    /// Dense node arena; `None` marks a recycled slot.
    nodes: Vec<Option<Node>>,
    /// Recycled slots available for reuse.
    free: Vec<usize>,
    /// Most recently used.
    head: Option<usize>,
    /// Least recently used.
    tail: Option<usize>,
}

impl RecencyList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether no keys are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Whether `key` is tracked.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Marks `key` as most recently used. Returns `false` if it is not
    /// tracked.
    pub fn touch(&mut self, key: &str) -> bool {
        let Some(&slot) = self.index.get(key) else {
            return false;
        };
        self.unlink(slot);
        self.link_front(slot);
        true
    }

    /// Inserts a new key at the front. Existing keys are touched instead, so
    /// the one-slot-per-key invariant holds either way.
    pub fn insert(&mut self, key: &str) {
        if self.touch(key) {
            return;
        }
        let node = Node {
            key: key.to_string(),
            prev: None,
            next: None,
        };
        let slot = if let Some(slot) = self.free.pop() {
            self.nodes[slot] = Some(node);
            slot
        } else {
            self.nodes.push(Some(node));
            self.nodes.len() - 1
        };
        self.index.insert(key.to_string(), slot);
        self.link_front(slot);
    }

    /// Removes a key from the list. Returns `false` if it was not tracked.
    pub fn remove(&mut self, key: &str) -> bool {
        let Some(slot) = self.index.remove(key) else {
            return false;
        };
        self.unlink(slot);
        self.nodes[slot] = None;
        self.free.push(slot);
        true
    }

    /// Removes and returns the least recently used key.
    pub fn pop_least_recent(&mut self) -> Option<String> {
        let slot = self.tail?;
        self.unlink(slot);
        let node = self.nodes[slot].take().expect("tail slot occupied");
        self.free.push(slot);
        self.index.remove(&node.key);
        Some(node.key)
    }

    /// Drops every key.
    pub fn clear(&mut self) {
        self.index.clear();
        self.nodes.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }

    /// Keys from most to least recent. For tests and introspection; O(n).
    #[must_use]
    pub fn keys_most_recent_first(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.index.len());
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            let node = self.nodes[slot].as_ref().expect("linked slot occupied");
            keys.push(node.key.clone());
            cursor = node.next;
        }
        keys
    }

    /// Detaches `slot` from its neighbours without recycling it.
    fn unlink(&mut self, slot: usize) {
        let (prev, next) = {
            let node = self.nodes[slot].as_ref().expect("slot occupied");
            (node.prev, node.next)
        };
        match prev {
            Some(p) => {
                if let Some(n) = self.nodes[p].as_mut() {
                    n.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(x) => {
                if let Some(n) = self.nodes[x].as_mut() {
                    n.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(n) = self.nodes[slot].as_mut() {
            n.prev = None;
            n.next = None;
        }
    }

    /// Links a detached `slot` in as the new head.
    fn link_front(&mut self, slot: usize) {
        let old_head = self.head;
        if let Some(n) = self.nodes[slot].as_mut() {
            n.prev = None;
            n.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(n) = self.nodes[h].as_mut() {
                n.prev = Some(slot);
            }
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn insert_orders_most_recent_first() {
        let mut list = RecencyList::new();
        list.insert("a");
        list.insert("b");
        list.insert("c");
        assert_eq!(list.keys_most_recent_first(), vec!["c", "b", "a"]);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn touch_moves_key_to_front() {
        let mut list = RecencyList::new();
        list.insert("a");
        list.insert("b");
        list.insert("c");

        assert!(list.touch("a"));
        assert_eq!(list.keys_most_recent_first(), vec!["a", "c", "b"]);
    }

    #[test]
    fn touch_unknown_key_is_a_no_op() {
        let mut list = RecencyList::new();
        list.insert("a");
        assert!(!list.touch("zzz"));
        assert_eq!(list.keys_most_recent_first(), vec!["a"]);
    }

    #[test]
    fn pop_least_recent_walks_the_tail() {
        let mut list = RecencyList::new();
        list.insert("a");
        list.insert("b");
        list.insert("c");
        list.touch("a"); // order now a, c, b

        assert_eq!(list.pop_least_recent().as_deref(), Some("b"));
        assert_eq!(list.pop_least_recent().as_deref(), Some("c"));
        assert_eq!(list.pop_least_recent().as_deref(), Some("a"));
        assert_eq!(list.pop_least_recent(), None);
        assert!(list.is_empty());
    }

    #[test]
    fn remove_middle_key_relinks_neighbours() {
        let mut list = RecencyList::new();
        list.insert("a");
        list.insert("b");
        list.insert("c");

        assert!(list.remove("b"));
        assert!(!list.remove("b"));
        assert_eq!(list.keys_most_recent_first(), vec!["c", "a"]);
        assert_eq!(list.pop_least_recent().as_deref(), Some("a"));
        assert_eq!(list.pop_least_recent().as_deref(), Some("c"));
    }

    #[test]
    fn reinsert_after_remove_reuses_slots() {
        let mut list = RecencyList::new();
        list.insert("a");
        list.insert("b");
        list.remove("a");
        list.insert("c");

        // The arena should not have grown past two slots.
        assert_eq!(list.nodes.len(), 2);
        assert_eq!(list.keys_most_recent_first(), vec!["c", "b"]);
    }

    #[test]
    fn insert_existing_key_acts_as_touch() {
        let mut list = RecencyList::new();
        list.insert("a");
        list.insert("b");
        list.insert("a");

        assert_eq!(list.len(), 2);
        assert_eq!(list.keys_most_recent_first(), vec!["a", "b"]);
    }

    #[test]
    fn clear_empties_everything() {
        let mut list = RecencyList::new();
        list.insert("a");
        list.insert("b");
        list.clear();

        assert!(list.is_empty());
        assert_eq!(list.pop_least_recent(), None);
        list.insert("c");
        assert_eq!(list.keys_most_recent_first(), vec!["c"]);
    }

    #[test]
    fn single_key_is_both_head_and_tail() {
        let mut list = RecencyList::new();
        list.insert("only");
        assert!(list.touch("only"));
        assert_eq!(list.pop_least_recent().as_deref(), Some("only"));
    }

    proptest! {
        /// Whatever the operation sequence, the index and the linked order
        /// must agree on the tracked key set.
        #[test]
        fn index_and_links_stay_consistent(ops in prop::collection::vec((0_u8..4, 0_u8..8), 0..64)) {
            let mut list = RecencyList::new();
            for (op, k) in ops {
                let key = format!("k{k}");
                match op {
                    0 => list.insert(&key),
                    1 => { list.touch(&key); }
                    2 => { list.remove(&key); }
                    _ => { list.pop_least_recent(); }
                }
                let walked = list.keys_most_recent_first();
                prop_assert_eq!(walked.len(), list.len());
                for key in &walked {
                    prop_assert!(list.contains(key));
                }
            }
        }
    }
}
