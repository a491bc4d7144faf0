//! The per-shard store: key/value operations with TTL, LRU capacity,
//! pub/sub, and commit-order mutation events.
//!
//! One `parking_lot::Mutex` around the interior serializes every operation,
//! which is the single-owner discipline the LRU and TTL invariants rest on.
//! Three indexes are kept in lockstep under that lock:
//!
//! - the entry map (key to value + expiry)
//! - the recency list (LRU order; a key is present iff it is in the map)
//! - the deadline index (`BTreeSet<(deadline, key)>` for the expirer)
//!
//! Successful mutations notify the registered [`MutationObserver`]s while
//! the lock is still held, so observers see mutations in commit order --
//! this is what makes the replication stream FIFO per connection. Observers
//! must be quick and must not call back into the store. Pub/sub delivery,
//! by contrast, runs outside the lock (see [`super::pubsub`]), so handlers
//! are free to reenter.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use kvgrid_core::messages::ReplicationCommand;
use kvgrid_core::types::{Value, ValueKind};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::StoreError;

use super::entry::{now_millis, Entry};
use super::events::MutationObserver;
use super::pubsub::{ChannelTable, SubscriberFn, Subscription};
use super::recency::RecencyList;

/// Point-in-time statistics for one store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreInfo {
    /// Shard name.
    pub name: String,
    /// Entries currently resident (including expired-but-unreaped).
    pub entries: usize,
    /// Configured capacity.
    pub max_entries: usize,
    /// Entries carrying an expiration deadline.
    pub expiring: usize,
    /// Channels with at least one subscriber.
    pub channels: usize,
    /// Total pub/sub subscribers.
    pub subscribers: usize,
    /// Operations processed since startup (reads and writes).
    pub commands_processed: u64,
}

/// A snapshot of one live entry for replication resync: key, value, and
/// remaining TTL in seconds if the entry expires.
pub type SyncEntry = (String, Value, Option<i64>);

struct Inner {
    entries: HashMap<String, Entry>,
    recency: RecencyList,
    deadlines: BTreeSet<(i64, String)>,
    observers: Vec<Arc<dyn MutationObserver>>,
    mutation_seq: u64,
    commands_processed: u64,
}

impl Inner {
    /// Removes `key` if its deadline has passed; returns whether it did.
    fn purge_if_expired(&mut self, key: &str, now: i64) -> bool {
        let expired = self.entries.get(key).is_some_and(|e| e.is_expired(now));
        if expired {
            self.remove_key(key);
        }
        expired
    }

    /// Removes `key` from all three indexes, returning the entry.
    fn remove_key(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(key);
        if let Some(deadline) = entry.expires_at {
            self.deadlines.remove(&(deadline, key.to_string()));
        }
        Some(entry)
    }

    /// Inserts or replaces `key`, keeping the deadline index and recency
    /// list in lockstep. The key becomes most recently used.
    fn insert_entry(&mut self, key: &str, entry: Entry) {
        if let Some(old) = self.entries.get(key) {
            if let Some(deadline) = old.expires_at {
                self.deadlines.remove(&(deadline, key.to_string()));
            }
        }
        if let Some(deadline) = entry.expires_at {
            self.deadlines.insert((deadline, key.to_string()));
        }
        self.entries.insert(key.to_string(), entry);
        self.recency.insert(key);
    }

    /// Rewrites the deadline of an existing entry in both the entry and the
    /// index.
    fn set_deadline(&mut self, key: &str, new_deadline: Option<i64>) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        if let Some(old) = entry.expires_at {
            self.deadlines.remove(&(old, key.to_string()));
        }
        entry.expires_at = new_deadline;
        if let Some(deadline) = new_deadline {
            self.deadlines.insert((deadline, key.to_string()));
        }
    }

    /// Evicts the least recently used key, never the protected one.
    fn evict_one(&mut self, protect: &str) -> Option<String> {
        let victim = self.recency.pop_least_recent()?;
        if victim == protect {
            // Only reachable when the protected key is the sole resident.
            self.recency.insert(&victim);
            return None;
        }
        if let Some(entry) = self.entries.remove(&victim) {
            if let Some(deadline) = entry.expires_at {
                self.deadlines.remove(&(deadline, victim.clone()));
            }
        }
        Some(victim)
    }

    /// Notifies observers of a committed mutation, in commit order.
    fn notify(&mut self, store_name: &str, command: &ReplicationCommand) {
        self.mutation_seq += 1;
        let seq = self.mutation_seq;
        for observer in &self.observers {
            observer.on_mutation(store_name, seq, command);
        }
    }
}

/// One shard's store.
pub struct Store {
    name: String,
    max_entries: usize,
    inner: Mutex<Inner>,
    channels: Arc<ChannelTable>,
}

impl Store {
    /// Creates an empty store.
    ///
    /// # Panics
    ///
    /// Panics if `max_entries` is zero; configuration validation reports
    /// that as a config error before any store is built.
    #[must_use]
    pub fn new(name: impl Into<String>, max_entries: usize) -> Self {
        assert!(max_entries > 0, "store capacity must be non-zero");
        Self {
            name: name.into(),
            max_entries,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                recency: RecencyList::new(),
                deadlines: BTreeSet::new(),
                observers: Vec::new(),
                mutation_seq: 0,
                commands_processed: 0,
            }),
            channels: Arc::new(ChannelTable::new()),
        }
    }

    /// Shard name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured capacity.
    #[must_use]
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Registers an observer for this store's committed mutations.
    pub fn register_observer(&self, observer: Arc<dyn MutationObserver>) {
        self.inner.lock().observers.push(observer);
    }

    // --- String / generic operations ---

    /// Creates or replaces the entry under `key`. Any prior value and its
    /// type are discarded; a TTL below zero means no expiration.
    pub fn set(&self, key: &str, value: Value, ttl_seconds: Option<i64>) {
        let now = now_millis();
        let ttl = ttl_seconds.filter(|t| *t >= 0);
        let expires_at = ttl.map(|t| now + t * 1000);
        let mut inner = self.inner.lock();
        inner.commands_processed += 1;
        let entry = Entry {
            value: value.clone(),
            expires_at,
        };
        inner.insert_entry(key, entry);
        if inner.entries.len() > self.max_entries {
            if let Some(victim) = inner.evict_one(key) {
                debug!(store = %self.name, key = %victim, "evicted least recently used key");
            }
        }
        inner.notify(&self.name, &ReplicationCommand::Set {
            key: key.to_string(),
            value,
            ttl_seconds: ttl,
        });
    }

    /// Returns the value under `key` if present and unexpired, recording
    /// recency on a hit.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = now_millis();
        let mut inner = self.inner.lock();
        inner.commands_processed += 1;
        if inner.purge_if_expired(key, now) {
            return None;
        }
        let value = inner.entries.get(key).map(|e| e.value.clone());
        if value.is_some() {
            inner.recency.touch(key);
        }
        value
    }

    /// Removes the entry under `key`; returns whether one was removed.
    pub fn delete(&self, key: &str) -> bool {
        let now = now_millis();
        let mut inner = self.inner.lock();
        inner.commands_processed += 1;
        inner.purge_if_expired(key, now);
        let removed = inner.remove_key(key).is_some();
        if removed {
            inner.notify(&self.name, &ReplicationCommand::Delete {
                key: key.to_string(),
            });
        }
        removed
    }

    /// Whether `key` holds a live entry.
    #[must_use]
    pub fn exists(&self, key: &str) -> bool {
        let now = now_millis();
        let mut inner = self.inner.lock();
        inner.commands_processed += 1;
        if inner.purge_if_expired(key, now) {
            return false;
        }
        inner.entries.contains_key(key)
    }

    /// Remaining TTL in seconds: `-2` if absent, `-1` if present without
    /// expiry, otherwise the (rounded-up) seconds left.
    #[must_use]
    pub fn ttl(&self, key: &str) -> i64 {
        let now = now_millis();
        let mut inner = self.inner.lock();
        inner.commands_processed += 1;
        if inner.purge_if_expired(key, now) {
            return -2;
        }
        match inner.entries.get(key) {
            None => -2,
            Some(entry) => entry.remaining_ttl_secs(now).unwrap_or(-1),
        }
    }

    /// Sets an absolute expiration `ttl_seconds` from now on an existing
    /// entry; returns whether it was set. A TTL at or below zero expires the
    /// entry at the next access or sweep.
    pub fn expire(&self, key: &str, ttl_seconds: i64) -> bool {
        let now = now_millis();
        let mut inner = self.inner.lock();
        inner.commands_processed += 1;
        if inner.purge_if_expired(key, now) || !inner.entries.contains_key(key) {
            return false;
        }
        inner.set_deadline(key, Some(now + ttl_seconds * 1000));
        inner.recency.touch(key);
        inner.notify(&self.name, &ReplicationCommand::Expire {
            key: key.to_string(),
            ttl_seconds,
        });
        true
    }

    /// Increments the integer string under `key` by one (missing keys count
    /// from zero) and returns the new value.
    ///
    /// # Errors
    ///
    /// [`StoreError::WrongType`] for non-string entries,
    /// [`StoreError::NotInteger`] when the string does not parse (or the
    /// arithmetic would overflow).
    pub fn incr(&self, key: &str) -> Result<i64, StoreError> {
        self.add_to_string(key, 1, ReplicationCommand::Incr {
            key: key.to_string(),
        })
    }

    /// Decrements the integer string under `key` by one; see [`Self::incr`].
    ///
    /// # Errors
    ///
    /// Same conditions as [`Self::incr`].
    pub fn decr(&self, key: &str) -> Result<i64, StoreError> {
        self.add_to_string(key, -1, ReplicationCommand::Decr {
            key: key.to_string(),
        })
    }

    fn add_to_string(
        &self,
        key: &str,
        delta: i64,
        record: ReplicationCommand,
    ) -> Result<i64, StoreError> {
        let now = now_millis();
        let mut inner = self.inner.lock();
        inner.commands_processed += 1;
        inner.purge_if_expired(key, now);
        let current = match inner.entries.get(key) {
            None => 0,
            Some(entry) => match &entry.value {
                Value::Str(s) => s.parse::<i64>().map_err(|_| StoreError::NotInteger {
                    value: s.clone(),
                })?,
                other => {
                    return Err(StoreError::WrongType {
                        expected: ValueKind::Str,
                        actual: other.kind(),
                    })
                }
            },
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| StoreError::NotInteger {
                value: current.to_string(),
            })?;
        if let Some(entry) = inner.entries.get_mut(key) {
            entry.value = Value::Str(next.to_string());
            inner.recency.touch(key);
        } else {
            inner.insert_entry(key, Entry::new(Value::Str(next.to_string())));
            if inner.entries.len() > self.max_entries {
                inner.evict_one(key);
            }
        }
        inner.notify(&self.name, &record);
        Ok(next)
    }

    /// Moves the entry under `key` to `new_key`, overwriting any
    /// destination entry and keeping the TTL.
    ///
    /// # Errors
    ///
    /// [`StoreError::MissingKey`] if the source does not exist.
    pub fn rename(&self, key: &str, new_key: &str) -> Result<(), StoreError> {
        let now = now_millis();
        let mut inner = self.inner.lock();
        inner.commands_processed += 1;
        inner.purge_if_expired(key, now);
        inner.purge_if_expired(new_key, now);
        let entry = inner.remove_key(key).ok_or_else(|| StoreError::MissingKey {
            key: key.to_string(),
        })?;
        inner.remove_key(new_key);
        inner.insert_entry(new_key, entry);
        inner.notify(&self.name, &ReplicationCommand::Rename {
            key: key.to_string(),
            new_key: new_key.to_string(),
        });
        Ok(())
    }

    // --- List operations ---

    /// Prepends to the list under `key`, creating it if absent; returns the
    /// new length.
    ///
    /// # Errors
    ///
    /// [`StoreError::WrongType`] for non-list entries.
    pub fn lpush(&self, key: &str, element: &str) -> Result<usize, StoreError> {
        self.list_push(key, element, true)
    }

    /// Appends to the list under `key`; see [`Self::lpush`].
    ///
    /// # Errors
    ///
    /// [`StoreError::WrongType`] for non-list entries.
    pub fn rpush(&self, key: &str, element: &str) -> Result<usize, StoreError> {
        self.list_push(key, element, false)
    }

    fn list_push(&self, key: &str, element: &str, front: bool) -> Result<usize, StoreError> {
        let now = now_millis();
        let mut inner = self.inner.lock();
        inner.commands_processed += 1;
        inner.purge_if_expired(key, now);
        let len = match inner.entries.get_mut(key) {
            None => {
                inner.insert_entry(key, Entry::new(Value::list([element])));
                if inner.entries.len() > self.max_entries {
                    inner.evict_one(key);
                }
                1
            }
            Some(entry) => match &mut entry.value {
                Value::List(list) => {
                    if front {
                        list.push_front(element.to_string());
                    } else {
                        list.push_back(element.to_string());
                    }
                    let len = list.len();
                    inner.recency.touch(key);
                    len
                }
                other => {
                    return Err(StoreError::WrongType {
                        expected: ValueKind::List,
                        actual: other.kind(),
                    })
                }
            },
        };
        let record = if front {
            ReplicationCommand::LPush {
                key: key.to_string(),
                element: element.to_string(),
            }
        } else {
            ReplicationCommand::RPush {
                key: key.to_string(),
                element: element.to_string(),
            }
        };
        inner.notify(&self.name, &record);
        Ok(len)
    }

    /// Removes and returns the front element of the list under `key`, or
    /// `None` when the key is absent. A list emptied by the pop is removed.
    ///
    /// # Errors
    ///
    /// [`StoreError::WrongType`] for non-list entries.
    pub fn lpop(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.list_pop(key, true)
    }

    /// Removes and returns the back element; see [`Self::lpop`].
    ///
    /// # Errors
    ///
    /// [`StoreError::WrongType`] for non-list entries.
    pub fn rpop(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.list_pop(key, false)
    }

    fn list_pop(&self, key: &str, front: bool) -> Result<Option<String>, StoreError> {
        let now = now_millis();
        let mut inner = self.inner.lock();
        inner.commands_processed += 1;
        inner.purge_if_expired(key, now);
        let Some(entry) = inner.entries.get_mut(key) else {
            return Ok(None);
        };
        let popped = match &mut entry.value {
            Value::List(list) => {
                let popped = if front {
                    list.pop_front()
                } else {
                    list.pop_back()
                };
                let emptied = list.is_empty();
                if popped.is_some() {
                    if emptied {
                        inner.remove_key(key);
                    } else {
                        inner.recency.touch(key);
                    }
                }
                popped
            }
            other => {
                return Err(StoreError::WrongType {
                    expected: ValueKind::List,
                    actual: other.kind(),
                })
            }
        };
        if popped.is_some() {
            let record = if front {
                ReplicationCommand::LPop {
                    key: key.to_string(),
                }
            } else {
                ReplicationCommand::RPop {
                    key: key.to_string(),
                }
            };
            inner.notify(&self.name, &record);
        }
        Ok(popped)
    }

    // --- Hash operations ---

    /// Sets one field of the hash under `key`, creating the hash if absent.
    /// Returns 1 when the field is new, 0 when it was updated.
    ///
    /// # Errors
    ///
    /// [`StoreError::WrongType`] for non-hash entries.
    pub fn hset(&self, key: &str, field: &str, value: &str) -> Result<u64, StoreError> {
        let now = now_millis();
        let mut inner = self.inner.lock();
        inner.commands_processed += 1;
        inner.purge_if_expired(key, now);
        let created = match inner.entries.get_mut(key) {
            None => {
                inner.insert_entry(key, Entry::new(Value::hash([(field, value)])));
                if inner.entries.len() > self.max_entries {
                    inner.evict_one(key);
                }
                1
            }
            Some(entry) => match &mut entry.value {
                Value::Hash(hash) => {
                    let new = u64::from(
                        hash.insert(field.to_string(), value.to_string()).is_none(),
                    );
                    inner.recency.touch(key);
                    new
                }
                other => {
                    return Err(StoreError::WrongType {
                        expected: ValueKind::Hash,
                        actual: other.kind(),
                    })
                }
            },
        };
        inner.notify(&self.name, &ReplicationCommand::HSet {
            key: key.to_string(),
            field: field.to_string(),
            value: value.to_string(),
        });
        Ok(created)
    }

    /// Returns one field of the hash under `key`, or `None` when the key or
    /// field is absent.
    ///
    /// # Errors
    ///
    /// [`StoreError::WrongType`] for non-hash entries.
    pub fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let now = now_millis();
        let mut inner = self.inner.lock();
        inner.commands_processed += 1;
        inner.purge_if_expired(key, now);
        match inner.entries.get(key) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                Value::Hash(hash) => Ok(hash.get(field).cloned()),
                other => Err(StoreError::WrongType {
                    expected: ValueKind::Hash,
                    actual: other.kind(),
                }),
            },
        }
    }

    /// Removes one field of the hash under `key`; returns the number of
    /// fields removed (0 or 1). A hash emptied by the removal is deleted.
    ///
    /// # Errors
    ///
    /// [`StoreError::WrongType`] for non-hash entries.
    pub fn hdel(&self, key: &str, field: &str) -> Result<u64, StoreError> {
        let now = now_millis();
        let mut inner = self.inner.lock();
        inner.commands_processed += 1;
        inner.purge_if_expired(key, now);
        let Some(entry) = inner.entries.get_mut(key) else {
            return Ok(0);
        };
        let removed = match &mut entry.value {
            Value::Hash(hash) => {
                let removed = u64::from(hash.remove(field).is_some());
                let emptied = hash.is_empty();
                if removed == 1 {
                    if emptied {
                        inner.remove_key(key);
                    } else {
                        inner.recency.touch(key);
                    }
                }
                removed
            }
            other => {
                return Err(StoreError::WrongType {
                    expected: ValueKind::Hash,
                    actual: other.kind(),
                })
            }
        };
        if removed == 1 {
            inner.notify(&self.name, &ReplicationCommand::HDel {
                key: key.to_string(),
                field: field.to_string(),
            });
        }
        Ok(removed)
    }

    /// Returns a snapshot of all fields of the hash under `key`; an absent
    /// key reads as an empty hash.
    ///
    /// # Errors
    ///
    /// [`StoreError::WrongType`] for non-hash entries.
    pub fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let now = now_millis();
        let mut inner = self.inner.lock();
        inner.commands_processed += 1;
        inner.purge_if_expired(key, now);
        match inner.entries.get(key) {
            None => Ok(HashMap::new()),
            Some(entry) => match &entry.value {
                Value::Hash(hash) => Ok(hash.clone()),
                other => Err(StoreError::WrongType {
                    expected: ValueKind::Hash,
                    actual: other.kind(),
                }),
            },
        }
    }

    /// Adds `delta` to the integer field of the hash under `key` (absent
    /// keys and fields count from zero) and returns the new value.
    ///
    /// # Errors
    ///
    /// [`StoreError::WrongType`] for non-hash entries,
    /// [`StoreError::NotInteger`] when the field does not parse (or the
    /// arithmetic would overflow).
    pub fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        let now = now_millis();
        let mut inner = self.inner.lock();
        inner.commands_processed += 1;
        inner.purge_if_expired(key, now);
        let next = match inner.entries.get_mut(key) {
            None => {
                inner.insert_entry(
                    key,
                    Entry::new(Value::hash([(field, delta.to_string().as_str())])),
                );
                if inner.entries.len() > self.max_entries {
                    inner.evict_one(key);
                }
                delta
            }
            Some(entry) => match &mut entry.value {
                Value::Hash(hash) => {
                    let current = match hash.get(field) {
                        None => 0,
                        Some(s) => s.parse::<i64>().map_err(|_| StoreError::NotInteger {
                            value: s.clone(),
                        })?,
                    };
                    let next = current
                        .checked_add(delta)
                        .ok_or_else(|| StoreError::NotInteger {
                            value: current.to_string(),
                        })?;
                    hash.insert(field.to_string(), next.to_string());
                    inner.recency.touch(key);
                    next
                }
                other => {
                    return Err(StoreError::WrongType {
                        expected: ValueKind::Hash,
                        actual: other.kind(),
                    })
                }
            },
        };
        inner.notify(&self.name, &ReplicationCommand::HIncrBy {
            key: key.to_string(),
            field: field.to_string(),
            delta,
        });
        Ok(next)
    }

    // --- Whole-store operations ---

    /// All live (unexpired) keys, one pass, no recency effect.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let now = now_millis();
        let mut inner = self.inner.lock();
        inner.commands_processed += 1;
        inner
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Removes every entry and empties the recency list, deadline index,
    /// and pub/sub subscriber sets.
    pub fn flushall(&self) {
        let mut inner = self.inner.lock();
        inner.commands_processed += 1;
        inner.entries.clear();
        inner.recency.clear();
        inner.deadlines.clear();
        self.channels.clear();
        inner.notify(&self.name, &ReplicationCommand::FlushAll);
    }

    /// Number of resident entries (including expired-but-unreaped ones).
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether no entries are resident.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Point-in-time statistics.
    #[must_use]
    pub fn info(&self) -> StoreInfo {
        let inner = self.inner.lock();
        StoreInfo {
            name: self.name.clone(),
            entries: inner.entries.len(),
            max_entries: self.max_entries,
            expiring: inner.deadlines.len(),
            channels: self.channels.channel_count(),
            subscribers: self.channels.total_subscribers(),
            commands_processed: inner.commands_processed,
        }
    }

    // --- Pub/sub ---

    /// Delivers `message` to every subscriber of `channel`; returns the
    /// subscriber count. Callbacks run synchronously on this thread, outside
    /// the store lock.
    pub fn publish(&self, channel: &str, message: &str) -> usize {
        self.inner.lock().commands_processed += 1;
        self.channels.publish(channel, message)
    }

    /// Registers `handler` on `channel`; the returned handle unsubscribes
    /// when dropped. Channel-only keys are not entries and never count
    /// against capacity.
    #[must_use]
    pub fn subscribe(&self, channel: &str, handler: SubscriberFn) -> Subscription {
        self.inner.lock().commands_processed += 1;
        self.channels.subscribe(channel, handler)
    }

    // --- Expiry support ---

    /// Earliest expiration deadline among resident entries.
    #[must_use]
    pub fn next_deadline(&self) -> Option<i64> {
        self.inner.lock().deadlines.first().map(|(deadline, _)| *deadline)
    }

    /// Time until the earliest deadline at `now`, zero if already due.
    #[must_use]
    #[allow(clippy::cast_sign_loss)] // clamped non-negative before the cast
    pub fn until_next_deadline(&self, now: i64) -> Option<Duration> {
        self.next_deadline()
            .map(|deadline| Duration::from_millis(deadline.saturating_sub(now).max(0) as u64))
    }

    /// Removes every entry whose deadline is at or before `now`; returns
    /// the reaped keys. Expiry is a local policy and emits no mutation
    /// records.
    pub fn purge_expired(&self, now: i64) -> Vec<String> {
        let mut inner = self.inner.lock();
        let mut reaped = Vec::new();
        while let Some((deadline, key)) = inner.deadlines.first().cloned() {
            if deadline > now {
                break;
            }
            inner.deadlines.remove(&(deadline, key.clone()));
            inner.entries.remove(&key);
            inner.recency.remove(&key);
            reaped.push(key);
        }
        reaped
    }

    // --- Snapshot and replication support ---

    /// Extracts the persistent state: live entries and, separately, the
    /// absolute deadlines of the expiring ones.
    #[must_use]
    pub fn snapshot_state(&self) -> (Vec<(String, Value)>, Vec<(String, i64)>) {
        let now = now_millis();
        let inner = self.inner.lock();
        let mut store = Vec::new();
        let mut expiry = Vec::new();
        for (key, entry) in &inner.entries {
            if entry.is_expired(now) {
                continue;
            }
            store.push((key.clone(), entry.value.clone()));
            if let Some(deadline) = entry.expires_at {
                expiry.push((key.clone(), deadline));
            }
        }
        (store, expiry)
    }

    /// Restores entries produced by [`Self::snapshot_state`] (or loaded from
    /// disk). Entries whose deadline has already passed are discarded; the
    /// rest are re-armed in the TTL index. Emits no mutation records.
    pub fn restore(&self, store: Vec<(String, Value)>, expiry: Vec<(String, i64)>) {
        let now = now_millis();
        let deadlines: HashMap<String, i64> = expiry.into_iter().collect();
        let mut inner = self.inner.lock();
        for (key, value) in store {
            match deadlines.get(&key) {
                Some(&deadline) if deadline <= now => continue,
                Some(&deadline) => inner.insert_entry(&key, Entry::with_expiry(value, deadline)),
                None => inner.insert_entry(&key, Entry::new(value)),
            }
            while inner.entries.len() > self.max_entries {
                if inner.evict_one(&key).is_none() {
                    break;
                }
            }
        }
    }

    /// Takes a resync snapshot of the live entries (with remaining TTLs)
    /// and runs `mark` before releasing the lock.
    ///
    /// The callback is the registration point for a replication transport:
    /// because it runs under the same lock that orders mutations, every
    /// mutation after the snapshot -- and none before it -- reaches a
    /// transport activated inside `mark`.
    pub fn snapshot_for_sync<F: FnOnce()>(&self, mark: F) -> Vec<SyncEntry> {
        let now = now_millis();
        let inner = self.inner.lock();
        let snapshot = inner
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, entry)| {
                (
                    key.clone(),
                    entry.value.clone(),
                    entry.remaining_ttl_secs(now),
                )
            })
            .collect();
        mark();
        snapshot
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Store")
            .field("name", &self.name)
            .field("entries", &inner.entries.len())
            .field("max_entries", &self.max_entries)
            .finish()
    }
}
