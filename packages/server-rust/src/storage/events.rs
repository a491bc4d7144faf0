//! Mutation event stream: observer seam and the observability ring buffer.
//!
//! Every successful store mutation is published, in commit order, to the
//! observers registered on that store. Two consumers exist today: the
//! replication fan-out (which writes to slave transports and returns) and
//! the [`EventLog`], a bounded ring buffer serving the admin surface. The
//! two are independent by design -- the log records what was committed, not
//! what was delivered.
//!
//! Observers run synchronously while the store lock is held, which is what
//! makes the per-connection FIFO guarantee hold. They must be quick and must
//! not call back into the store.

use std::collections::VecDeque;

use kvgrid_core::messages::ReplicationCommand;
use parking_lot::Mutex;

use super::entry::now_millis;

/// Observer of one store's committed mutations.
///
/// Used as `Arc<dyn MutationObserver>`.
pub trait MutationObserver: Send + Sync {
    /// Called after mutation `seq` (monotonic per store) commits on `store`.
    fn on_mutation(&self, store: &str, seq: u64, command: &ReplicationCommand);
}

/// One recorded mutation, as kept by the [`EventLog`].
#[derive(Debug, Clone)]
pub struct MutationEvent {
    /// Name of the store the mutation committed on.
    pub store: String,
    /// Per-store commit sequence number.
    pub seq: u64,
    /// Wall-clock commit time, millis since epoch.
    pub at_ms: i64,
    /// The committed command.
    pub command: ReplicationCommand,
}

/// Bounded ring buffer over recent mutations.
///
/// Overwrites the oldest event once full; never blocks and never fails.
pub struct EventLog {
    capacity: usize,
    events: Mutex<VecDeque<MutationEvent>>,
}

impl EventLog {
    /// Creates a log retaining at most `capacity` events.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "event log capacity must be non-zero");
        Self {
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Maximum number of retained events.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of currently retained events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether the log holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// The most recent `limit` events, oldest first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<MutationEvent> {
        let events = self.events.lock();
        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }
}

impl MutationObserver for EventLog {
    fn on_mutation(&self, store: &str, seq: u64, command: &ReplicationCommand) {
        let mut events = self.events.lock();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(MutationEvent {
            store: store.to_string(),
            seq,
            at_ms: now_millis(),
            command: command.clone(),
        });
    }
}
