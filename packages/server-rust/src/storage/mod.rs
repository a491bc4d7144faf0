//! Storage layer: the per-shard store and its supporting machinery.
//!
//! - [`store`]: the [`Store`] itself -- key/value operations, TTL, LRU,
//!   pub/sub, mutation events
//! - [`entry`]: the stored [`Entry`] and the millisecond clock
//! - [`recency`]: the LRU [`RecencyList`]
//! - [`pubsub`]: channel table and owned [`Subscription`] handles
//! - [`events`]: the [`MutationObserver`] seam and the [`EventLog`] ring
//! - [`expirer`]: the background TTL sweeper
//! - [`snapshot`]: the on-disk document and the background [`Snapshotter`]

pub mod entry;
pub mod events;
pub mod expirer;
pub mod pubsub;
pub mod recency;
pub mod snapshot;
pub mod store;

pub use entry::{now_millis, Entry};
pub use events::{EventLog, MutationEvent, MutationObserver};
pub use pubsub::{ChannelTable, SubscriberFn, Subscription};
pub use recency::RecencyList;
pub use snapshot::{SnapshotDocument, Snapshotter};
pub use store::{Store, StoreInfo, SyncEntry};
