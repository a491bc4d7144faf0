//! Channel table and owned subscription handles.
//!
//! A subscription is an owned handle: [`ChannelTable::subscribe`] returns a
//! [`Subscription`], and dropping that handle is the sole deregistration
//! path. The table holds non-owning callback references keyed by a numeric
//! subscriber id, so revocation is O(1) and an abandoned handle can never
//! leak delivery into a dead consumer.
//!
//! Delivery is synchronous on the publishing thread: `publish` snapshots the
//! channel's subscriber set, releases the table lock, and then invokes the
//! callbacks. A handler may therefore unsubscribe itself, subscribe to new
//! channels, or publish, without deadlocking the table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Callback invoked with (channel, message) for every delivery.
pub type SubscriberFn = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Subscriber tables for every channel of one store.
pub struct ChannelTable {
    channels: Mutex<HashMap<String, HashMap<u64, SubscriberFn>>>,
    next_id: AtomicU64,
}

impl Default for ChannelTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers `handler` on `channel` and returns the owning handle.
    ///
    /// The table must be held in an `Arc` so the handle can revoke itself
    /// later without keeping the table alive.
    #[must_use]
    pub fn subscribe(self: &Arc<Self>, channel: &str, handler: SubscriberFn) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.channels
            .lock()
            .entry(channel.to_string())
            .or_default()
            .insert(id, handler);
        Subscription {
            channel: channel.to_string(),
            id,
            table: Arc::downgrade(self),
        }
    }

    /// Delivers `message` to every current subscriber of `channel`.
    /// Returns the number of callbacks invoked.
    pub fn publish(&self, channel: &str, message: &str) -> usize {
        // Snapshot under the lock, deliver outside it.
        let handlers: Vec<SubscriberFn> = {
            let channels = self.channels.lock();
            match channels.get(channel) {
                Some(subs) => subs.values().cloned().collect(),
                None => Vec::new(),
            }
        };
        for handler in &handlers {
            handler(channel, message);
        }
        handlers.len()
    }

    /// Number of subscribers currently registered on `channel`.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .get(channel)
            .map_or(0, HashMap::len)
    }

    /// Number of channels with at least one subscriber.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    /// Total subscribers across all channels.
    #[must_use]
    pub fn total_subscribers(&self) -> usize {
        self.channels.lock().values().map(HashMap::len).sum()
    }

    /// Drops every channel and every subscriber registration.
    ///
    /// Outstanding [`Subscription`] handles stay valid to drop; their
    /// revocation becomes a no-op.
    pub fn clear(&self) {
        self.channels.lock().clear();
    }

    /// Removes one registration; empty channels are dropped from the table.
    fn unsubscribe(&self, channel: &str, id: u64) {
        let mut channels = self.channels.lock();
        if let Some(subs) = channels.get_mut(channel) {
            subs.remove(&id);
            if subs.is_empty() {
                channels.remove(channel);
            }
        }
    }
}

/// Owned handle to one channel registration; unsubscribes on drop.
pub struct Subscription {
    channel: String,
    id: u64,
    table: Weak<ChannelTable>,
}

impl Subscription {
    /// The channel this handle is registered on.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            table.unsubscribe(&self.channel, self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use parking_lot::Mutex as PlMutex;

    use super::*;

    fn collecting_handler(sink: Arc<PlMutex<Vec<(String, String)>>>) -> SubscriberFn {
        Arc::new(move |channel, message| {
            sink.lock().push((channel.to_string(), message.to_string()));
        })
    }

    #[test]
    fn publish_reaches_every_subscriber() {
        let table = Arc::new(ChannelTable::new());
        let sink_a = Arc::new(PlMutex::new(Vec::new()));
        let sink_b = Arc::new(PlMutex::new(Vec::new()));

        let _sub_a = table.subscribe("news", collecting_handler(Arc::clone(&sink_a)));
        let _sub_b = table.subscribe("news", collecting_handler(Arc::clone(&sink_b)));

        let delivered = table.publish("news", "hello");
        assert_eq!(delivered, 2);
        assert_eq!(sink_a.lock().as_slice(), &[("news".to_string(), "hello".to_string())]);
        assert_eq!(sink_b.lock().len(), 1);
    }

    #[test]
    fn publish_to_empty_channel_delivers_nothing() {
        let table = Arc::new(ChannelTable::new());
        assert_eq!(table.publish("void", "msg"), 0);
    }

    #[test]
    fn dropping_the_handle_unsubscribes() {
        let table = Arc::new(ChannelTable::new());
        let sink = Arc::new(PlMutex::new(Vec::new()));

        let sub = table.subscribe("c", collecting_handler(Arc::clone(&sink)));
        assert_eq!(table.subscriber_count("c"), 1);

        drop(sub);
        assert_eq!(table.subscriber_count("c"), 0);
        assert_eq!(table.channel_count(), 0);
        assert_eq!(table.publish("c", "after"), 0);
        assert!(sink.lock().is_empty());
    }

    #[test]
    fn handles_are_independent_per_channel() {
        let table = Arc::new(ChannelTable::new());
        let sink = Arc::new(PlMutex::new(Vec::new()));

        let sub_a = table.subscribe("a", collecting_handler(Arc::clone(&sink)));
        let _sub_b = table.subscribe("b", collecting_handler(Arc::clone(&sink)));
        assert_eq!(table.channel_count(), 2);
        assert_eq!(table.total_subscribers(), 2);

        drop(sub_a);
        assert_eq!(table.channel_count(), 1);
        assert_eq!(table.publish("a", "x"), 0);
        assert_eq!(table.publish("b", "y"), 1);
    }

    #[test]
    fn handler_may_unsubscribe_itself_mid_publish() {
        let table = Arc::new(ChannelTable::new());
        let slot: Arc<PlMutex<Option<Subscription>>> = Arc::new(PlMutex::new(None));
        let hits = Arc::new(AtomicUsize::new(0));

        let slot_in_handler = Arc::clone(&slot);
        let hits_in_handler = Arc::clone(&hits);
        let sub = table.subscribe(
            "c",
            Arc::new(move |_, _| {
                hits_in_handler.fetch_add(1, Ordering::Relaxed);
                // Dropping our own handle during delivery must not deadlock.
                slot_in_handler.lock().take();
            }),
        );
        *slot.lock() = Some(sub);

        assert_eq!(table.publish("c", "first"), 1);
        assert_eq!(table.publish("c", "second"), 0);
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn clear_revokes_everything_and_handles_stay_droppable() {
        let table = Arc::new(ChannelTable::new());
        let sink = Arc::new(PlMutex::new(Vec::new()));
        let sub = table.subscribe("c", collecting_handler(Arc::clone(&sink)));

        table.clear();
        assert_eq!(table.total_subscribers(), 0);
        assert_eq!(table.publish("c", "gone"), 0);

        drop(sub); // Must be a silent no-op.
    }

    #[test]
    fn drop_after_table_is_gone_is_safe() {
        let table = Arc::new(ChannelTable::new());
        let sub = table.subscribe("c", Arc::new(|_, _| {}));
        drop(table);
        drop(sub);
    }
}
