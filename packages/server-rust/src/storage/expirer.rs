//! Background TTL sweeper for one store.
//!
//! The expirer sleeps until the store's earliest deadline (capped at a
//! configured maximum so newly armed, earlier deadlines are picked up
//! promptly), reaps everything due, and goes back to sleep. It exits when
//! the engine's shutdown signal fires. Entries are also reaped lazily on
//! access, so the expirer only bounds how long an untouched expired entry
//! can linger.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use super::entry::now_millis;
use super::store::Store;

/// Spawns the expirer task for `store`.
///
/// The task runs until `shutdown` flips to `true`.
pub fn spawn(
    store: Arc<Store>,
    max_sleep: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = now_millis();
            let sleep_for = store
                .until_next_deadline(now)
                .map_or(max_sleep, |until| until.min(max_sleep));

            tokio::select! {
                () = tokio::time::sleep(sleep_for) => {
                    let reaped = store.purge_expired(now_millis());
                    if !reaped.is_empty() {
                        debug!(
                            store = %store.name(),
                            count = reaped.len(),
                            "expired entries reaped"
                        );
                    }
                }
                _ = shutdown.changed() => {
                    debug!(store = %store.name(), "expirer stopping");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use kvgrid_core::types::Value;

    use super::*;

    #[tokio::test]
    async fn reaps_entries_as_deadlines_pass() {
        let store = Arc::new(Store::new("exp", 100));
        let (_tx, rx) = watch::channel(false);
        let handle = spawn(Arc::clone(&store), Duration::from_millis(20), rx);

        store.set("short", Value::string("x"), Some(1));
        store.set("keeper", Value::string("y"), None);

        // One second TTL plus sweep slack.
        tokio::time::sleep(Duration::from_millis(1300)).await;

        // Reaped by the sweeper, not by access: len() does no lazy purge.
        assert_eq!(store.len(), 1);
        assert!(store.exists("keeper"));

        handle.abort();
    }

    #[tokio::test]
    async fn stops_on_shutdown_signal() {
        let store = Arc::new(Store::new("exp", 100));
        let (tx, rx) = watch::channel(false);
        let handle = spawn(Arc::clone(&store), Duration::from_millis(10), rx);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("expirer exits promptly on shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn idle_store_keeps_sweeping_without_deadlines() {
        let store = Arc::new(Store::new("exp", 100));
        let (tx, rx) = watch::channel(false);
        let handle = spawn(Arc::clone(&store), Duration::from_millis(10), rx);

        // No entries at all: the task must stay alive and responsive.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        tx.send(true).unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }
}
