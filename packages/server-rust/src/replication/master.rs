//! Replication master: TCP acceptor and commit-order record fan-out.
//!
//! Lifecycle follows the deferred-startup pattern: [`ReplicationMaster::new`]
//! allocates shared state, [`ReplicationMaster::start`] binds the listener
//! (returning the actual port, useful with port 0 in tests), and
//! [`ReplicationMaster::serve`] registers the fan-out observer and begins
//! accepting connections.
//!
//! Per slave, the master keeps one bounded outbound channel feeding a
//! connection task that owns the socket. The fan-out observer runs on the
//! mutation path (under the store lock, in commit order) and only ever
//! `try_send`s: a slave whose channel is full or closed is dropped from the
//! active set rather than ever blocking a client operation.
//!
//! Initial sync and the FIFO cutover: the connection task snapshots the
//! store and flips the slave to `Connected` under the same store lock
//! ([`Store::snapshot_for_sync`]). Mutations committed after that instant
//! land in the outbound channel; the task first writes the snapshot records
//! directly to the socket, then drains the channel, so the slave observes
//! snapshot state followed by every later mutation in commit order.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use kvgrid_core::messages::{HandshakeFrame, ReplicationCommand};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, warn};

use crate::config::ReplicationConfig;
use crate::error::ReplicationError;
use crate::storage::{now_millis, MutationObserver, Store};

/// Connection state of one registered slave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveStatus {
    /// Handshake received; initial sync not yet cut over.
    Handshaking,
    /// Receiving the live record stream.
    Connected,
    /// Transport closed by the peer or by an operator.
    Disconnected,
    /// Dropped by the master (lagging channel or write failure).
    Failed,
}

/// Observable state of one slave, derived from the live transport registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveView {
    /// Slave identifier from the handshake.
    pub id: String,
    /// Current connection state.
    pub status: SlaveStatus,
    /// When the transport was registered, millis since epoch.
    pub connected_at_ms: i64,
    /// When the initial sync completed, if it has.
    pub last_sync_ms: Option<i64>,
}

/// Master-side handle to one slave transport.
struct SlaveHandle {
    id: String,
    tx: mpsc::Sender<String>,
    status: Mutex<SlaveStatus>,
    connected_at_ms: i64,
    /// 0 until the initial sync completes.
    last_sync_ms: AtomicI64,
}

impl SlaveHandle {
    fn status(&self) -> SlaveStatus {
        *self.status.lock()
    }

    fn set_status(&self, status: SlaveStatus) {
        *self.status.lock() = status;
    }

    fn view(&self) -> SlaveView {
        let last_sync = self.last_sync_ms.load(Ordering::Relaxed);
        SlaveView {
            id: self.id.clone(),
            status: self.status(),
            connected_at_ms: self.connected_at_ms,
            last_sync_ms: (last_sync != 0).then_some(last_sync),
        }
    }
}

type SlaveRegistry = Arc<DashMap<String, Arc<SlaveHandle>>>;

/// Mutation observer that fans records out to every connected slave.
struct FanOut {
    slaves: SlaveRegistry,
}

impl MutationObserver for FanOut {
    fn on_mutation(&self, _store: &str, _seq: u64, command: &ReplicationCommand) {
        if self.slaves.is_empty() {
            return;
        }
        let line = match command.encode_line() {
            Ok(line) => line,
            Err(e) => {
                warn!(command = command.command_name(), error = %e, "record encode failed");
                return;
            }
        };
        // Collect victims first: removing while iterating would deadlock
        // the DashMap shard.
        let mut dropped = Vec::new();
        for entry in self.slaves.iter() {
            let handle = entry.value();
            if handle.status() != SlaveStatus::Connected {
                continue;
            }
            match handle.tx.try_send(line.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    handle.set_status(SlaveStatus::Failed);
                    dropped.push(handle.id.clone());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    handle.set_status(SlaveStatus::Disconnected);
                    dropped.push(handle.id.clone());
                }
            }
        }
        for id in dropped {
            self.slaves.remove(&id);
            warn!(slave = %id, "dropped slave transport (lagging or closed)");
        }
    }
}

/// The replicating side of a master store.
pub struct ReplicationMaster {
    store: Arc<Store>,
    config: ReplicationConfig,
    slaves: SlaveRegistry,
    listener: Option<TcpListener>,
    local_port: Option<u16>,
    shutdown_tx: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl ReplicationMaster {
    /// Creates a master over `store` without binding any port.
    #[must_use]
    pub fn new(store: Arc<Store>, config: ReplicationConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            store,
            config,
            slaves: Arc::new(DashMap::new()),
            listener: None,
            local_port: None,
            shutdown_tx,
            accept_task: Mutex::new(None),
        }
    }

    /// Binds the acceptor to the configured address and returns the actual
    /// port (which differs from the configured one when port 0 is used).
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::Io`] when the address cannot be bound.
    pub async fn start(&mut self) -> Result<u16, ReplicationError> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let port = listener.local_addr()?.port();
        info!(addr = %self.config.bind_host, port, "replication acceptor bound");
        self.listener = Some(listener);
        self.local_port = Some(port);
        Ok(port)
    }

    /// Registers the fan-out observer and starts accepting slaves.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::Io`] (kind `NotConnected`) when called
    /// before [`Self::start`].
    pub fn serve(&mut self) -> Result<(), ReplicationError> {
        let listener = self.listener.take().ok_or_else(|| {
            ReplicationError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "serve() called before start()",
            ))
        })?;
        self.store.register_observer(Arc::new(FanOut {
            slaves: Arc::clone(&self.slaves),
        }));

        let store = Arc::clone(&self.store);
        let slaves = Arc::clone(&self.slaves);
        let config = self.config.clone();
        let mut shutdown = self.shutdown_tx.subscribe();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((socket, peer)) => {
                            debug!(%peer, "inbound replication connection");
                            tokio::spawn(handle_connection(
                                Arc::clone(&store),
                                Arc::clone(&slaves),
                                config.clone(),
                                socket,
                            ));
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    },
                    _ = shutdown.changed() => {
                        debug!("replication acceptor stopping");
                        break;
                    }
                }
            }
        });
        *self.accept_task.lock() = Some(task);
        Ok(())
    }

    /// The bound port, once [`Self::start`] has run.
    #[must_use]
    pub fn local_port(&self) -> Option<u16> {
        self.local_port
    }

    /// Number of registered slave transports.
    #[must_use]
    pub fn slave_count(&self) -> usize {
        self.slaves.len()
    }

    /// Status view over every registered slave, derived from the transport
    /// registry (there is no second bookkeeping source).
    #[must_use]
    pub fn slaves(&self) -> Vec<SlaveView> {
        self.slaves.iter().map(|entry| entry.value().view()).collect()
    }

    /// Severs one slave's transport (failure simulation / operator action).
    /// Returns whether a transport was registered under `id`.
    ///
    /// The connection task notices the dropped channel and closes the
    /// socket; the slave process itself is the supervisor's business.
    pub fn disconnect_slave(&self, id: &str) -> bool {
        match self.slaves.remove(id) {
            Some((_, handle)) => {
                handle.set_status(SlaveStatus::Disconnected);
                info!(slave = %id, "slave transport severed");
                true
            }
            None => false,
        }
    }

    /// Stops accepting, severs every slave transport, and waits (bounded)
    /// for the accept loop to exit.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let task = self.accept_task.lock().take();
        if let Some(task) = task {
            if tokio::time::timeout(Duration::from_secs(5), task)
                .await
                .is_err()
            {
                warn!("replication acceptor did not stop within the bounded wait");
            }
        }
        self.slaves.clear();
        info!("replication master stopped");
    }
}

impl std::fmt::Debug for ReplicationMaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationMaster")
            .field("store", &self.store.name())
            .field("port", &self.local_port)
            .field("slaves", &self.slaves.len())
            .finish()
    }
}

/// Drives one slave connection: handshake, initial sync, steady-state
/// writer, and read-side liveness.
async fn handle_connection(
    store: Arc<Store>,
    slaves: SlaveRegistry,
    config: ReplicationConfig,
    socket: TcpStream,
) {
    let mut framed = Framed::new(socket, LinesCodec::new());

    let line = match tokio::time::timeout(config.handshake_timeout(), framed.next()).await {
        Ok(Some(Ok(line))) => line,
        Ok(Some(Err(e))) => {
            warn!(error = %e, "framing error before handshake");
            return;
        }
        Ok(None) => {
            debug!("connection closed before handshake");
            return;
        }
        Err(_) => {
            warn!("handshake timed out");
            return;
        }
    };
    let frame = match HandshakeFrame::decode_line(&line) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "invalid handshake; dropping connection");
            return;
        }
    };
    let slave_id = frame.slave_id;

    let (tx, mut rx) = mpsc::channel::<String>(config.channel_capacity);
    let handle = Arc::new(SlaveHandle {
        id: slave_id.clone(),
        tx,
        status: Mutex::new(SlaveStatus::Handshaking),
        connected_at_ms: now_millis(),
        last_sync_ms: AtomicI64::new(0),
    });
    if slaves
        .insert(slave_id.clone(), Arc::clone(&handle))
        .is_some()
    {
        debug!(slave = %slave_id, "replaced stale transport registration");
    }
    info!(slave = %slave_id, "slave registered; starting initial sync");

    // Snapshot and cut over atomically: mutations after this instant queue
    // in `rx`, mutations before it are in `snapshot`.
    let snapshot = {
        let handle = Arc::clone(&handle);
        store.snapshot_for_sync(move || handle.set_status(SlaveStatus::Connected))
    };
    let synced = snapshot.len();
    for (key, value, ttl_seconds) in snapshot {
        let record = ReplicationCommand::Set {
            key,
            value,
            ttl_seconds,
        };
        let line = match record.encode_line() {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "skipping unencodable sync record");
                continue;
            }
        };
        if let Err(e) = framed.send(line).await {
            warn!(slave = %slave_id, error = %e, "initial sync write failed");
            deregister(&slaves, &handle, SlaveStatus::Disconnected);
            return;
        }
    }
    handle.last_sync_ms.store(now_millis(), Ordering::Relaxed);
    info!(slave = %slave_id, entries = synced, "initial sync complete");

    loop {
        tokio::select! {
            queued = rx.recv() => match queued {
                Some(line) => {
                    if let Err(e) = framed.send(line).await {
                        warn!(slave = %slave_id, error = %e, "record write failed");
                        break;
                    }
                }
                // Channel dropped: the master deregistered this transport.
                None => {
                    debug!(slave = %slave_id, "transport deregistered");
                    return;
                }
            },
            inbound = framed.next() => match inbound {
                None => {
                    info!(slave = %slave_id, "slave closed the connection");
                    break;
                }
                Some(Err(e)) => {
                    warn!(slave = %slave_id, error = %e, "read failed");
                    break;
                }
                // The protocol has no slave-to-master frames after the
                // handshake; tolerate and ignore.
                Some(Ok(_)) => {}
            },
        }
    }
    deregister(&slaves, &handle, SlaveStatus::Disconnected);
}

/// Removes a transport from the registry, but never a newer registration
/// that reused the same slave id.
fn deregister(slaves: &SlaveRegistry, handle: &Arc<SlaveHandle>, status: SlaveStatus) {
    handle.set_status(status);
    slaves.remove_if(&handle.id, |_, registered| Arc::ptr_eq(registered, handle));
}

#[cfg(test)]
mod tests {
    use kvgrid_core::types::Value;

    use super::*;

    fn test_config() -> ReplicationConfig {
        ReplicationConfig {
            master_port: 0,
            channel_capacity: 16,
            ..ReplicationConfig::default()
        }
    }

    async fn started_master(store: Arc<Store>) -> (ReplicationMaster, u16) {
        let mut master = ReplicationMaster::new(store, test_config());
        let port = master.start().await.unwrap();
        master.serve().unwrap();
        (master, port)
    }

    async fn connect_slave(port: u16, slave_id: &str) -> Framed<TcpStream, LinesCodec> {
        let socket = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let mut framed = Framed::new(socket, LinesCodec::new());
        framed
            .send(HandshakeFrame::new(slave_id).encode_line().unwrap())
            .await
            .unwrap();
        framed
    }

    async fn next_line(framed: &mut Framed<TcpStream, LinesCodec>) -> String {
        tokio::time::timeout(Duration::from_secs(2), framed.next())
            .await
            .expect("line within deadline")
            .expect("stream open")
            .expect("clean frame")
    }

    async fn wait_for<F: Fn() -> bool>(what: &str, check: F) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("timed out waiting for {what}");
    }

    #[tokio::test]
    async fn initial_sync_ships_existing_entries_with_ttls() {
        let store = Arc::new(Store::new("master", 100));
        store.set("a", Value::string("1"), Some(10));
        store.set("b", Value::string("2"), None);
        let (_master, port) = started_master(Arc::clone(&store)).await;

        let mut framed = connect_slave(port, "s1").await;
        let mut synced = Vec::new();
        for _ in 0..2 {
            let line = next_line(&mut framed).await;
            synced.push(ReplicationCommand::decode_line(&line).unwrap());
        }

        let a = synced
            .iter()
            .find_map(|c| match c {
                ReplicationCommand::Set {
                    key, ttl_seconds, ..
                } if key == "a" => Some(*ttl_seconds),
                _ => None,
            })
            .expect("record for a");
        assert!(a.is_some_and(|t| (9..=10).contains(&t)), "ttl was {a:?}");

        let b = synced.iter().any(|c| {
            matches!(c, ReplicationCommand::Set { key, ttl_seconds: None, .. } if key == "b")
        });
        assert!(b, "record for b without ttl");
    }

    #[tokio::test]
    async fn live_mutation_reaches_the_slave_socket_verbatim() {
        let store = Arc::new(Store::new("master", 100));
        let (master, port) = started_master(Arc::clone(&store)).await;

        let mut framed = connect_slave(port, "s1").await;
        wait_for("slave to finish sync", || {
            master
                .slaves()
                .first()
                .is_some_and(|s| s.last_sync_ms.is_some())
        })
        .await;

        store.set("k", Value::string("v"), None);
        assert_eq!(
            next_line(&mut framed).await,
            r#"{"command":"set","args":["k","v",null]}"#
        );
    }

    #[tokio::test]
    async fn fan_out_preserves_commit_order() {
        let store = Arc::new(Store::new("master", 100));
        let (master, port) = started_master(Arc::clone(&store)).await;

        let mut framed = connect_slave(port, "s1").await;
        wait_for("sync", || {
            master
                .slaves()
                .first()
                .is_some_and(|s| s.status == SlaveStatus::Connected && s.last_sync_ms.is_some())
        })
        .await;

        store.set("n", Value::string("0"), None);
        store.incr("n").unwrap();
        store.incr("n").unwrap();
        store.delete("n");

        let expected = ["set", "incr", "incr", "delete"];
        for want in expected {
            let line = next_line(&mut framed).await;
            let cmd = ReplicationCommand::decode_line(&line).unwrap();
            assert_eq!(cmd.command_name(), want);
        }
    }

    #[tokio::test]
    async fn slave_view_tracks_registration_and_disconnect() {
        let store = Arc::new(Store::new("master", 100));
        let (master, port) = started_master(Arc::clone(&store)).await;
        assert!(master.slaves().is_empty());

        let framed = connect_slave(port, "s1").await;
        wait_for("registration", || master.slave_count() == 1).await;
        let view = master.slaves().remove(0);
        assert_eq!(view.id, "s1");
        assert!(view.connected_at_ms > 0);

        drop(framed); // peer closes; master must deregister
        wait_for("deregistration", || master.slave_count() == 0).await;
    }

    #[tokio::test]
    async fn disconnect_slave_severs_the_transport() {
        let store = Arc::new(Store::new("master", 100));
        let (master, port) = started_master(Arc::clone(&store)).await;

        let mut framed = connect_slave(port, "s1").await;
        wait_for("registration", || master.slave_count() == 1).await;

        assert!(master.disconnect_slave("s1"));
        assert!(!master.disconnect_slave("s1"));
        assert_eq!(master.slave_count(), 0);

        // The socket closes once the connection task notices.
        let eof = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match framed.next().await {
                    None => break,
                    Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        })
        .await;
        assert!(eof.is_ok(), "socket should close after severing");
    }

    #[tokio::test]
    async fn garbage_handshake_never_registers() {
        let store = Arc::new(Store::new("master", 100));
        let (master, port) = started_master(Arc::clone(&store)).await;

        let socket = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let mut framed = Framed::new(socket, LinesCodec::new());
        framed.send("not a handshake".to_string()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(master.slave_count(), 0);
    }

    #[tokio::test]
    async fn mutations_without_slaves_cost_nothing_and_stop_is_bounded() {
        let store = Arc::new(Store::new("master", 100));
        let (master, _port) = started_master(Arc::clone(&store)).await;

        store.set("k", Value::string("v"), None);
        assert_eq!(master.slave_count(), 0);

        tokio::time::timeout(Duration::from_secs(6), master.stop())
            .await
            .expect("stop completes within the bounded wait");
    }
}
