//! Slave-side replication: connect, handshake, apply the record stream.
//!
//! A slave owns its own [`Store`] and applies every inbound record through
//! the normal operation API. The slave's store has no fan-out observer
//! registered, so nothing is re-replicated. A record that fails to apply
//! (say, an `incr` on a key the slave holds with a different type) is
//! logged and skipped: local state diverges until the next resync, which is
//! the documented consistency model. Connection loss ends [`ReplicationSlave::run`]
//! with an error; restart policy belongs to the supervisor, not here.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use kvgrid_core::messages::{HandshakeFrame, ReplicationCommand};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{info, warn};

use crate::error::{ReplicationError, StoreError};
use crate::storage::{now_millis, Store};

/// The replication client owning one slave store.
pub struct ReplicationSlave {
    store: Arc<Store>,
    slave_id: String,
    master_addr: String,
    read_idle_timeout: Duration,
    /// 0 until the first record applies.
    last_apply_ms: AtomicI64,
}

impl ReplicationSlave {
    /// Creates a slave runtime over `store`.
    #[must_use]
    pub fn new(
        store: Arc<Store>,
        slave_id: impl Into<String>,
        master_addr: impl Into<String>,
        read_idle_timeout: Duration,
    ) -> Self {
        Self {
            store,
            slave_id: slave_id.into(),
            master_addr: master_addr.into(),
            read_idle_timeout,
            last_apply_ms: AtomicI64::new(0),
        }
    }

    /// The local store records are applied to.
    #[must_use]
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// When the last record applied, millis since epoch.
    #[must_use]
    pub fn last_apply_ms(&self) -> Option<i64> {
        let at = self.last_apply_ms.load(Ordering::Relaxed);
        (at != 0).then_some(at)
    }

    /// Connects, hand-shakes, and applies records until the link dies.
    ///
    /// # Errors
    ///
    /// [`ReplicationError::Io`] when the connection cannot be established,
    /// [`ReplicationError::ReadIdle`] when the master goes silent past the
    /// idle timeout, [`ReplicationError::ConnectionClosed`] on EOF, and
    /// [`ReplicationError::Framing`] on transport-framing failures.
    pub async fn run(&self) -> Result<(), ReplicationError> {
        info!(slave = %self.slave_id, master = %self.master_addr, "connecting to master");
        let socket = TcpStream::connect(&self.master_addr).await?;
        let mut framed = Framed::new(socket, LinesCodec::new());

        let handshake = HandshakeFrame::new(&self.slave_id).encode_line()?;
        framed
            .send(handshake)
            .await
            .map_err(|e| ReplicationError::Framing(e.to_string()))?;
        info!(slave = %self.slave_id, "handshake sent; applying record stream");

        loop {
            let frame = tokio::time::timeout(self.read_idle_timeout, framed.next()).await;
            match frame {
                Err(_) => {
                    #[allow(clippy::cast_possible_truncation)] // sub-u64 timeouts only
                    let timeout_ms = self.read_idle_timeout.as_millis() as u64;
                    return Err(ReplicationError::ReadIdle { timeout_ms });
                }
                Ok(None) => return Err(ReplicationError::ConnectionClosed),
                Ok(Some(Err(e))) => return Err(ReplicationError::Framing(e.to_string())),
                Ok(Some(Ok(line))) => match ReplicationCommand::decode_line(&line) {
                    Ok(command) => {
                        if let Err(e) = apply_record(&self.store, &command) {
                            warn!(
                                slave = %self.slave_id,
                                command = command.command_name(),
                                error = %e,
                                "record failed to apply; state diverges until next resync"
                            );
                        }
                        self.last_apply_ms.store(now_millis(), Ordering::Relaxed);
                    }
                    Err(e) => warn!(slave = %self.slave_id, error = %e, "skipping undecodable record"),
                },
            }
        }
    }
}

/// Applies one record to a store through the normal operation API.
///
/// # Errors
///
/// Propagates the underlying [`StoreError`] so the caller can log it; the
/// store is unchanged when an error is returned.
pub fn apply_record(store: &Store, command: &ReplicationCommand) -> Result<(), StoreError> {
    match command {
        ReplicationCommand::Set {
            key,
            value,
            ttl_seconds,
        } => {
            store.set(key, value.clone(), *ttl_seconds);
            Ok(())
        }
        ReplicationCommand::Delete { key } => {
            store.delete(key);
            Ok(())
        }
        ReplicationCommand::Expire { key, ttl_seconds } => {
            store.expire(key, *ttl_seconds);
            Ok(())
        }
        ReplicationCommand::FlushAll => {
            store.flushall();
            Ok(())
        }
        ReplicationCommand::Incr { key } => store.incr(key).map(drop),
        ReplicationCommand::Decr { key } => store.decr(key).map(drop),
        ReplicationCommand::Rename { key, new_key } => store.rename(key, new_key),
        ReplicationCommand::LPush { key, element } => store.lpush(key, element).map(drop),
        ReplicationCommand::RPush { key, element } => store.rpush(key, element).map(drop),
        ReplicationCommand::LPop { key } => store.lpop(key).map(drop),
        ReplicationCommand::RPop { key } => store.rpop(key).map(drop),
        ReplicationCommand::HSet { key, field, value } => {
            store.hset(key, field, value).map(drop)
        }
        ReplicationCommand::HDel { key, field } => store.hdel(key, field).map(drop),
        ReplicationCommand::HIncrBy { key, field, delta } => {
            store.hincrby(key, field, *delta).map(drop)
        }
    }
}
