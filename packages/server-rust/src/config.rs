//! Engine and replication configuration.
//!
//! Plain structs with documented defaults; validation happens once, before
//! any component is built, so the rest of the codebase can assume sane
//! values (non-empty shard list, non-zero capacity).

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Configuration for a sharded engine (one process hosting N stores).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Ordered shard names. Order is load-bearing for key placement.
    pub shards: Vec<String>,
    /// Maximum entries per shard before LRU eviction.
    pub max_entries: usize,
    /// Interval between periodic snapshot saves, in milliseconds.
    pub snapshot_interval_ms: u64,
    /// Directory holding the per-shard snapshot files.
    pub snapshot_dir: PathBuf,
    /// Upper bound on how long the expirer sleeps between sweeps, in
    /// milliseconds. Keeps reaping latency bounded when no deadline is near.
    pub expirer_max_sleep_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shards: kvgrid_core::routing::DEFAULT_SHARDS
                .iter()
                .map(ToString::to_string)
                .collect(),
            max_entries: 1000,
            snapshot_interval_ms: 30_000,
            snapshot_dir: PathBuf::from("."),
            expirer_max_sleep_ms: 1000,
        }
    }
}

impl EngineConfig {
    /// Snapshot file path for one shard: `<snapshot_dir>/data_<shard>.json`.
    #[must_use]
    pub fn snapshot_path(&self, shard: &str) -> PathBuf {
        self.snapshot_dir.join(format!("data_{shard}.json"))
    }

    /// Periodic save interval as a [`Duration`].
    #[must_use]
    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms)
    }

    /// Expirer sleep cap as a [`Duration`].
    #[must_use]
    pub fn expirer_max_sleep(&self) -> Duration {
        Duration::from_millis(self.expirer_max_sleep_ms)
    }

    /// Checks the configuration for values no component can work with.
    ///
    /// # Errors
    ///
    /// Returns the first violated [`ConfigError`]: empty or duplicated shard
    /// names, or a zero capacity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shards.is_empty() {
            return Err(ConfigError::NoShards);
        }
        for (i, name) in self.shards.iter().enumerate() {
            if self.shards[..i].contains(name) {
                return Err(ConfigError::DuplicateShard { name: name.clone() });
            }
        }
        if self.max_entries == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }
}

/// Configuration for the replication master and slave supervision.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Host the master acceptor binds to.
    pub bind_host: String,
    /// Master acceptor port.
    pub master_port: u16,
    /// First port handed to spawned slaves.
    pub slave_port_base: u16,
    /// Number of ports reserved for slaves; zombie cleanup scans this range.
    pub slave_port_span: u16,
    /// Per-slave outbound buffer, in records. A full buffer means the slave
    /// cannot keep up and is dropped (write-stall policy: drop on first
    /// blocked write).
    pub channel_capacity: usize,
    /// Slave-side read-idle timeout in milliseconds; a silent master is
    /// considered dead after this long.
    pub read_idle_timeout_ms: u64,
    /// Master-side limit for how long a connecting slave may take to send
    /// its handshake, in milliseconds.
    pub handshake_timeout_ms: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            master_port: 7000,
            slave_port_base: 7001,
            slave_port_span: 64,
            channel_capacity: 64,
            read_idle_timeout_ms: 30_000,
            handshake_timeout_ms: 5_000,
        }
    }
}

impl ReplicationConfig {
    /// Address the master acceptor binds to.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.master_port)
    }

    /// Slave read-idle timeout as a [`Duration`].
    #[must_use]
    pub fn read_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.read_idle_timeout_ms)
    }

    /// Handshake deadline as a [`Duration`].
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Whether `port` falls inside the reserved slave range.
    #[must_use]
    pub fn in_slave_range(&self, port: u16) -> bool {
        port >= self.slave_port_base
            && u32::from(port) < u32::from(self.slave_port_base) + u32::from(self.slave_port_span)
    }

    /// Checks the port range for overflow past the u16 space.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::PortRangeOverflow`] when `slave_port_base +
    /// slave_port_span` does not fit in a port number.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if u32::from(self.slave_port_base) + u32::from(self.slave_port_span) > u32::from(u16::MAX)
        {
            return Err(ConfigError::PortRangeOverflow {
                base: self.slave_port_base,
                span: self.slave_port_span,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let engine = EngineConfig::default();
        assert_eq!(engine.shards, vec!["node1", "node2", "node3"]);
        assert_eq!(engine.max_entries, 1000);
        assert_eq!(engine.snapshot_interval_ms, 30_000);

        let repl = ReplicationConfig::default();
        assert_eq!(repl.master_port, 7000);
        assert_eq!(repl.slave_port_base, 7001);
    }

    #[test]
    fn snapshot_path_embeds_shard_name() {
        let config = EngineConfig {
            snapshot_dir: PathBuf::from("/var/lib/kvgrid"),
            ..EngineConfig::default()
        };
        assert_eq!(
            config.snapshot_path("node2"),
            PathBuf::from("/var/lib/kvgrid/data_node2.json")
        );
    }

    #[test]
    fn validate_rejects_empty_shards() {
        let config = EngineConfig {
            shards: Vec::new(),
            ..EngineConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoShards));
    }

    #[test]
    fn validate_rejects_duplicate_shards() {
        let config = EngineConfig {
            shards: vec!["a".to_string(), "b".to_string(), "a".to_string()],
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateShard { name }) if name == "a"
        ));
    }

    #[test]
    fn validate_rejects_zero_capacity() {
        let config = EngineConfig {
            max_entries: 0,
            ..EngineConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroCapacity));
    }

    #[test]
    fn slave_range_membership() {
        let repl = ReplicationConfig::default();
        assert!(repl.in_slave_range(7001));
        assert!(repl.in_slave_range(7064));
        assert!(!repl.in_slave_range(7000));
        assert!(!repl.in_slave_range(7065));
    }

    #[test]
    fn port_range_overflow_is_rejected() {
        let repl = ReplicationConfig {
            slave_port_base: u16::MAX - 1,
            slave_port_span: 16,
            ..ReplicationConfig::default()
        };
        assert!(matches!(
            repl.validate(),
            Err(ConfigError::PortRangeOverflow { .. })
        ));
    }
}
