//! Error types for the server crate, one enum per concern.
//!
//! Per-operation store errors ([`StoreError`]) are returned to the caller and
//! never leave the store mutated. Background failures (snapshot writes,
//! replication transport) are logged where they occur and surface through the
//! observability event log, never through client operations.

use kvgrid_core::messages::WireError;
use kvgrid_core::types::ValueKind;
use thiserror::Error;

/// Per-operation failures of a single store.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A typed operation hit an entry of an incompatible variant.
    #[error("operation expects a {expected} value but key holds a {actual}")]
    WrongType {
        /// Variant the operation requires.
        expected: ValueKind,
        /// Variant actually stored under the key.
        actual: ValueKind,
    },

    /// An arithmetic operation hit a value that is not a decimal integer.
    #[error("value {value:?} is not an integer")]
    NotInteger {
        /// The offending stored string.
        value: String,
    },

    /// The operation requires the key to exist (rename source).
    #[error("no such key {key:?}")]
    MissingKey {
        /// The missing key.
        key: String,
    },
}

/// Snapshot persistence failures.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Filesystem failure while reading or writing the snapshot.
    #[error("snapshot i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// The file exists but does not parse; loaders treat this as a missing
    /// snapshot after logging it.
    #[error("snapshot is corrupt: {0}")]
    Corrupt(#[source] serde_json::Error),
}

/// Replication link failures (master or slave side).
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// Socket-level failure.
    #[error("replication transport failed: {0}")]
    Io(#[from] std::io::Error),

    /// A frame failed to encode or decode.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// The peer sent nothing for longer than the read-idle timeout.
    #[error("replication link idle for more than {timeout_ms} ms")]
    ReadIdle {
        /// The configured idle limit.
        timeout_ms: u64,
    },

    /// The peer closed the connection.
    #[error("replication link closed by peer")]
    ConnectionClosed,

    /// Framing-layer failure (line too long, invalid UTF-8).
    #[error("replication framing failed: {0}")]
    Framing(String),
}

/// Invalid engine or replication configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The shard list is empty.
    #[error("at least one shard must be configured")]
    NoShards,

    /// Shard names must be unique (they key snapshot files and routing).
    #[error("duplicate shard name {name:?}")]
    DuplicateShard {
        /// The repeated name.
        name: String,
    },

    /// A store must be able to hold at least one entry, otherwise eviction
    /// cannot make forward progress.
    #[error("max_entries must be at least 1")]
    ZeroCapacity,

    /// The slave port range must not wrap around the u16 space.
    #[error("slave port range {base}+{span} exceeds the maximum port")]
    PortRangeOverflow {
        /// First slave port.
        base: u16,
        /// Number of reserved ports.
        span: u16,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_type_message_names_both_kinds() {
        let err = StoreError::WrongType {
            expected: ValueKind::List,
            actual: ValueKind::Str,
        };
        let msg = err.to_string();
        assert!(msg.contains("list"));
        assert!(msg.contains("string"));
    }

    #[test]
    fn not_integer_message_quotes_value() {
        let err = StoreError::NotInteger {
            value: "abc".to_string(),
        };
        assert!(err.to_string().contains("\"abc\""));
    }

    #[test]
    fn wire_error_converts_into_replication_error() {
        let wire = kvgrid_core::messages::ReplicationCommand::decode_line("garbage").unwrap_err();
        let err: ReplicationError = wire.into();
        assert!(matches!(err, ReplicationError::Wire(_)));
    }
}
