//! Replication records: one typed command per master mutation.
//!
//! [`ReplicationCommand`] is the typed in-process form; [`WireRecord`] is its
//! serde shape on the wire, `{"command":"<op>","args":[...]}`. Every mutating
//! store operation maps to exactly one command, so a slave replaying the
//! stream in order converges on the master's state. `set` carries the full
//! JSON value encoding, which lets the initial resync ship list and hash
//! entries through the same record shape as plain strings.

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::types::Value;

/// Errors arising while encoding or decoding wire frames.
#[derive(Debug, Error)]
pub enum WireError {
    /// JSON serialization failed (not expected for well-formed commands).
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),

    /// The received line is not valid JSON for the expected shape.
    #[error("failed to decode frame: {0}")]
    Decode(#[source] serde_json::Error),

    /// A structurally valid frame of the wrong type (e.g. not a handshake).
    #[error("unexpected frame type {kind:?}")]
    UnexpectedFrame {
        /// The discriminator that was received.
        kind: String,
    },

    /// The command name is not part of the protocol.
    #[error("unknown replication command {command:?}")]
    UnknownCommand {
        /// The received command name.
        command: String,
    },

    /// The args array does not match the command's arity or types.
    #[error("bad args for {command:?}: {reason}")]
    BadArgs {
        /// The command whose args were malformed.
        command: &'static str,
        /// What was wrong.
        reason: String,
    },
}

/// The serde shape of one record on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRecord {
    /// Lowercase operation name.
    pub command: String,
    /// Positional operation arguments.
    pub args: Vec<serde_json::Value>,
}

/// One mutation, typed. Produced by the master store on every successful
/// write and applied by slaves through the normal operation API.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicationCommand {
    /// Create or replace an entry. `ttl_seconds` is the remaining TTL at
    /// emission time, or `None` for no expiry.
    Set {
        /// Entry key.
        key: String,
        /// Full value, any variant.
        value: Value,
        /// Remaining TTL in seconds, if the entry expires.
        ttl_seconds: Option<i64>,
    },
    /// Remove an entry.
    Delete {
        /// Entry key.
        key: String,
    },
    /// Set an absolute expiration relative to apply time.
    Expire {
        /// Entry key.
        key: String,
        /// TTL in seconds from apply time.
        ttl_seconds: i64,
    },
    /// Remove every entry.
    FlushAll,
    /// Increment an integer string by one.
    Incr {
        /// Entry key.
        key: String,
    },
    /// Decrement an integer string by one.
    Decr {
        /// Entry key.
        key: String,
    },
    /// Move an entry to a new key, overwriting the destination.
    Rename {
        /// Source key.
        key: String,
        /// Destination key.
        new_key: String,
    },
    /// Prepend to a list, creating it if absent.
    LPush {
        /// Entry key.
        key: String,
        /// Element to prepend.
        element: String,
    },
    /// Append to a list, creating it if absent.
    RPush {
        /// Entry key.
        key: String,
        /// Element to append.
        element: String,
    },
    /// Pop from the front of a list.
    LPop {
        /// Entry key.
        key: String,
    },
    /// Pop from the back of a list.
    RPop {
        /// Entry key.
        key: String,
    },
    /// Set one hash field, creating the hash if absent.
    HSet {
        /// Entry key.
        key: String,
        /// Field name.
        field: String,
        /// Field value.
        value: String,
    },
    /// Remove one hash field.
    HDel {
        /// Entry key.
        key: String,
        /// Field name.
        field: String,
    },
    /// Integer add on one hash field (absent field counts from zero).
    HIncrBy {
        /// Entry key.
        key: String,
        /// Field name.
        field: String,
        /// Signed delta.
        delta: i64,
    },
}

impl ReplicationCommand {
    /// The lowercase wire name of this command.
    #[must_use]
    pub fn command_name(&self) -> &'static str {
        match self {
            Self::Set { .. } => "set",
            Self::Delete { .. } => "delete",
            Self::Expire { .. } => "expire",
            Self::FlushAll => "flushall",
            Self::Incr { .. } => "incr",
            Self::Decr { .. } => "decr",
            Self::Rename { .. } => "rename",
            Self::LPush { .. } => "lpush",
            Self::RPush { .. } => "rpush",
            Self::LPop { .. } => "lpop",
            Self::RPop { .. } => "rpop",
            Self::HSet { .. } => "hset",
            Self::HDel { .. } => "hdel",
            Self::HIncrBy { .. } => "hincrby",
        }
    }

    /// The key this command targets, if any (`flushall` has none).
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::FlushAll => None,
            Self::Set { key, .. }
            | Self::Delete { key }
            | Self::Expire { key, .. }
            | Self::Incr { key }
            | Self::Decr { key }
            | Self::Rename { key, .. }
            | Self::LPush { key, .. }
            | Self::RPush { key, .. }
            | Self::LPop { key }
            | Self::RPop { key }
            | Self::HSet { key, .. }
            | Self::HDel { key, .. }
            | Self::HIncrBy { key, .. } => Some(key),
        }
    }

    /// Converts to the wire shape.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Encode`] if the value payload cannot be
    /// serialized (not expected for well-formed values).
    pub fn to_wire(&self) -> Result<WireRecord, WireError> {
        let args = match self {
            Self::Set {
                key,
                value,
                ttl_seconds,
            } => {
                let value = serde_json::to_value(value).map_err(WireError::Encode)?;
                vec![json!(key), value, json!(ttl_seconds)]
            }
            Self::Delete { key }
            | Self::Incr { key }
            | Self::Decr { key }
            | Self::LPop { key }
            | Self::RPop { key } => vec![json!(key)],
            Self::Expire { key, ttl_seconds } => vec![json!(key), json!(ttl_seconds)],
            Self::FlushAll => Vec::new(),
            Self::Rename { key, new_key } => vec![json!(key), json!(new_key)],
            Self::LPush { key, element } | Self::RPush { key, element } => {
                vec![json!(key), json!(element)]
            }
            Self::HSet { key, field, value } => vec![json!(key), json!(field), json!(value)],
            Self::HDel { key, field } => vec![json!(key), json!(field)],
            Self::HIncrBy { key, field, delta } => {
                vec![json!(key), json!(field), json!(delta)]
            }
        };
        Ok(WireRecord {
            command: self.command_name().to_string(),
            args,
        })
    }

    /// Parses a wire record back into a typed command.
    ///
    /// Extra trailing args are ignored; missing or mistyped args fail.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::UnknownCommand`] for names outside the protocol
    /// and [`WireError::BadArgs`] for arity or type mismatches.
    pub fn from_wire(record: &WireRecord) -> Result<Self, WireError> {
        let args = ArgReader::new(&record.args);
        match record.command.as_str() {
            "set" => {
                let key = args.string(0, "set")?;
                let value: Value = serde_json::from_value(args.raw(1, "set")?.clone())
                    .map_err(|e| WireError::BadArgs {
                        command: "set",
                        reason: format!("value: {e}"),
                    })?;
                let ttl_seconds = args.opt_int(2, "set")?;
                Ok(Self::Set {
                    key,
                    value,
                    ttl_seconds,
                })
            }
            "delete" => Ok(Self::Delete {
                key: args.string(0, "delete")?,
            }),
            "expire" => Ok(Self::Expire {
                key: args.string(0, "expire")?,
                ttl_seconds: args.int(1, "expire")?,
            }),
            "flushall" => Ok(Self::FlushAll),
            "incr" => Ok(Self::Incr {
                key: args.string(0, "incr")?,
            }),
            "decr" => Ok(Self::Decr {
                key: args.string(0, "decr")?,
            }),
            "rename" => Ok(Self::Rename {
                key: args.string(0, "rename")?,
                new_key: args.string(1, "rename")?,
            }),
            "lpush" => Ok(Self::LPush {
                key: args.string(0, "lpush")?,
                element: args.string(1, "lpush")?,
            }),
            "rpush" => Ok(Self::RPush {
                key: args.string(0, "rpush")?,
                element: args.string(1, "rpush")?,
            }),
            "lpop" => Ok(Self::LPop {
                key: args.string(0, "lpop")?,
            }),
            "rpop" => Ok(Self::RPop {
                key: args.string(0, "rpop")?,
            }),
            "hset" => Ok(Self::HSet {
                key: args.string(0, "hset")?,
                field: args.string(1, "hset")?,
                value: args.string(2, "hset")?,
            }),
            "hdel" => Ok(Self::HDel {
                key: args.string(0, "hdel")?,
                field: args.string(1, "hdel")?,
            }),
            "hincrby" => Ok(Self::HIncrBy {
                key: args.string(0, "hincrby")?,
                field: args.string(1, "hincrby")?,
                delta: args.int(2, "hincrby")?,
            }),
            other => Err(WireError::UnknownCommand {
                command: other.to_string(),
            }),
        }
    }

    /// Encodes the command as a single JSON line (without the terminator).
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Encode`] if serialization fails.
    pub fn encode_line(&self) -> Result<String, WireError> {
        let record = self.to_wire()?;
        serde_json::to_string(&record).map_err(WireError::Encode)
    }

    /// Decodes one received line into a typed command.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Decode`] on malformed JSON, plus the errors of
    /// [`Self::from_wire`].
    pub fn decode_line(line: &str) -> Result<Self, WireError> {
        let record: WireRecord = serde_json::from_str(line).map_err(WireError::Decode)?;
        Self::from_wire(&record)
    }
}

/// Positional access into a wire args array with uniform error reporting.
struct ArgReader<'a> {
    args: &'a [serde_json::Value],
}

impl<'a> ArgReader<'a> {
    fn new(args: &'a [serde_json::Value]) -> Self {
        Self { args }
    }

    fn raw(&self, idx: usize, command: &'static str) -> Result<&'a serde_json::Value, WireError> {
        self.args.get(idx).ok_or_else(|| WireError::BadArgs {
            command,
            reason: format!("missing arg {idx}"),
        })
    }

    fn string(&self, idx: usize, command: &'static str) -> Result<String, WireError> {
        self.raw(idx, command)?
            .as_str()
            .map(ToString::to_string)
            .ok_or_else(|| WireError::BadArgs {
                command,
                reason: format!("arg {idx} must be a string"),
            })
    }

    fn int(&self, idx: usize, command: &'static str) -> Result<i64, WireError> {
        self.raw(idx, command)?
            .as_i64()
            .ok_or_else(|| WireError::BadArgs {
                command,
                reason: format!("arg {idx} must be an integer"),
            })
    }

    fn opt_int(&self, idx: usize, command: &'static str) -> Result<Option<i64>, WireError> {
        match self.raw(idx, command)? {
            serde_json::Value::Null => Ok(None),
            v => v.as_i64().map(Some).ok_or_else(|| WireError::BadArgs {
                command,
                reason: format!("arg {idx} must be an integer or null"),
            }),
        }
    }
}
