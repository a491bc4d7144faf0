//! The stored entry: value plus expiration bookkeeping.

use std::time::{SystemTime, UNIX_EPOCH};

use kvgrid_core::types::Value;

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// All expiration deadlines in the store are absolute values on this clock,
/// which is what makes them survive a snapshot/restart round trip.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)] // fits i64 until year ~292M
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// One stored association: a value and an optional absolute expiration.
///
/// Recency is tracked separately by the store's recency list, keyed by the
/// entry's key; the entry itself carries no access statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// The stored value; its variant is fixed for the entry's lifetime.
    pub value: Value,
    /// Absolute expiration in millis since epoch, or `None` for no expiry.
    pub expires_at: Option<i64>,
}

impl Entry {
    /// Creates an entry with no expiration.
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    /// Creates an entry expiring at the given absolute instant.
    #[must_use]
    pub fn with_expiry(value: Value, expires_at: i64) -> Self {
        Self {
            value,
            expires_at: Some(expires_at),
        }
    }

    /// Whether the entry is past its deadline at `now`.
    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }

    /// Remaining TTL in whole seconds at `now`, rounded up so a freshly set
    /// 10-second TTL reads back as 10. `None` when the entry has no expiry.
    #[must_use]
    pub fn remaining_ttl_secs(&self, now: i64) -> Option<i64> {
        self.expires_at
            .map(|deadline| {
                let remaining = (deadline.saturating_sub(now)).max(0) as u64;
                remaining.div_ceil(1000) as i64
            })
    }
}
