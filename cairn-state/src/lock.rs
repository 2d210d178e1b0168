//! Per-stack leases
//!
//! A lease is held for the whole of an update-style operation. It expires
//! unless the holder renews it, so a crashed process cannot wedge a stack
//! forever. A holder that fails to renew must stop writing: once expired, the
//! lease may already belong to someone else.

use cairn_core::StackReference;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default lease length in seconds (15 minutes)
pub const DEFAULT_LOCK_TIMEOUT_SECS: i64 = 900;

/// A lease on one stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockInfo {
    pub id: String,
    /// The stack this lease covers
    pub stack: StackReference,
    /// Operation holding the lease, e.g. `update` or `rename`
    pub operation: String,
    /// `username@hostname` of the holder
    pub who: String,
    pub created: DateTime<Utc>,
    /// Last time the holder renewed the lease
    pub renewed: DateTime<Utc>,
    pub expires: DateTime<Utc>,
}

impl LockInfo {
    pub fn new(stack: StackReference, operation: impl Into<String>) -> Self {
        Self::with_timeout(stack, operation, DEFAULT_LOCK_TIMEOUT_SECS)
    }

    pub fn with_timeout(
        stack: StackReference,
        operation: impl Into<String>,
        timeout_secs: i64,
    ) -> Self {
        let now = Utc::now();

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            stack,
            operation: operation.into(),
            who: current_user(),
            created: now,
            renewed: now,
            expires: now + Duration::seconds(timeout_secs),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires
    }

    pub fn time_remaining(&self) -> Duration {
        self.expires - Utc::now()
    }

    /// Length of one lease period
    pub fn lease(&self) -> Duration {
        self.expires - self.renewed
    }

    /// Whether `other` is this same lease, possibly at a different renewal
    pub fn same_lease(&self, other: &LockInfo) -> bool {
        self.id == other.id && self.stack == other.stack
    }

    /// Start a new lease period of the same length from now
    pub fn renew(&mut self) {
        let lease = self.lease();
        self.extend(lease);
    }

    /// Push the expiry to `lease` from now
    pub fn extend(&mut self, lease: Duration) {
        let now = Utc::now();
        self.renewed = now;
        self.expires = now + lease;
    }
}

/// The current user as `username@hostname`
pub fn current_user() -> String {
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    format!("{}@{}", username, hostname)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev() -> StackReference {
        "acme/web/dev".parse().unwrap()
    }

    #[test]
    fn test_new_lease_covers_stack() {
        let lock = LockInfo::new(dev(), "update");
        assert_eq!(lock.stack, dev());
        assert_eq!(lock.operation, "update");
        assert!(!lock.id.is_empty());
        assert!(lock.who.contains('@'));
        assert_eq!(lock.renewed, lock.created);
        assert_eq!(lock.lease(), Duration::seconds(DEFAULT_LOCK_TIMEOUT_SECS));
        assert!(!lock.is_expired());
    }

    #[test]
    fn test_negative_timeout_is_already_expired() {
        let lock = LockInfo::with_timeout(dev(), "update", -1);
        assert!(lock.is_expired());
    }

    #[test]
    fn test_time_remaining() {
        let lock = LockInfo::with_timeout(dev(), "update", 60);
        let remaining = lock.time_remaining();
        assert!(remaining.num_seconds() > 55);
        assert!(remaining.num_seconds() <= 60);
    }

    #[test]
    fn test_renew_keeps_lease_length() {
        let mut lock = LockInfo::with_timeout(dev(), "update", 30);
        lock.expires = Utc::now() - Duration::seconds(1);
        lock.renewed = lock.expires - Duration::seconds(30);
        assert!(lock.is_expired());

        let before = lock.clone();
        lock.renew();
        assert!(!lock.is_expired());
        assert_eq!(lock.lease(), Duration::seconds(30));
        assert!(lock.renewed > before.renewed);
        assert_eq!(lock.created, before.created);
        assert!(lock.same_lease(&before));
    }

    #[test]
    fn test_extend_sets_new_lease() {
        let mut lock = LockInfo::with_timeout(dev(), "update", 10);
        lock.extend(Duration::minutes(5));
        assert_eq!(lock.lease(), Duration::minutes(5));
        assert!(lock.time_remaining() > Duration::minutes(4));
    }

    #[test]
    fn test_same_lease_compares_id_and_stack() {
        let lock = LockInfo::new(dev(), "update");
        let other = LockInfo::new(dev(), "update");
        assert!(!lock.same_lease(&other));

        let mut moved = lock.clone();
        moved.stack = "acme/web/prod".parse().unwrap();
        assert!(!lock.same_lease(&moved));
    }

    #[test]
    fn test_lock_info_serialization() {
        let lock = LockInfo::new(dev(), "destroy");
        let json = serde_json::to_string_pretty(&lock).unwrap();
        assert!(json.contains("\"stack\""));
        let deserialized: LockInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, lock);
    }
}
