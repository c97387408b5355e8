use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-tab instance identity. Fresh for every process start.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(String);

impl TabId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TabId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for TabId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Exclusive, time-bounded right to write the shared local cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabOwnershipLease {
    pub lease_id: String,
    /// Cache instance the lease covers.
    pub namespace: String,
    pub holder: TabId,
    pub acquired_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub ttl_ms: u64,
    /// Bumped every time the lease changes hands.
    pub epoch: u64,
}

impl TabOwnershipLease {
    pub fn new(namespace: &str, holder: TabId, ttl: Duration, now: DateTime<Utc>) -> Self {
        Self {
            lease_id: uuid::Uuid::new_v4().to_string(),
            namespace: namespace.to_string(),
            holder,
            acquired_at: now,
            last_heartbeat: now,
            ttl_ms: ttl.as_millis() as u64,
            epoch: 1,
        }
    }

    /// A new lease taking over from an abandoned one.
    pub fn succeed(previous: &TabOwnershipLease, holder: TabId, ttl: Duration, now: DateTime<Utc>) -> Self {
        let mut lease = Self::new(&previous.namespace, holder, ttl, now);
        lease.epoch = previous.epoch + 1;
        lease
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.last_heartbeat + ChronoDuration::milliseconds(self.ttl_ms as i64)
    }

    /// A holder that crashed stops renewing; its lease lapses after the TTL.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    pub fn remaining_ttl_at(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at() - now).to_std().unwrap_or_default()
    }

    pub fn renewed_at(&self, now: DateTime<Utc>) -> Self {
        Self {
            last_heartbeat: now,
            ..self.clone()
        }
    }

    pub fn is_same_grant(&self, other: &TabOwnershipLease) -> bool {
        self.lease_id == other.lease_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_expires_after_ttl_without_heartbeat() {
        let now = Utc::now();
        let lease = TabOwnershipLease::new("demo", TabId::from("tab-a"), Duration::from_secs(10), now);

        assert!(!lease.is_expired_at(now + ChronoDuration::seconds(9)));
        assert!(lease.is_expired_at(now + ChronoDuration::seconds(10)));
        assert_eq!(lease.remaining_ttl_at(now + ChronoDuration::seconds(4)), Duration::from_secs(6));
        assert_eq!(lease.remaining_ttl_at(now + ChronoDuration::seconds(40)), Duration::ZERO);
    }

    #[test]
    fn renewal_extends_deadline_and_keeps_grant() {
        let now = Utc::now();
        let lease = TabOwnershipLease::new("demo", TabId::from("tab-a"), Duration::from_secs(10), now);
        let renewed = lease.renewed_at(now + ChronoDuration::seconds(8));

        assert!(!renewed.is_expired_at(now + ChronoDuration::seconds(15)));
        assert!(renewed.is_same_grant(&lease));
        assert_eq!(renewed.acquired_at, lease.acquired_at);
    }

    #[test]
    fn takeover_bumps_epoch() {
        let now = Utc::now();
        let old = TabOwnershipLease::new("demo", TabId::from("tab-a"), Duration::from_secs(1), now);
        let new = TabOwnershipLease::succeed(&old, TabId::from("tab-b"), Duration::from_secs(1), now);
        assert_eq!(new.epoch, 2);
        assert!(!new.is_same_grant(&old));
        assert_eq!(new.namespace, "demo");
    }
}
