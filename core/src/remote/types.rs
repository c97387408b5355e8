use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A document as the remote store currently holds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntity {
    pub value: Value,
    pub version: u64,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Precondition attached to a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "version", rename_all = "snake_case")]
pub enum WriteCondition {
    /// Unconditional overwrite.
    Any,
    /// Succeeds only when the entity does not exist yet.
    Absent,
    /// Succeeds only when the stored version matches.
    Version(u64),
}

impl WriteCondition {
    pub fn expected_version(self) -> Option<u64> {
        match self {
            WriteCondition::Version(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SubscriptionTarget {
    Key(String),
    /// Every key sharing the prefix; the closest thing to a query this layer needs.
    Prefix(String),
}

impl SubscriptionTarget {
    pub fn matches(&self, key: &str) -> bool {
        match self {
            SubscriptionTarget::Key(k) => k == key,
            SubscriptionTarget::Prefix(p) => key.starts_with(p.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "entity", rename_all = "snake_case")]
pub enum ChangeKind {
    Upserted(RemoteEntity),
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub key: String,
    pub change: ChangeKind,
}

/// Lazy, unbounded feed of change events. Dropping it unsubscribes; calling
/// `subscribe` again restarts it.
pub type ChangeStream = BoxStream<'static, ChangeEvent>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_target_matching() {
        let key = SubscriptionTarget::Key("users/1".into());
        assert!(key.matches("users/1"));
        assert!(!key.matches("users/10"));

        let prefix = SubscriptionTarget::Prefix("users/".into());
        assert!(prefix.matches("users/10"));
        assert!(!prefix.matches("orders/1"));
    }

    #[test]
    fn write_condition_version() {
        assert_eq!(WriteCondition::Version(4).expected_version(), Some(4));
        assert_eq!(WriteCondition::Absent.expected_version(), None);
    }
}
