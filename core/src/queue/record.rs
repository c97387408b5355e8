use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

impl std::str::FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(Operation::Create),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(format!(
                "unknown operation '{other}' (expected create, update or delete)"
            )),
        }
    }
}

/// One queued local write, replayed against the remote store in `seq` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRecord {
    pub seq: u64,
    pub key: String,
    pub op: Operation,
    #[serde(default)]
    pub payload: Value,
    /// Remote version the writer last saw; `None` when it never read the entity.
    #[serde(default)]
    pub base_version: Option<u64>,
    /// Values of the touched fields as the writer last saw them, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_fields: Option<Map<String, Value>>,
    pub enqueued_at: DateTime<Utc>,
}

impl MutationRecord {
    pub fn fields(&self) -> Option<&Map<String, Value>> {
        self.payload.as_object()
    }

    pub fn touched_fields(&self) -> Vec<&str> {
        self.fields()
            .map(|m| m.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// The current values of `payload`'s fields in `base`; absent fields read as null.
    pub fn baseline(base: &Value, payload: &Value) -> Map<String, Value> {
        let names = payload.as_object().map(|m| m.keys()).into_iter().flatten();
        names
            .map(|name| {
                let seen = base.get(name).cloned().unwrap_or(Value::Null);
                (name.clone(), seen)
            })
            .collect()
    }

    /// Folds `later` into `self`; `later`'s fields overlay ours.
    pub(crate) fn absorb(&mut self, later: MutationRecord) {
        let mut merged = self.fields().cloned().unwrap_or_default();
        if let Value::Object(fields) = later.payload {
            merged.extend(fields);
        }
        self.payload = Value::Object(merged);
        self.base_version = match (self.base_version, later.base_version) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        // The earliest observation of a field is the baseline for it.
        self.base_fields = match (self.base_fields.take(), later.base_fields) {
            (Some(mut earlier), Some(newer)) => {
                for (name, value) in newer {
                    earlier.entry(name).or_insert(value);
                }
                Some(earlier)
            }
            (a, b) => a.or(b),
        };
        if self.op != Operation::Create {
            self.op = later.op;
        }
        self.enqueued_at = self.enqueued_at.max(later.enqueued_at);
        self.seq = later.seq;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(seq: u64, op: Operation, payload: Value, base: Option<u64>) -> MutationRecord {
        MutationRecord {
            seq,
            key: "users/1".into(),
            op,
            payload,
            base_version: base,
            base_fields: None,
            enqueued_at: Utc::now(),
        }
    }

    #[test]
    fn operation_parses_case_insensitively() {
        assert_eq!("Update".parse::<Operation>().unwrap(), Operation::Update);
        assert!("upsert".parse::<Operation>().is_err());
    }

    #[test]
    fn absorb_overlays_fields_and_keeps_create() {
        let mut first = record(1, Operation::Create, json!({"name": "a", "age": 3}), None);
        let second = record(2, Operation::Update, json!({"name": "b"}), Some(7));
        first.absorb(second);

        assert_eq!(first.op, Operation::Create);
        assert_eq!(first.payload, json!({"name": "b", "age": 3}));
        assert_eq!(first.base_version, Some(7));
        assert_eq!(first.seq, 2);
    }

    #[test]
    fn absorb_keeps_earliest_base_version() {
        let mut first = record(1, Operation::Update, json!({"a": 1}), Some(3));
        first.absorb(record(2, Operation::Update, json!({"b": 2}), Some(5)));
        assert_eq!(first.base_version, Some(3));

        let mut touched = first.touched_fields();
        touched.sort_unstable();
        assert_eq!(touched, vec!["a", "b"]);
    }

    #[test]
    fn absorb_keeps_first_observation_of_each_field() {
        let mut first = record(1, Operation::Update, json!({"title": "a"}), Some(3));
        first.base_fields = Some(MutationRecord::baseline(
            &json!({"title": "draft", "body": "x"}),
            &first.payload,
        ));
        let mut second = record(2, Operation::Update, json!({"title": "b", "body": "y"}), Some(4));
        second.base_fields = Some(MutationRecord::baseline(
            &json!({"title": "a", "body": "x"}),
            &second.payload,
        ));
        first.absorb(second);

        let base = Value::Object(first.base_fields.unwrap());
        assert_eq!(base, json!({"title": "draft", "body": "x"}));
    }

    #[test]
    fn baseline_reads_missing_fields_as_null() {
        let base = MutationRecord::baseline(&json!({"a": 1}), &json!({"a": 2, "b": 3}));
        assert_eq!(Value::Object(base), json!({"a": 1, "b": null}));
    }
}
