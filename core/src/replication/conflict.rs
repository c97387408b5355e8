//! Conflict resolution for replayed mutations.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::queue::{MutationRecord, Operation};
use crate::remote::{RemoteEntity, WriteCondition};

/// How a diverged mutation was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Each touched field goes to whichever side wrote it last; untouched remote fields kept.
    LastWriteWins,
    /// A deletion on either side removed the entity.
    TombstoneWins,
}

/// Which side's values survived a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    Local,
    Remote,
    /// Some touched fields kept the queued value, others the remote one.
    Mixed,
}

/// Kept for every mutation whose target changed remotely after it was queued.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictRecord {
    pub key: String,
    pub seq: u64,
    pub op: Operation,
    pub local_payload: Value,
    pub local_enqueued_at: DateTime<Utc>,
    pub base_version: Option<u64>,
    pub remote_value: Option<Value>,
    pub remote_version: Option<u64>,
    pub remote_updated_at: Option<DateTime<Utc>>,
    pub resolution: Resolution,
    pub winner: Winner,
    /// Touched fields where the later remote edit was kept.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remote_fields: Vec<String>,
    /// Touched fields where the queued value was kept.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub local_fields: Vec<String>,
    /// Value written back, `None` when the entity ends up deleted.
    pub resolved_value: Option<Value>,
    pub detected_at: DateTime<Utc>,
}

/// What replay should do with a record given the current remote state.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayAction {
    Write { value: Value, condition: WriteCondition },
    Delete,
    /// Nothing to send; the record is settled.
    Drop,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayPlan {
    pub action: ReplayAction,
    pub conflict: Option<ConflictRecord>,
}

/// Overlay `fields` on `remote`, leaving every other remote field alone.
pub fn merge_fields(remote: &Value, fields: &Map<String, Value>) -> Value {
    let mut merged = remote.as_object().cloned().unwrap_or_default();
    for (name, value) in fields {
        merged.insert(name.clone(), value.clone());
    }
    Value::Object(merged)
}

/// Decide how to replay `record` against `remote` (`None` = entity absent).
pub fn plan_replay(record: &MutationRecord, remote: Option<&RemoteEntity>) -> ReplayPlan {
    let fields = record.fields().cloned().unwrap_or_default();

    match (record.op, remote) {
        (Operation::Delete, None) => ReplayPlan {
            action: ReplayAction::Drop,
            conflict: None,
        },
        (Operation::Delete, Some(current)) => ReplayPlan {
            action: ReplayAction::Delete,
            conflict: diverged(record, current).then(|| {
                conflict(record, Some(current), Resolution::TombstoneWins, None)
                    .won_by(Winner::Local)
            }),
        },
        (Operation::Create, None) => ReplayPlan {
            action: ReplayAction::Write {
                value: Value::Object(fields),
                condition: WriteCondition::Absent,
            },
            conflict: None,
        },
        (Operation::Update, None) => match record.base_version {
            // The writer saw the entity and it is gone now: the remote tombstone wins.
            Some(_) => ReplayPlan {
                action: ReplayAction::Drop,
                conflict: Some(
                    conflict(record, None, Resolution::TombstoneWins, None).won_by(Winner::Remote),
                ),
            },
            None => ReplayPlan {
                action: ReplayAction::Write {
                    value: Value::Object(fields),
                    condition: WriteCondition::Absent,
                },
                conflict: None,
            },
        },
        (Operation::Create | Operation::Update, Some(current)) => {
            let (local_fields, remote_fields) = split_fields(record, current, &fields);
            let kept: Map<String, Value> = fields
                .into_iter()
                .filter(|(name, _)| !remote_fields.contains(name))
                .collect();
            let value = merge_fields(&current.value, &kept);

            let is_conflict = record.op == Operation::Create
                || diverged(record, current)
                || !remote_fields.is_empty();
            let winner = match (local_fields.is_empty(), remote_fields.is_empty()) {
                (_, true) => Winner::Local,
                (true, false) => Winner::Remote,
                (false, false) => Winner::Mixed,
            };
            let conflict = is_conflict.then(|| ConflictRecord {
                winner,
                remote_fields,
                local_fields,
                ..conflict(
                    record,
                    Some(current),
                    Resolution::LastWriteWins,
                    Some(value.clone()),
                )
            });

            // Every touched field already holds the surviving value.
            let action = if value == current.value {
                ReplayAction::Drop
            } else {
                ReplayAction::Write {
                    value,
                    condition: WriteCondition::Version(current.version),
                }
            };
            ReplayPlan { action, conflict }
        }
    }
}

/// Splits the touched fields into those the queued write keeps and those a
/// later remote edit keeps.
///
/// A field goes to the remote side only when the remote entity was written
/// after the mutation was enqueued, has moved past the version the writer saw,
/// and holds a value for the field other than the one the writer saw. Without a
/// recorded baseline every differing field counts as edited remotely.
fn split_fields(
    record: &MutationRecord,
    current: &RemoteEntity,
    fields: &Map<String, Value>,
) -> (Vec<String>, Vec<String>) {
    let remote_newer = current
        .updated_at
        .is_some_and(|at| at > record.enqueued_at);
    let remote_moved = record.base_version != Some(current.version);

    let mut local = Vec::new();
    let mut remote = Vec::new();
    for (name, queued) in fields {
        let theirs = current.value.get(name).unwrap_or(&Value::Null);
        let edited_remotely = match record.base_fields.as_ref() {
            Some(base) => base.get(name).unwrap_or(&Value::Null) != theirs,
            None => true,
        };
        if remote_newer && remote_moved && edited_remotely && theirs != queued {
            remote.push(name.clone());
        } else {
            local.push(name.clone());
        }
    }
    (local, remote)
}

fn diverged(record: &MutationRecord, current: &RemoteEntity) -> bool {
    record.base_version.is_some_and(|base| base != current.version)
}

fn conflict(
    record: &MutationRecord,
    remote: Option<&RemoteEntity>,
    resolution: Resolution,
    resolved_value: Option<Value>,
) -> ConflictRecord {
    ConflictRecord {
        key: record.key.clone(),
        seq: record.seq,
        op: record.op,
        local_payload: record.payload.clone(),
        local_enqueued_at: record.enqueued_at,
        base_version: record.base_version,
        remote_value: remote.map(|r| r.value.clone()),
        remote_version: remote.map(|r| r.version),
        remote_updated_at: remote.and_then(|r| r.updated_at),
        resolution,
        winner: Winner::Local,
        remote_fields: Vec::new(),
        local_fields: record.touched_fields().into_iter().map(str::to_string).collect(),
        resolved_value,
        detected_at: Utc::now(),
    }
}

impl ConflictRecord {
    fn won_by(mut self, winner: Winner) -> Self {
        if winner == Winner::Remote {
            self.remote_fields = std::mem::take(&mut self.local_fields);
        }
        self.winner = winner;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use chrono::Duration;
    use serde_json::json;

    fn record(op: Operation, payload: Value, base: Option<u64>) -> MutationRecord {
        MutationRecord {
            seq: 1,
            key: "doc/a".into(),
            op,
            payload,
            base_version: base,
            base_fields: None,
            enqueued_at: Utc::now() - Duration::seconds(30),
        }
    }

    fn entity(value: Value, version: u64) -> RemoteEntity {
        RemoteEntity {
            value,
            version,
            updated_at: Some(Utc::now()),
        }
    }

    fn seen(base: Value, rec: &mut MutationRecord) {
        rec.base_fields = Some(MutationRecord::baseline(&base, &rec.payload));
    }

    #[test]
    fn unchanged_target_applies_directly() {
        let rec = record(Operation::Update, json!({"name": "x"}), Some(3));
        let remote = entity(json!({"name": "old", "age": 2}), 3);
        let plan = plan_replay(&rec, Some(&remote));

        assert_eq!(plan.conflict, None);
        assert_eq!(
            plan.action,
            ReplayAction::Write {
                value: json!({"name": "x", "age": 2}),
                condition: WriteCondition::Version(3),
            }
        );
    }

    #[test]
    fn disjoint_remote_change_is_merged() {
        let mut rec = record(Operation::Update, json!({"name": "x"}), Some(1));
        seen(json!({"name": "old"}), &mut rec);
        let remote = entity(json!({"name": "old", "tags": ["t"]}), 2);
        let plan = plan_replay(&rec, Some(&remote));

        let conflict = plan.conflict.expect("diverged base should be recorded");
        assert_eq!(conflict.resolution, Resolution::LastWriteWins);
        assert_eq!(conflict.winner, Winner::Local);
        assert_eq!(conflict.remote_version, Some(2));
        assert_eq!(
            conflict.resolved_value,
            Some(json!({"name": "x", "tags": ["t"]}))
        );
    }

    #[test]
    fn later_remote_edit_of_same_field_is_kept() {
        let mut rec = record(Operation::Update, json!({"title": "local"}), Some(1));
        seen(json!({"title": "draft"}), &mut rec);
        let remote = entity(json!({"title": "remote-later"}), 2);
        let plan = plan_replay(&rec, Some(&remote));

        assert_eq!(plan.action, ReplayAction::Drop);
        let conflict = plan.conflict.expect("lost local field must be recorded");
        assert_eq!(conflict.winner, Winner::Remote);
        assert_eq!(conflict.remote_fields, vec!["title".to_string()]);
        assert_eq!(conflict.resolved_value, Some(json!({"title": "remote-later"})));
    }

    #[test]
    fn fields_split_by_who_wrote_last() {
        let mut rec = record(Operation::Update, json!({"title": "local", "body": "mine"}), Some(1));
        seen(json!({"title": "draft", "body": "text"}), &mut rec);
        let remote = entity(json!({"title": "remote-later", "body": "text"}), 2);
        let plan = plan_replay(&rec, Some(&remote));

        assert_eq!(
            plan.action,
            ReplayAction::Write {
                value: json!({"title": "remote-later", "body": "mine"}),
                condition: WriteCondition::Version(2),
            }
        );
        let conflict = plan.conflict.unwrap();
        assert_eq!(conflict.winner, Winner::Mixed);
        assert_eq!(conflict.local_fields, vec!["body".to_string()]);
    }

    #[test]
    fn queued_edit_newer_than_remote_wins() {
        let mut rec = record(Operation::Update, json!({"title": "local"}), Some(1));
        rec.enqueued_at = Utc::now();
        let mut remote = entity(json!({"title": "remote-earlier"}), 2);
        remote.updated_at = Some(rec.enqueued_at - Duration::seconds(5));
        let plan = plan_replay(&rec, Some(&remote));

        assert_eq!(
            plan.action,
            ReplayAction::Write {
                value: json!({"title": "local"}),
                condition: WriteCondition::Version(2),
            }
        );
        assert_eq!(plan.conflict.map(|c| c.winner), Some(Winner::Local));
    }

    #[test]
    fn remote_deletion_beats_queued_update() {
        let rec = record(Operation::Update, json!({"name": "x"}), Some(4));
        let plan = plan_replay(&rec, None);
        assert_eq!(plan.action, ReplayAction::Drop);
        let conflict = plan.conflict.unwrap();
        assert_eq!(conflict.resolution, Resolution::TombstoneWins);
        assert_eq!(conflict.winner, Winner::Remote);
    }

    #[test]
    fn local_delete_wins_over_remote_edit() {
        let rec = record(Operation::Delete, Value::Null, Some(1));
        let plan = plan_replay(&rec, Some(&entity(json!({"a": 1}), 5)));
        assert_eq!(plan.action, ReplayAction::Delete);
        assert_eq!(
            plan.conflict.map(|c| c.resolution),
            Some(Resolution::TombstoneWins)
        );
    }

    #[test]
    fn delete_of_missing_entity_is_settled() {
        let rec = record(Operation::Delete, Value::Null, None);
        assert_eq!(plan_replay(&rec, None).action, ReplayAction::Drop);
    }
}
