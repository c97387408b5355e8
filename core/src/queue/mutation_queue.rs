use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};

use super::journal::{Journal, JournalEntry};
use super::record::{MutationRecord, Operation};
use crate::error::QueueError;
use crate::remote::RemoteEntity;
use crate::util::lock;

/// Journals tried next to the configured one when it is held by another tab.
pub const MAX_QUEUE_SLOTS: usize = 16;

/// Journal path for `slot`; slot 0 is `base` itself, slot 2 of `queue.jsonl` is `queue.2.jsonl`.
pub fn slot_path(base: &Path, slot: usize) -> PathBuf {
    if slot == 0 {
        return base.to_path_buf();
    }
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "queue".to_string());
    let name = match base.extension() {
        Some(ext) => format!("{stem}.{slot}.{}", ext.to_string_lossy()),
        None => format!("{stem}.{slot}"),
    };
    base.with_file_name(name)
}

/// What `enqueue` did with the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EnqueueOutcome {
    Appended { seq: u64 },
    /// An unflushed create/update for the key was folded into this record.
    Superseded { seq: u64, replaced: u64 },
    /// A pending delete already covers the key.
    CoveredByDelete { seq: u64 },
}

impl EnqueueOutcome {
    pub fn seq(&self) -> u64 {
        match *self {
            EnqueueOutcome::Appended { seq }
            | EnqueueOutcome::Superseded { seq, .. }
            | EnqueueOutcome::CoveredByDelete { seq } => seq,
        }
    }
}

/// Durable FIFO of local writes waiting to reach the remote store.
pub struct LocalMutationQueue {
    inner: Mutex<QueueInner>,
    compact_threshold: usize,
}

struct QueueInner {
    records: VecDeque<MutationRecord>,
    next_seq: u64,
    /// Head record handed to the replication engine and not yet settled.
    in_flight: Option<u64>,
    journal: Option<Journal>,
}

impl LocalMutationQueue {
    /// A queue that does not survive the process. Used when no data dir is available.
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                records: VecDeque::new(),
                next_seq: 1,
                in_flight: None,
                journal: None,
            }),
            compact_threshold: usize::MAX,
        }
    }

    pub fn open(path: impl AsRef<Path>, compact_threshold: usize) -> Result<Self, QueueError> {
        let path = path.as_ref();
        let (journal, replayed) = Journal::open(path)?;
        tracing::info!(
            target: "tabsync.queue",
            path = %path.display(),
            pending = replayed.records.len(),
            next_seq = replayed.next_seq,
            "mutation queue opened"
        );
        Ok(Self {
            inner: Mutex::new(QueueInner {
                records: replayed.records.into(),
                next_seq: replayed.next_seq,
                in_flight: None,
                journal: Some(journal),
            }),
            compact_threshold: compact_threshold.max(1),
        })
    }

    /// Opens the first journal next to `base` that no other process holds, then
    /// folds in the records of slots whose owners have gone away.
    pub fn open_slot(base: impl AsRef<Path>, compact_threshold: usize) -> Result<Self, QueueError> {
        let base = base.as_ref();
        let mut opened = None;
        for slot in 0..MAX_QUEUE_SLOTS {
            match Self::open(slot_path(base, slot), compact_threshold) {
                Ok(queue) => {
                    opened = Some((slot, queue));
                    break;
                }
                Err(QueueError::Locked { .. }) => continue,
                Err(err) => return Err(err),
            }
        }
        let Some((slot, queue)) = opened else {
            return Err(QueueError::Locked {
                path: base.to_path_buf(),
            });
        };

        for other in (0..MAX_QUEUE_SLOTS).filter(|s| *s != slot) {
            let orphan = slot_path(base, other);
            if !orphan.exists() {
                continue;
            }
            match queue.adopt(&orphan) {
                Ok(_) | Err(QueueError::Locked { .. }) => {}
                Err(err) => tracing::warn!(
                    target: "tabsync.queue",
                    path = %orphan.display(),
                    error = %err,
                    "could not adopt abandoned queue journal"
                ),
            }
        }
        Ok(queue)
    }

    /// Moves the records of an unheld journal to the back of this queue and
    /// deletes it. Records keep their enqueue time and get fresh sequence numbers.
    fn adopt(&self, orphan: &Path) -> Result<usize, QueueError> {
        let (journal, replayed) = Journal::open(orphan)?;
        let adopted = replayed.records.len();
        {
            let mut inner = lock(&self.inner);
            for mut record in replayed.records {
                record.seq = inner.next_seq;
                inner.append(record)?;
            }
            inner.maybe_compact(self.compact_threshold)?;
        }
        journal.discard()?;
        tracing::info!(
            target: "tabsync.queue",
            path = %orphan.display(),
            adopted,
            "abandoned queue journal adopted"
        );
        Ok(adopted)
    }

    pub fn path(&self) -> Option<PathBuf> {
        lock(&self.inner)
            .journal
            .as_ref()
            .map(|j| j.path().to_path_buf())
    }

    pub fn enqueue(&self, key: &str, op: Operation, payload: Value) -> Result<u64, QueueError> {
        self.enqueue_with_base(key, op, payload, None)
            .map(|outcome| outcome.seq())
    }

    /// Durably records the write and returns without touching the network.
    pub fn enqueue_with_base(
        &self,
        key: &str,
        op: Operation,
        payload: Value,
        base_version: Option<u64>,
    ) -> Result<EnqueueOutcome, QueueError> {
        self.insert(key, op, payload, base_version, None)
    }

    /// Like `enqueue_with_base`, also keeping what `base` held for each touched
    /// field so replay can tell which fields the remote side edited since.
    pub fn enqueue_based_on(
        &self,
        key: &str,
        op: Operation,
        payload: Value,
        base: &RemoteEntity,
    ) -> Result<EnqueueOutcome, QueueError> {
        let base_fields =
            (op != Operation::Delete).then(|| MutationRecord::baseline(&base.value, &payload));
        self.insert(key, op, payload, Some(base.version), base_fields)
    }

    fn insert(
        &self,
        key: &str,
        op: Operation,
        payload: Value,
        base_version: Option<u64>,
        base_fields: Option<Map<String, Value>>,
    ) -> Result<EnqueueOutcome, QueueError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(QueueError::InvalidPayload {
                key: String::new(),
                reason: "entity key is empty".into(),
            });
        }
        let payload = match op {
            Operation::Delete => Value::Null,
            Operation::Create | Operation::Update if payload.is_object() => payload,
            _ => {
                return Err(QueueError::InvalidPayload {
                    key: key.to_string(),
                    reason: format!("{op} payload must be a JSON object"),
                })
            }
        };

        let mut inner = lock(&self.inner);
        let record = MutationRecord {
            seq: inner.next_seq,
            key: key.to_string(),
            op,
            payload,
            base_version,
            base_fields,
            enqueued_at: Utc::now(),
        };

        let in_flight = inner.in_flight;
        // The in-flight record may already be on the remote, so it is never rewritten.
        let latest = inner
            .records
            .iter()
            .rposition(|r| r.key == record.key && Some(r.seq) != in_flight);

        let outcome = match latest {
            Some(idx) if inner.records[idx].op == Operation::Delete => {
                if record.op == Operation::Create {
                    inner.append(record)?
                } else {
                    EnqueueOutcome::CoveredByDelete {
                        seq: inner.records[idx].seq,
                    }
                }
            }
            Some(idx) => {
                let merged = if record.op == Operation::Delete {
                    record
                } else {
                    let mut merged = inner.records[idx].clone();
                    merged.absorb(record);
                    merged
                };
                inner.supersede(idx, merged)?
            }
            None => {
                // Delete pending in flight: later edits to the same key are moot.
                let in_flight_delete = in_flight.and_then(|seq| {
                    inner
                        .records
                        .iter()
                        .find(|r| r.seq == seq && r.key == record.key && r.op == Operation::Delete)
                        .map(|r| r.seq)
                });
                match in_flight_delete {
                    Some(seq) if record.op != Operation::Create => {
                        EnqueueOutcome::CoveredByDelete { seq }
                    }
                    _ => inner.append(record)?,
                }
            }
        };

        tracing::debug!(
            target: "tabsync.queue",
            key,
            op = %op,
            outcome = ?outcome,
            pending = inner.records.len(),
            "mutation enqueued"
        );
        inner.maybe_compact(self.compact_threshold)?;
        Ok(outcome)
    }

    pub fn peek(&self) -> Option<MutationRecord> {
        lock(&self.inner).records.front().cloned()
    }

    /// Hands out the head record; it stays queued until acknowledged.
    pub fn checkout(&self) -> Option<MutationRecord> {
        let mut inner = lock(&self.inner);
        let head = inner.records.front().cloned()?;
        inner.in_flight = Some(head.seq);
        Some(head)
    }

    /// Returns a checked-out record to the queue untouched.
    pub fn release(&self, seq: u64) {
        let mut inner = lock(&self.inner);
        if inner.in_flight == Some(seq) {
            inner.in_flight = None;
        }
    }

    /// Removes a record the remote accepted (or durably rejected).
    pub fn acknowledge(&self, seq: u64) -> Result<bool, QueueError> {
        let mut inner = lock(&self.inner);
        if inner.in_flight == Some(seq) {
            inner.in_flight = None;
        }
        let Some(idx) = inner.records.iter().position(|r| r.seq == seq) else {
            return Ok(false);
        };
        if let Some(journal) = inner.journal.as_mut() {
            journal.append(&JournalEntry::Remove { seq })?;
        }
        inner.records.remove(idx);
        inner.maybe_compact(self.compact_threshold)?;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).records.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner).records.is_empty()
    }

    pub fn snapshot(&self) -> Vec<MutationRecord> {
        lock(&self.inner).records.iter().cloned().collect()
    }

    /// Rewrites the journal down to the pending records.
    pub fn compact(&self) -> Result<(), QueueError> {
        lock(&self.inner).rewrite()
    }
}

impl QueueInner {
    fn append(&mut self, record: MutationRecord) -> Result<EnqueueOutcome, QueueError> {
        if let Some(journal) = self.journal.as_mut() {
            journal.append(&JournalEntry::Append {
                record: record.clone(),
            })?;
        }
        let seq = record.seq;
        self.next_seq = seq + 1;
        self.records.push_back(record);
        Ok(EnqueueOutcome::Appended { seq })
    }

    fn supersede(&mut self, idx: usize, record: MutationRecord) -> Result<EnqueueOutcome, QueueError> {
        let replaced = self.records[idx].seq;
        if let Some(journal) = self.journal.as_mut() {
            journal.append(&JournalEntry::Supersede {
                replaced,
                record: record.clone(),
            })?;
        }
        let seq = record.seq;
        self.next_seq = seq + 1;
        self.records.remove(idx);
        self.records.push_back(record);
        Ok(EnqueueOutcome::Superseded { seq, replaced })
    }

    fn maybe_compact(&mut self, threshold: usize) -> Result<(), QueueError> {
        let due = self
            .journal
            .as_ref()
            .is_some_and(|j| j.appended() >= threshold);
        if due {
            self.rewrite()?;
        }
        Ok(())
    }

    fn rewrite(&mut self) -> Result<(), QueueError> {
        let records: Vec<MutationRecord> = self.records.iter().cloned().collect();
        let next_seq = self.next_seq;
        match self.journal.as_mut() {
            Some(journal) => journal.rewrite(&records, next_seq),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn keys_and_ops(queue: &LocalMutationQueue) -> Vec<(String, Operation)> {
        queue.snapshot().into_iter().map(|r| (r.key, r.op)).collect()
    }

    #[test]
    fn sequence_numbers_are_monotonic() {
        let queue = LocalMutationQueue::in_memory();
        let a = queue.enqueue("a", Operation::Create, json!({"x": 1})).unwrap();
        let b = queue.enqueue("b", Operation::Create, json!({"x": 2})).unwrap();
        assert!(b > a);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn later_update_supersedes_unflushed_update() {
        let queue = LocalMutationQueue::in_memory();
        queue.enqueue("a", Operation::Update, json!({"name": "x"})).unwrap();
        queue.enqueue("b", Operation::Update, json!({"n": 1})).unwrap();
        let outcome = queue
            .enqueue_with_base("a", Operation::Update, json!({"age": 4}), None)
            .unwrap();

        assert!(matches!(outcome, EnqueueOutcome::Superseded { replaced: 1, .. }));
        let records = queue.snapshot();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].key, "a");
        assert_eq!(records[1].payload, json!({"name": "x", "age": 4}));
    }

    #[test]
    fn delete_wins_over_pending_update() {
        let queue = LocalMutationQueue::in_memory();
        queue.enqueue("a", Operation::Update, json!({"name": "x"})).unwrap();
        queue.enqueue("a", Operation::Delete, Value::Null).unwrap();
        assert_eq!(keys_and_ops(&queue), vec![("a".to_string(), Operation::Delete)]);

        let outcome = queue
            .enqueue_with_base("a", Operation::Update, json!({"name": "y"}), None)
            .unwrap();
        assert!(matches!(outcome, EnqueueOutcome::CoveredByDelete { .. }));
        assert_eq!(keys_and_ops(&queue), vec![("a".to_string(), Operation::Delete)]);
    }

    #[test]
    fn create_after_delete_is_kept() {
        let queue = LocalMutationQueue::in_memory();
        queue.enqueue("a", Operation::Delete, Value::Null).unwrap();
        queue.enqueue("a", Operation::Create, json!({"v": 1})).unwrap();
        assert_eq!(
            keys_and_ops(&queue),
            vec![
                ("a".to_string(), Operation::Delete),
                ("a".to_string(), Operation::Create)
            ]
        );
    }

    #[test]
    fn in_flight_record_is_not_superseded() {
        let queue = LocalMutationQueue::in_memory();
        queue.enqueue("a", Operation::Update, json!({"v": 1})).unwrap();
        let head = queue.checkout().unwrap();
        queue.enqueue("a", Operation::Update, json!({"v": 2})).unwrap();
        assert_eq!(queue.len(), 2);

        assert!(queue.acknowledge(head.seq).unwrap());
        assert_eq!(queue.peek().unwrap().payload, json!({"v": 2}));
    }

    #[test]
    fn rejects_non_object_payload() {
        let queue = LocalMutationQueue::in_memory();
        let err = queue.enqueue("a", Operation::Update, json!([1, 2])).unwrap_err();
        assert!(matches!(err, QueueError::InvalidPayload { .. }));
        assert!(queue.is_empty());
    }

    #[test]
    fn survives_reopen_and_compaction() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.jsonl");
        {
            let queue = LocalMutationQueue::open(&path, 3).unwrap();
            for i in 0..5 {
                queue
                    .enqueue(&format!("k{i}"), Operation::Create, json!({"i": i}))
                    .unwrap();
            }
            let head = queue.checkout().unwrap();
            queue.acknowledge(head.seq).unwrap();
        }

        let queue = LocalMutationQueue::open(&path, 3).unwrap();
        let keys: Vec<String> = queue.snapshot().into_iter().map(|r| r.key).collect();
        assert_eq!(keys, vec!["k1", "k2", "k3", "k4"]);
        let next = queue.enqueue("k5", Operation::Create, json!({})).unwrap();
        assert_eq!(next, 6);
    }

    #[test]
    fn based_on_keeps_the_fields_the_writer_saw() {
        let queue = LocalMutationQueue::in_memory();
        let base = RemoteEntity {
            value: json!({"title": "draft", "body": "text"}),
            version: 4,
            updated_at: None,
        };
        queue
            .enqueue_based_on("doc", Operation::Update, json!({"title": "mine"}), &base)
            .unwrap();

        let head = queue.peek().unwrap();
        assert_eq!(head.base_version, Some(4));
        assert_eq!(
            Value::Object(head.base_fields.unwrap()),
            json!({"title": "draft"})
        );
    }

    #[test]
    fn two_queues_cannot_share_a_journal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.jsonl");
        let first = LocalMutationQueue::open(&path, 100).unwrap();
        assert!(matches!(
            LocalMutationQueue::open(&path, 100),
            Err(QueueError::Locked { .. })
        ));

        let second = LocalMutationQueue::open_slot(&path, 100).unwrap();
        assert_eq!(second.path(), Some(dir.path().join("queue.1.jsonl")));

        first.enqueue("a", Operation::Create, json!({"v": 1})).unwrap();
        second.enqueue("b", Operation::Create, json!({"v": 2})).unwrap();
        assert_eq!(keys_and_ops(&first), vec![("a".to_string(), Operation::Create)]);
        assert_eq!(keys_and_ops(&second), vec![("b".to_string(), Operation::Create)]);
    }

    #[test]
    fn abandoned_slot_is_adopted_by_the_next_opener() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.jsonl");
        let first = LocalMutationQueue::open_slot(&path, 100).unwrap();
        first.enqueue("a", Operation::Create, json!({"v": 1})).unwrap();
        {
            let second = LocalMutationQueue::open_slot(&path, 100).unwrap();
            second.enqueue("b", Operation::Create, json!({"v": 2})).unwrap();
        }
        drop(first);

        let reopened = LocalMutationQueue::open_slot(&path, 100).unwrap();
        assert_eq!(reopened.path(), Some(path.clone()));
        let keys: Vec<String> = reopened.snapshot().into_iter().map(|r| r.key).collect();
        assert_eq!(keys, vec!["a", "b"]);
        let seqs: Vec<u64> = reopened.snapshot().into_iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert!(!dir.path().join("queue.1.jsonl").exists());
    }

    #[test]
    fn slot_paths_sit_next_to_the_base() {
        let base = Path::new("/data/queue.jsonl");
        assert_eq!(slot_path(base, 0), PathBuf::from("/data/queue.jsonl"));
        assert_eq!(slot_path(base, 3), PathBuf::from("/data/queue.3.jsonl"));
        assert_eq!(slot_path(Path::new("q"), 1), PathBuf::from("q.1"));
    }
}
