//! Append-only JSON-lines log backing the mutation queue.
//!
//! Every change is appended and synced before the caller sees it. Rewrites go
//! through a temp file + fsync + rename so a crash leaves either the old or the
//! new journal, never a mix. A journal belongs to one process at a time: an
//! exclusive OS lock on `<journal>.lock` is taken before replay and held until
//! the journal is dropped.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use super::record::MutationRecord;
use crate::error::QueueError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub(crate) enum JournalEntry {
    Append { record: MutationRecord },
    Remove { seq: u64 },
    Supersede { replaced: u64, record: MutationRecord },
    Checkpoint { next_seq: u64 },
}

#[derive(Debug, Default)]
pub(crate) struct Replayed {
    pub records: Vec<MutationRecord>,
    pub next_seq: u64,
}

pub(crate) struct Journal {
    path: PathBuf,
    file: File,
    appended: usize,
    // Released when the journal is dropped.
    _lock: File,
}

impl Journal {
    pub fn open(path: &Path) -> Result<(Self, Replayed), QueueError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let lock = take_lock(path)?;

        let (replayed, torn_tail) = if path.exists() {
            replay(path)?
        } else {
            (Replayed { records: Vec::new(), next_seq: 1 }, false)
        };

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut journal = Self {
            path: path.to_path_buf(),
            file,
            appended: 0,
            _lock: lock,
        };

        if torn_tail {
            tracing::warn!(
                target: "tabsync.queue",
                path = %path.display(),
                "journal ended in a partial line; rewriting"
            );
            journal.rewrite(&replayed.records, replayed.next_seq)?;
        }

        Ok((journal, replayed))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries appended since the last rewrite.
    pub fn appended(&self) -> usize {
        self.appended
    }

    pub fn append(&mut self, entry: &JournalEntry) -> Result<(), QueueError> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        self.file.sync_data()?;
        self.appended += 1;
        Ok(())
    }

    /// Deletes the journal file; used once its records live in another journal.
    pub fn discard(self) -> Result<(), QueueError> {
        fs::remove_file(&self.path)?;
        Ok(())
    }

    pub fn rewrite(&mut self, records: &[MutationRecord], next_seq: u64) -> Result<(), QueueError> {
        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let mut out = File::create(&tmp)?;
            let checkpoint = serde_json::to_string(&JournalEntry::Checkpoint { next_seq })?;
            writeln!(out, "{checkpoint}")?;
            for record in records {
                let line = serde_json::to_string(&JournalEntry::Append {
                    record: record.clone(),
                })?;
                writeln!(out, "{line}")?;
            }
            out.flush()?;
            out.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        if let Some(parent) = self.path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        self.file = OpenOptions::new().append(true).open(&self.path)?;
        self.appended = 0;
        tracing::debug!(
            target: "tabsync.queue",
            path = %self.path.display(),
            records = records.len(),
            next_seq,
            "journal rewritten"
        );
        Ok(())
    }
}

pub(crate) fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    path.with_file_name(name)
}

fn take_lock(path: &Path) -> Result<File, QueueError> {
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(lock_path(path))?;
    if let Err(err) = file.try_lock_exclusive() {
        let contended = err.kind() == io::ErrorKind::WouldBlock
            || err.raw_os_error() == fs2::lock_contended_error().raw_os_error();
        return Err(if contended {
            QueueError::Locked {
                path: path.to_path_buf(),
            }
        } else {
            QueueError::Io(err)
        });
    }
    // Holder pid, for whoever finds the lock file while debugging.
    file.set_len(0)?;
    write!(file, "{}", std::process::id())?;
    file.sync_data()?;
    Ok(file)
}

/// Returns the surviving records plus whether the last line was cut short.
fn replay(path: &Path) -> Result<(Replayed, bool), QueueError> {
    let reader = BufReader::new(File::open(path)?);
    let lines: Vec<String> = reader.lines().collect::<Result<_, _>>()?;
    let last_non_empty = lines.iter().rposition(|l| !l.trim().is_empty());

    let mut pending: BTreeMap<u64, MutationRecord> = BTreeMap::new();
    let mut next_seq = 1u64;
    let mut torn_tail = false;

    for (idx, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry: JournalEntry = match serde_json::from_str(line) {
            Ok(entry) => entry,
            Err(_) if Some(idx) == last_non_empty => {
                torn_tail = true;
                break;
            }
            Err(source) => {
                return Err(QueueError::Corrupt {
                    line: idx + 1,
                    source,
                })
            }
        };

        match entry {
            JournalEntry::Append { record } => {
                next_seq = next_seq.max(record.seq + 1);
                pending.insert(record.seq, record);
            }
            JournalEntry::Remove { seq } => {
                pending.remove(&seq);
            }
            JournalEntry::Supersede { replaced, record } => {
                pending.remove(&replaced);
                next_seq = next_seq.max(record.seq + 1);
                pending.insert(record.seq, record);
            }
            JournalEntry::Checkpoint { next_seq: n } => {
                next_seq = next_seq.max(n);
            }
        }
    }

    Ok((
        Replayed {
            records: pending.into_values().collect(),
            next_seq,
        },
        torn_tail,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Operation;
    use chrono::Utc;
    use serde_json::json;

    fn record(seq: u64, key: &str) -> MutationRecord {
        MutationRecord {
            seq,
            key: key.into(),
            op: Operation::Update,
            payload: json!({"n": seq}),
            base_version: None,
            base_fields: None,
            enqueued_at: Utc::now(),
        }
    }

    #[test]
    fn replays_appends_and_removals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.jsonl");
        {
            let (mut journal, replayed) = Journal::open(&path).unwrap();
            assert!(replayed.records.is_empty());
            journal.append(&JournalEntry::Append { record: record(1, "a") }).unwrap();
            journal.append(&JournalEntry::Append { record: record(2, "b") }).unwrap();
            journal.append(&JournalEntry::Remove { seq: 1 }).unwrap();
            journal
                .append(&JournalEntry::Supersede {
                    replaced: 2,
                    record: record(3, "b"),
                })
                .unwrap();
        }

        let (_, replayed) = Journal::open(&path).unwrap();
        let seqs: Vec<u64> = replayed.records.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![3]);
        assert_eq!(replayed.next_seq, 4);
    }

    #[test]
    fn tolerates_torn_last_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.jsonl");
        {
            let (mut journal, _) = Journal::open(&path).unwrap();
            journal.append(&JournalEntry::Append { record: record(1, "a") }).unwrap();
        }
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{\"entry\":\"append\",\"rec").unwrap();
        drop(f);

        let (_, replayed) = Journal::open(&path).unwrap();
        assert_eq!(replayed.records.len(), 1);

        // The rewrite dropped the partial line, so a second open is clean.
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.lines().all(|l| serde_json::from_str::<JournalEntry>(l).is_ok()));
    }

    #[test]
    fn corruption_before_the_tail_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.jsonl");
        let good = serde_json::to_string(&JournalEntry::Append { record: record(1, "a") }).unwrap();
        fs::write(&path, format!("not json\n{good}\n")).unwrap();

        match Journal::open(&path) {
            Err(QueueError::Corrupt { line, .. }) => assert_eq!(line, 1),
            other => panic!("expected corruption error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn rewrite_preserves_sequence_counter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.jsonl");
        {
            let (mut journal, _) = Journal::open(&path).unwrap();
            journal.rewrite(&[record(7, "x")], 12).unwrap();
            assert_eq!(journal.appended(), 0);
        }
        let (_, replayed) = Journal::open(&path).unwrap();
        assert_eq!(replayed.next_seq, 12);
        assert_eq!(replayed.records[0].seq, 7);
    }

    #[test]
    fn second_open_of_a_held_journal_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.jsonl");
        let (held, _) = Journal::open(&path).unwrap();

        match Journal::open(&path) {
            Err(QueueError::Locked { path: locked }) => assert_eq!(locked, path),
            other => panic!("expected lock error, got {:?}", other.map(|_| ())),
        }

        drop(held);
        assert!(Journal::open(&path).is_ok());
    }

    #[test]
    fn discard_removes_the_journal_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.1.jsonl");
        let (mut journal, _) = Journal::open(&path).unwrap();
        journal.append(&JournalEntry::Append { record: record(1, "a") }).unwrap();
        journal.discard().unwrap();
        assert!(!path.exists());
        assert!(lock_path(&path).ends_with("queue.1.jsonl.lock"));
    }
}
