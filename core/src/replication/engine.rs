//! Replays the local mutation queue against the remote store and mirrors remote
//! changes into the local cache.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::backoff::BackoffPolicy;
use super::conflict::{plan_replay, ConflictRecord, ReplayAction};
use crate::connectivity::{ConnectionMonitor, ConnectivityTransition};
use crate::error::{QueueError, RemoteError};
use crate::persistence::PersistenceCoordinator;
use crate::queue::{LocalMutationQueue, MutationRecord};
use crate::remote::{ChangeEvent, ChangeKind, DocumentStore, RemoteEntity, SubscriptionTarget};
use crate::state::{SyncState, SyncStateHub};
use crate::util::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCommand {
    DrainNow,
    Shutdown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub applied: usize,
    pub conflicts: usize,
    pub rejected: usize,
    pub remaining: usize,
    /// Another drain was already running.
    pub skipped: bool,
}

/// A mutation the remote refused for good; removed from the queue.
#[derive(Debug, Clone, Serialize)]
pub struct RejectedMutation {
    pub record: MutationRecord,
    pub error: String,
    pub rejected_at: DateTime<Utc>,
}

pub struct ReplicationEngine {
    documents: Arc<dyn DocumentStore>,
    queue: Arc<LocalMutationQueue>,
    monitor: Arc<ConnectionMonitor>,
    sync_state: SyncStateHub,
    persistence: Arc<PersistenceCoordinator>,
    policy: BackoffPolicy,
    conflicts: Mutex<Vec<ConflictRecord>>,
    rejections: Mutex<Vec<RejectedMutation>>,
    draining: AtomicBool,
    commands: mpsc::UnboundedSender<EngineCommand>,
    command_rx: Mutex<Option<mpsc::UnboundedReceiver<EngineCommand>>>,
    followers: Mutex<Vec<JoinHandle<()>>>,
}

enum Replayed {
    Settled(Option<ConflictRecord>),
    Rejected(RemoteError),
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ReplicationEngine {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        queue: Arc<LocalMutationQueue>,
        monitor: Arc<ConnectionMonitor>,
        sync_state: SyncStateHub,
        persistence: Arc<PersistenceCoordinator>,
        policy: BackoffPolicy,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        Self {
            documents,
            queue,
            monitor,
            sync_state,
            persistence,
            policy,
            conflicts: Mutex::new(Vec::new()),
            rejections: Mutex::new(Vec::new()),
            draining: AtomicBool::new(false),
            commands,
            command_rx: Mutex::new(Some(command_rx)),
            followers: Mutex::new(Vec::new()),
        }
    }

    pub fn queue(&self) -> &Arc<LocalMutationQueue> {
        &self.queue
    }

    pub fn conflicts(&self) -> Vec<ConflictRecord> {
        lock(&self.conflicts).clone()
    }

    pub fn rejections(&self) -> Vec<RejectedMutation> {
        lock(&self.rejections).clone()
    }

    /// Hands the accumulated rejections to the caller and forgets them.
    pub fn take_rejections(&self) -> Vec<RejectedMutation> {
        std::mem::take(&mut *lock(&self.rejections))
    }

    /// Asks the run loop for a drain. No-op once the loop has stopped.
    pub fn nudge(&self) {
        let _ = self.commands.send(EngineCommand::DrainNow);
    }

    pub fn stop(&self) {
        let _ = self.commands.send(EngineCommand::Shutdown);
        for task in lock(&self.followers).drain(..) {
            task.abort();
        }
    }

    /// Replays every queued mutation in order. Transient failures are retried
    /// until they succeed; durable rejections are dropped and reported.
    pub async fn drain(&self) -> Result<DrainReport, QueueError> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(DrainReport {
                skipped: true,
                remaining: self.queue.len(),
                ..DrainReport::default()
            });
        }
        let _guard = DrainGuard(&self.draining);

        let mut report = DrainReport::default();
        if self.queue.is_empty() {
            self.sync_state.set(SyncState::Idle);
            return Ok(report);
        }

        tracing::info!(
            target: "tabsync.replication",
            stage = "replication.drain.in",
            pending = self.queue.len(),
            "draining mutation queue"
        );
        self.sync_state.set(SyncState::Syncing);
        let mut last_rejection: Option<String> = None;

        while let Some(record) = self.queue.checkout() {
            let seq = record.seq;
            match self.replay(&record).await {
                Replayed::Settled(conflict) => {
                    report.applied += 1;
                    if let Some(conflict) = conflict {
                        tracing::info!(
                            target: "tabsync.replication",
                            key = %conflict.key,
                            seq,
                            resolution = ?conflict.resolution,
                            winner = ?conflict.winner,
                            remote_version = ?conflict.remote_version,
                            "conflict resolved"
                        );
                        report.conflicts += 1;
                        lock(&self.conflicts).push(conflict);
                    }
                }
                Replayed::Rejected(err) => {
                    tracing::warn!(
                        target: "tabsync.replication",
                        key = %record.key,
                        seq,
                        op = %record.op,
                        error = %err,
                        "mutation rejected by remote; dropping"
                    );
                    report.rejected += 1;
                    last_rejection = Some(format!("{} {}: {}", record.op, record.key, err));
                    lock(&self.rejections).push(RejectedMutation {
                        record: record.clone(),
                        error: err.to_string(),
                        rejected_at: Utc::now(),
                    });
                }
            }

            if let Err(e) = self.queue.acknowledge(seq) {
                self.queue.release(seq);
                self.sync_state.set(SyncState::Error(e.to_string()));
                return Err(e);
            }
        }

        report.remaining = self.queue.len();
        self.sync_state.set(match last_rejection {
            Some(detail) => SyncState::Error(detail),
            None => SyncState::Idle,
        });
        tracing::info!(
            target: "tabsync.replication",
            stage = "replication.drain.out",
            applied = report.applied,
            conflicts = report.conflicts,
            rejected = report.rejected,
            "mutation queue drained"
        );
        Ok(report)
    }

    async fn replay(&self, record: &MutationRecord) -> Replayed {
        let key = record.key.as_str();
        loop {
            let remote = match self
                .with_retry("read", key, || self.documents.read_entity(key))
                .await
            {
                Ok(entity) => Some(entity),
                Err(RemoteError::NotFound(_)) => None,
                Err(e) => return Replayed::Rejected(e),
            };

            let plan = plan_replay(record, remote.as_ref());
            let applied = match plan.action {
                ReplayAction::Write { value, condition } => {
                    let written = self
                        .with_retry("write", key, || {
                            self.documents.write_entity(key, value.clone(), condition)
                        })
                        .await;
                    written.map(|version| {
                        Some(RemoteEntity {
                            value,
                            version,
                            updated_at: Some(Utc::now()),
                        })
                    })
                }
                ReplayAction::Delete => {
                    match self
                        .with_retry("delete", key, || self.documents.delete_entity(key))
                        .await
                    {
                        Ok(()) | Err(RemoteError::NotFound(_)) => Ok(None),
                        Err(e) => Err(e),
                    }
                }
                ReplayAction::Drop => Ok(remote.clone()),
            };

            match applied {
                Ok(entity) => {
                    self.mirror(key, entity).await;
                    return Replayed::Settled(plan.conflict);
                }
                Err(RemoteError::VersionConflict {
                    expected, actual, ..
                }) => {
                    // Someone wrote between our read and write; read again and re-plan.
                    tracing::debug!(
                        target: "tabsync.replication",
                        key,
                        expected = ?expected,
                        actual = ?actual,
                        "write raced a remote change; retrying"
                    );
                }
                Err(e) => return Replayed::Rejected(e),
            }
        }
    }

    /// Retries transient failures with capped exponential backoff, feeding
    /// request outcomes to the connection monitor.
    async fn with_retry<T, F, Fut>(&self, op: &str, key: &str, mut call: F) -> Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut backoff = self.policy.start();
        loop {
            match call().await {
                Ok(value) => {
                    self.monitor.report_request_success();
                    if backoff.attempts() > 0 {
                        self.sync_state.set(SyncState::Syncing);
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() => {
                    self.monitor.report_request_failure();
                    self.sync_state.set(SyncState::Degraded);
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        target: "tabsync.replication",
                        op,
                        key,
                        attempt = backoff.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "remote unavailable; backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    // Any definite answer proves the remote is reachable.
                    self.monitor.report_request_success();
                    return Err(e);
                }
            }
        }
    }

    /// Write-through into the local cache while this tab owns it.
    async fn mirror(&self, key: &str, entity: Option<RemoteEntity>) {
        let Some(cache) = self.persistence.cache() else {
            return;
        };
        let result = match entity {
            Some(entity) => cache.put(key, entity).await,
            None => cache.remove(key).await,
        };
        if let Err(e) = result {
            tracing::warn!(target: "tabsync.replication", key, error = %e, "cache update failed");
        }
    }

    pub async fn apply_change(&self, event: ChangeEvent) {
        let entity = match event.change {
            ChangeKind::Upserted(entity) => Some(entity),
            ChangeKind::Deleted => None,
        };
        self.mirror(&event.key, entity).await;
    }

    /// Follows a remote change stream into the cache, resubscribing with
    /// backoff whenever the stream ends.
    pub fn follow(self: &Arc<Self>, target: SubscriptionTarget) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let policy = self.policy;
        let task = tokio::spawn(async move {
            let mut backoff = policy.start();
            loop {
                let Some(this) = weak.upgrade() else { break };
                let mut stream = this.documents.subscribe(target.clone());
                drop(this);

                while let Some(event) = stream.next().await {
                    let Some(this) = weak.upgrade() else { return };
                    backoff.reset();
                    this.apply_change(event).await;
                }

                let delay = backoff.next_delay();
                tracing::debug!(
                    target: "tabsync.replication",
                    target_key = ?target,
                    delay_ms = delay.as_millis() as u64,
                    "change stream ended; resubscribing"
                );
                tokio::time::sleep(delay).await;
            }
        });
        lock(&self.followers).push(task);
    }

    /// Starts the event loop: drains on every offline→online edge and on
    /// `EngineCommand::DrainNow` while online.
    pub fn spawn(
        self: &Arc<Self>,
        transitions: Option<mpsc::UnboundedReceiver<ConnectivityTransition>>,
    ) -> Option<JoinHandle<()>> {
        let commands = lock(&self.command_rx).take()?;
        let engine = Arc::clone(self);
        Some(tokio::spawn(engine.run(transitions, commands)))
    }

    async fn run(
        self: Arc<Self>,
        transitions: Option<mpsc::UnboundedReceiver<ConnectivityTransition>>,
        mut commands: mpsc::UnboundedReceiver<EngineCommand>,
    ) {
        // Without a monitor subscription only explicit commands trigger drains.
        let (_idle_tx, idle_rx) = mpsc::unbounded_channel();
        let mut transitions = transitions.unwrap_or(idle_rx);

        loop {
            tokio::select! {
                Some(transition) = transitions.recv() => match transition {
                    ConnectivityTransition::WentOnline => {
                        tracing::info!(target: "tabsync.replication", "back online, replaying queue");
                        if let Err(e) = self.drain().await {
                            tracing::error!(target: "tabsync.replication", error = %e, "drain failed");
                        }
                    }
                    ConnectivityTransition::WentOffline => {
                        self.sync_state.set(SyncState::Degraded);
                    }
                },
                Some(command) = commands.recv() => match command {
                    EngineCommand::DrainNow => {
                        if self.monitor.is_online() {
                            if let Err(e) = self.drain().await {
                                tracing::error!(target: "tabsync.replication", error = %e, "drain failed");
                            }
                        }
                    }
                    EngineCommand::Shutdown => break,
                },
                else => break,
            }
        }
        tracing::debug!(target: "tabsync.replication", "replication loop stopped");
    }
}

impl Drop for ReplicationEngine {
    fn drop(&mut self) {
        for task in lock(&self.followers).drain(..) {
            task.abort();
        }
    }
}
