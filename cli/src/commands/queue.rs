use serde::Serialize;
use serde_json::Value;

use tabsync_core::api::{CliError, EnqueueOutcome, MutationRecord, SyncContext};

use super::cli::{EnqueueArgs, QueueAction};
use super::output::emit;

#[derive(Debug, Serialize)]
struct EnqueueReport {
    #[serde(flatten)]
    outcome: EnqueueOutcome,
    pending: usize,
}

pub fn enqueue(ctx: &SyncContext, args: EnqueueArgs, json: bool) -> Result<i32, CliError> {
    let payload: Value = serde_json::from_str(&args.payload)
        .map_err(|e| CliError::Command(format!("--payload is not JSON: {e}")))?;
    let outcome = ctx.enqueue_write_at(&args.key, args.op, payload, args.base_version)?;
    let report = EnqueueReport {
        outcome,
        pending: ctx.queue().len(),
    };
    emit(json, &report, |r| match &r.outcome {
        EnqueueOutcome::Appended { seq } => format!("queued #{seq} ({} pending)", r.pending),
        EnqueueOutcome::Superseded { seq, replaced } => {
            format!("queued #{seq}, folded #{replaced} ({} pending)", r.pending)
        }
        EnqueueOutcome::CoveredByDelete { seq } => {
            format!("already covered by pending delete #{seq}")
        }
    })?;
    Ok(0)
}

#[derive(Debug, Serialize)]
struct QueueReport {
    path: Option<String>,
    pending: usize,
    records: Vec<MutationRecord>,
}

pub fn run(ctx: &SyncContext, action: Option<QueueAction>, json: bool) -> Result<i32, CliError> {
    let queue = ctx.queue();
    if let Some(QueueAction::Compact) = action {
        queue.compact()?;
        tracing::info!(target: "tabsync.cli", pending = queue.len(), "queue journal compacted");
    }

    let records = queue.snapshot();
    let report = QueueReport {
        path: queue.path().map(|p| p.display().to_string()),
        pending: records.len(),
        records,
    };
    emit(json, &report, |r| {
        let mut lines = vec![format!(
            "{} pending ({})",
            r.pending,
            r.path.as_deref().unwrap_or("in-memory")
        )];
        for rec in &r.records {
            lines.push(format!(
                "#{:<5} {:<6} {} {}",
                rec.seq,
                rec.op,
                rec.key,
                rec.enqueued_at.format("%Y-%m-%d %H:%M:%S")
            ));
        }
        lines.join("\n")
    })?;
    Ok(0)
}
