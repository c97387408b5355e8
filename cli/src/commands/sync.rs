use serde::Serialize;

use tabsync_core::api::{
    CliError, ConflictRecord, ConnectionConfig, DrainReport, ReadinessState, RejectedMutation,
    SubscriptionTarget, SyncContext, SyncState,
};

use super::cli::{LeaseArgs, SyncArgs};
use super::output::{emit, wait_or_interrupt};
use super::bootstrap;

#[derive(Debug, Serialize)]
struct SyncReport {
    drain: DrainReport,
    state: SyncState,
    following: Vec<String>,
    conflicts: Vec<ConflictRecord>,
    rejections: Vec<RejectedMutation>,
}

async fn bootstrapped(ctx: &SyncContext) -> Result<(), CliError> {
    match ctx.bootstrap(ConnectionConfig::from_env()).await {
        ReadinessState::Failed(e) => Err(CliError::Bootstrap(e)),
        _ => Ok(()),
    }
}

pub async fn run(ctx: &SyncContext, args: SyncArgs, json: bool) -> Result<i32, CliError> {
    bootstrapped(ctx).await?;
    ctx.on_sync_state_change(|state| {
        tracing::info!(target: "tabsync.cli", state = %state, "sync state changed");
    });

    let following: Vec<String> = args
        .follow
        .into_iter()
        .filter(|prefix| ctx.follow(SubscriptionTarget::Prefix(prefix.clone())))
        .collect();

    let mut drain = ctx.drain().await?.unwrap_or_default();
    wait_or_interrupt(args.watch_secs).await;
    if args.watch_secs > 0 {
        // Pick up anything the run loop has not replayed yet.
        if let Some(again) = ctx.drain().await? {
            drain.applied += again.applied;
            drain.conflicts += again.conflicts;
            drain.rejected += again.rejected;
            drain.remaining = again.remaining;
        }
    }

    let engine = ctx.engine();
    let report = SyncReport {
        drain,
        state: ctx.sync_state(),
        following,
        conflicts: engine.as_ref().map(|e| e.conflicts()).unwrap_or_default(),
        rejections: engine.as_ref().map(|e| e.take_rejections()).unwrap_or_default(),
    };
    let result = emit(json, &report, |r| {
        let mut lines = vec![format!(
            "applied={} conflicts={} rejected={} remaining={} state={}",
            r.drain.applied, r.drain.conflicts, r.drain.rejected, r.drain.remaining, r.state
        )];
        for rej in &r.rejections {
            lines.push(format!(
                "rejected #{} {} {}: {}",
                rej.record.seq, rej.record.op, rej.record.key, rej.error
            ));
        }
        lines.join("\n")
    });
    ctx.shutdown().await;
    result?;

    // Rejected writes surface as an exit code, not as an error.
    Ok(if report.rejections.is_empty() { 0 } else { 40 })
}

pub async fn lease(ctx: &SyncContext, args: LeaseArgs, json: bool) -> Result<i32, CliError> {
    bootstrapped(ctx).await?;
    let state = ctx.readiness().current();
    emit(json, &bootstrap::report(ctx, &state), bootstrap::render)?;

    if args.hold_secs > 0 && ctx.persistence().holds_lease() {
        wait_or_interrupt(args.hold_secs).await;
        let after = bootstrap::report(ctx, &state);
        emit(json, &after, |r| match &r.lease {
            Some(lease) => format!(
                "still holding lease epoch={} last_heartbeat={}",
                lease.epoch, lease.last_heartbeat
            ),
            None => "lease lost while holding".to_string(),
        })?;
    }

    ctx.shutdown().await;
    Ok(0)
}
