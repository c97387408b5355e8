use serde::Serialize;

use tabsync_core::api::{
    CliError, ConnectionConfig, ErrorKind, PersistenceOutcome, ReadinessState, SyncContext,
    TabOwnershipLease,
};

use super::output::emit;

#[derive(Debug, Serialize)]
pub struct BootstrapReport {
    pub ready: bool,
    pub namespace: Option<String>,
    pub tab: String,
    pub persistence: Option<PersistenceOutcome>,
    pub lease: Option<TabOwnershipLease>,
    pub pending_mutations: usize,
    pub error_kind: Option<ErrorKind>,
    pub error_detail: Vec<String>,
}

pub fn report(ctx: &SyncContext, state: &ReadinessState) -> BootstrapReport {
    let persistence = ctx.persistence();
    BootstrapReport {
        ready: state.is_ready(),
        namespace: state
            .handles()
            .map(|h| h.documents().namespace().to_string()),
        tab: persistence.tab_id().to_string(),
        persistence: persistence.status(),
        lease: persistence.lease(),
        pending_mutations: ctx.queue().len(),
        error_kind: state.error().map(|e| e.kind()),
        error_detail: state.error().map(|e| e.detail()).unwrap_or_default(),
    }
}

pub fn render(r: &BootstrapReport) -> String {
    if !r.ready {
        return format!(
            "bootstrap failed ({:?}): {}",
            r.error_kind,
            r.error_detail.join(", ")
        );
    }
    let persistence = match &r.persistence {
        Some(PersistenceOutcome::Enabled { mode }) => format!("cache enabled ({mode})"),
        Some(PersistenceOutcome::Degraded { cause }) => format!("remote-only: {cause}"),
        Some(PersistenceOutcome::Skipped) | None => "persistence skipped".to_string(),
    };
    format!(
        "ready: namespace={} tab={} {} pending={}",
        r.namespace.as_deref().unwrap_or("-"),
        r.tab,
        persistence,
        r.pending_mutations
    )
}

pub async fn run(ctx: &SyncContext, json: bool) -> Result<i32, CliError> {
    let state = ctx.bootstrap(ConnectionConfig::from_env()).await;
    let result = emit(json, &report(ctx, &state), render);
    ctx.shutdown().await;
    result?;

    match state {
        ReadinessState::Failed(e) => Err(CliError::Bootstrap(e)),
        _ => Ok(0),
    }
}
