use clap::Parser;
mod commands;
use commands::cli;
use tabsync_core::api::{
    load_default, load_explicit, AppConfig, CliError, ErrorKind, LoggingConfig, QueueError,
    SyncContext,
};
use tabsync_plugins::PluginBackendFactory;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

static LOG_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

#[tokio::main]
async fn main() {
    let exit = match real_main().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            exit_code_for_error(&e)
        }
    };

    std::process::exit(exit);
}

async fn real_main() -> Result<i32, CliError> {
    let args = cli::Args::parse();
    let cfg = load_config(args.config.as_deref())?;
    init_tracing(&cfg.logging).map_err(CliError::Command)?;

    if let cli::Commands::CheckConfig = args.command {
        return commands::check_config::run(args.json);
    }

    let ctx = SyncContext::from_factory(cfg, &PluginBackendFactory).await?;
    dispatch(args.command, args.json, &ctx).await
}

fn load_config(path: Option<&str>) -> Result<AppConfig, CliError> {
    match path {
        Some(p) => load_explicit(std::path::Path::new(p)),
        None => load_default(),
    }
    .map_err(|e| CliError::Config(e.to_string()))
}

fn exit_code_for_error(e: &CliError) -> i32 {
    // 0: success
    // 11: config error
    // 20: connection / IO error
    // 40: write rejected (sync reports these as a normal exit code, not as an error)
    // 50: internal/uncategorized
    match e {
        CliError::Config(_) => 11,
        CliError::Bootstrap(be) => match be.kind() {
            ErrorKind::Config => 11,
            ErrorKind::Connection => 20,
        },
        CliError::Queue(qe) => match qe {
            QueueError::Io(_) | QueueError::Locked { .. } => 20,
            QueueError::InvalidPayload { .. } => 40,
            QueueError::Corrupt { .. } | QueueError::Encode(_) => 50,
        },
        CliError::Remote(re) if re.is_durable_rejection() => 40,
        CliError::Remote(_) => 20,
        CliError::Io(_) => 20,
        CliError::Command(_) => 20,
        CliError::Anyhow(_) => 50,
    }
}

async fn dispatch(cmd: cli::Commands, json: bool, ctx: &SyncContext) -> Result<i32, CliError> {
    match cmd {
        cli::Commands::CheckConfig => commands::check_config::run(json),
        cli::Commands::Bootstrap => commands::bootstrap::run(ctx, json).await,
        cli::Commands::Enqueue(enqueue_args) => commands::queue::enqueue(ctx, enqueue_args, json),
        cli::Commands::Queue(queue_args) => commands::queue::run(ctx, queue_args.action, json),
        cli::Commands::Sync(sync_args) => commands::sync::run(ctx, sync_args, json).await,
        cli::Commands::Lease(lease_args) => commands::sync::lease(ctx, lease_args, json).await,
    }
}

fn init_tracing(logging: &LoggingConfig) -> Result<(), String> {
    if !logging.enabled {
        return Ok(());
    }

    let filter = match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::from_default_env(),
        _ => EnvFilter::try_new(logging.level.clone()).map_err(|e| e.to_string())?,
    };

    let mut maybe_writer = None;

    if logging.file {
        let dir = match logging
            .directory
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            Some(d) => std::path::PathBuf::from(d),
            None => std::env::temp_dir().join("tabsync"),
        };

        std::fs::create_dir_all(&dir).map_err(|e| format!("create log dir failed: {e}"))?;
        let file_name = format!("tabsync.{}.log", std::process::id());
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let _ = LOG_GUARD.set(guard);
        maybe_writer = Some(non_blocking);
    }

    if !logging.console && maybe_writer.is_none() {
        return Err("logging disabled for both console and file".to_string());
    }

    let console_layer = logging.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_ansi(atty::is(atty::Stream::Stderr))
    });

    let file_layer = maybe_writer.map(|w| {
        tracing_subscriber::fmt::layer()
            .with_writer(w)
            .with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}
