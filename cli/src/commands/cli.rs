use clap::{Args as ClapArgs, Parser, Subcommand};

use tabsync_core::api::Operation;

#[derive(Parser, Debug)]
#[command(name = "tabsync", version, about = "Bootstrap, lease and offline queue tooling")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Load this TOML file instead of the default lookup.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the `TABSYNC_PUBLIC_*` connection parameters.
    CheckConfig,
    /// Connect to the remote store and enable local persistence once.
    Bootstrap,
    /// Queue a local write without contacting the remote store.
    Enqueue(EnqueueArgs),
    /// Inspect or compact the offline mutation queue.
    Queue(QueueArgs),
    /// Replay queued writes and optionally follow remote changes.
    Sync(SyncArgs),
    /// Show or hold the local cache ownership lease.
    Lease(LeaseArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct EnqueueArgs {
    pub key: String,

    #[arg(long, value_parser = parse_operation, default_value = "update")]
    pub op: Operation,

    /// JSON object for create/update; ignored for delete.
    #[arg(long, default_value = "{}")]
    pub payload: String,

    /// Remote version the payload was based on.
    #[arg(long)]
    pub base_version: Option<u64>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct QueueArgs {
    #[command(subcommand)]
    pub action: Option<QueueAction>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum QueueAction {
    /// List pending mutations in replay order (default).
    List,
    /// Rewrite the journal without dead entries.
    Compact,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct SyncArgs {
    /// Mirror remote changes under this key prefix into the local cache.
    #[arg(long = "follow", action = clap::ArgAction::Append)]
    pub follow: Vec<String>,

    /// Keep running this long after the first drain.
    #[arg(long, default_value_t = 0)]
    pub watch_secs: u64,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct LeaseArgs {
    /// Hold the lease (with heartbeats) this long before releasing it.
    #[arg(long, default_value_t = 0)]
    pub hold_secs: u64,
}

fn parse_operation(s: &str) -> Result<Operation, String> {
    s.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_parses_operation_and_payload() {
        let args = Args::try_parse_from([
            "tabsync",
            "enqueue",
            "notes/1",
            "--op",
            "Create",
            "--payload",
            r#"{"a":1}"#,
            "--base-version",
            "3",
        ])
        .unwrap();
        match args.command {
            Commands::Enqueue(e) => {
                assert_eq!(e.key, "notes/1");
                assert_eq!(e.op, Operation::Create);
                assert_eq!(e.base_version, Some(3));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn unknown_operation_is_rejected() {
        assert!(Args::try_parse_from(["tabsync", "enqueue", "k", "--op", "upsert"]).is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let args = Args::try_parse_from(["tabsync", "queue", "compact", "--json"]).unwrap();
        assert!(args.json);
        assert!(matches!(
            args.command,
            Commands::Queue(QueueArgs {
                action: Some(QueueAction::Compact)
            })
        ));
    }

    #[test]
    fn sync_collects_follow_prefixes() {
        let args = Args::try_parse_from([
            "tabsync", "sync", "--follow", "users/", "--follow", "notes/", "--watch-secs", "5",
        ])
        .unwrap();
        match args.command {
            Commands::Sync(s) => {
                assert_eq!(s.follow, vec!["users/", "notes/"]);
                assert_eq!(s.watch_secs, 5);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
