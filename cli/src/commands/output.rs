use serde::Serialize;

use tabsync_core::api::CliError;

/// Prints `value` as pretty JSON, or the text rendering otherwise.
pub fn emit<T, F>(json: bool, value: &T, text: F) -> Result<(), CliError>
where
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    if json {
        let rendered =
            serde_json::to_string_pretty(value).map_err(|e| CliError::Command(e.to_string()))?;
        println!("{rendered}");
    } else {
        println!("{}", text(value));
    }
    Ok(())
}

/// Blocks until `secs` elapse or Ctrl-C arrives.
pub async fn wait_or_interrupt(secs: u64) {
    if secs == 0 {
        return;
    }
    tokio::select! {
        _ = tokio::time::sleep(std::time::Duration::from_secs(secs)) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(target: "tabsync.cli", "interrupted");
        }
    }
}
