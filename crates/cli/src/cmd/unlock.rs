//! Implementation of the `cairn unlock` command.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};

use cairn_lib::state::{LockBackend, LockError};

use super::{Workspace, load_settings};
use crate::output::{format_duration, print_info, print_stat, print_success};

/// Release the state lock held under `id`.
///
/// With `force` the lock is removed whoever holds it, for when the holder
/// id is unknown or the lock file is unreadable.
pub fn cmd_unlock(id: &str, project_path: &Path, state_dir: Option<&Path>, force: bool) -> Result<()> {
  let workspace = Workspace::open(load_settings(project_path, state_dir)?)?;
  let locks = workspace.locks();

  let holder = match locks.holder() {
    Ok(holder) => holder,
    Err(LockError::ContentionUnknown(_)) if force => None,
    Err(e) => return Err(e).context("Failed to read state lock"),
  };

  if force {
    let previous = locks.force_unlock().context("Failed to remove state lock")?;
    match previous.or(holder) {
      Some(previous) => print_success(&format!("Removed lock {} ({})", previous.id, previous.info)),
      None => print_success("Removed state lock"),
    }
    return Ok(());
  }

  let Some(holder) = holder else {
    print_info("State is not locked.");
    return Ok(());
  };
  if holder.id != id {
    bail!(
      "State is locked by {}, not {}. Pass the holder's id, or --force to remove it anyway.",
      holder.id,
      id
    );
  }

  locks.unlock(id).context("Failed to release state lock")?;
  print_success(&format!("Released lock {}", id));
  print_stat("Held by", &format!("PID {}", holder.pid));
  print_stat("Doing", &holder.info);
  print_stat("Started", &started(holder.started_at_unix));

  Ok(())
}

fn started(unix: u64) -> String {
  let at = UNIX_EPOCH + Duration::from_secs(unix);
  let age = SystemTime::now().duration_since(at).unwrap_or_default();
  format!(
    "{} ({} ago)",
    humantime::format_rfc3339_seconds(at),
    format_duration(age)
  )
}
