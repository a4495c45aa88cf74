//! Implementation of the `cairn up` command.
//!
//! Takes the state lock, plans, asks for confirmation and applies. State is
//! saved after every change, so a failed run keeps what it applied.

use std::path::Path;

use anyhow::{Context as _, Result};
use tracing::info;

use cairn_lib::apply::{ApplyError, ApplyOptions, ApplyResult, load_project, up};
use cairn_lib::context::Context;

use super::{Workspace, load_settings};
use crate::output::{print_info, print_stat, print_success, print_warning};
use crate::prompts::ConsoleUi;

pub fn cmd_up(project_path: &Path, state_dir: Option<&Path>, yes: bool, verbose: bool) -> Result<()> {
  let project = load_project(project_path).with_context(|| format!("Failed to load project: {}", project_path.display()))?;
  let workspace = Workspace::open(load_settings(project_path, state_dir)?)?;
  info!(state_dir = %workspace.state_dir().display(), "using state directory");

  let mut ui = ConsoleUi::new(verbose);
  let mut ctx = Context::new(&mut ui, &workspace.registry, &workspace.settings);
  let options = ApplyOptions { auto_approve: yes };

  let result = match up(&project, workspace.backend(), workspace.locks(), &mut ctx, &options) {
    Ok(result) => result,
    Err(ApplyError::Declined) => {
      print_warning("Apply cancelled.");
      return Ok(());
    }
    Err(ApplyError::DeclinedAfterApply { result }) => {
      println!();
      print_warning("Remaining changes declined. Earlier rounds were applied.");
      print_summary(&result);
      return Ok(());
    }
    Err(e) => {
      if let ApplyError::ChangeFailed { result, .. } = &e {
        println!();
        print_summary(result);
      }
      return Err(e).context("Up failed");
    }
  };

  println!();
  if result.is_noop() {
    print_info("Everything is up to date.");
  } else {
    print_success("Up complete!");
    print_summary(&result);
  }

  Ok(())
}

fn print_summary(result: &ApplyResult) {
  print_stat("Changes applied", &result.applied().to_string());
  print_stat("Rounds", &result.rounds.len().to_string());
  let orphaned: usize = result.rounds.iter().map(|r| r.orphaned.len()).sum();
  if orphaned > 0 {
    print_stat("Untracked replaced objects", &orphaned.to_string());
  }
}
