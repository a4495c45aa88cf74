//! Implementation of the `cairn plan` command.
//!
//! Evaluates the project, refreshes persisted resources and prints the
//! changes `up` would make. Neither state nor the lock is touched.

use std::path::Path;

use anyhow::{Context as _, Result};

use cairn_lib::apply::{load_project, plan};
use cairn_lib::context::Context;

use super::{Workspace, load_settings};
use crate::output::print_stat;
use crate::prompts::ConsoleUi;

pub fn cmd_plan(project_path: &Path, state_dir: Option<&Path>, verbose: bool) -> Result<()> {
  let project = load_project(project_path).with_context(|| format!("Failed to load project: {}", project_path.display()))?;
  let workspace = Workspace::open(load_settings(project_path, state_dir)?)?;

  let mut ui = ConsoleUi::new(verbose);
  let mut ctx = Context::new(&mut ui, &workspace.registry, &workspace.settings);
  let changes = plan(&project, workspace.backend(), &mut ctx).context("Plan failed")?;

  if !changes.is_empty() {
    println!();
    print_stat("Changes", &changes.len().to_string());
  }

  Ok(())
}
