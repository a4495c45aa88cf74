//! Implementation of the `cairn state` command.
//!
//! Lists persisted resources, plus the lock holder and any interrupted
//! workflow.

use std::path::Path;

use anyhow::{Context, Result};

use cairn_lib::state::{LockBackend, State};
use cairn_lib::workflow::ExecutionRecord;

use super::{Workspace, load_settings};
use crate::output::{OutputFormat, print_info, print_json, print_stat, print_warning, symbols};

pub fn cmd_state(project_path: &Path, state_dir: Option<&Path>, format: OutputFormat) -> Result<()> {
  let workspace = Workspace::open(load_settings(project_path, state_dir)?)?;
  let backend = workspace.backend();
  let state = State::load(backend.clone()).context("Failed to load state")?;
  let record = ExecutionRecord::load(backend.as_ref()).context("Failed to read workflow execution record")?;
  let holder = workspace.locks().holder().context("Failed to read state lock")?;

  if format.is_json() {
    let resources: Vec<_> = state.resources().collect();
    let json_output = serde_json::json!({
      "state_dir": workspace.state_dir(),
      "resources": resources,
      "lock": holder,
      "interrupted_workflow": record,
    });
    return print_json(&json_output);
  }

  if state.graph().is_empty() {
    print_info("No resources in state. Run 'cairn up' to create some.");
  } else {
    print_info(&format!(
      "{} resource(s) in {}",
      state.graph().len(),
      workspace.state_dir().display()
    ));
    for resource in state.resources() {
      println!("  {} {} ({})", symbols::INFO, resource.key, resource.file);
      for (field, value) in &resource.fields {
        print_stat(&format!("  {}", field), &value.render());
      }
    }
  }

  if let Some(holder) = holder {
    println!();
    print_warning(&format!("State is locked by {}: {}", holder.id, holder.info));
  }
  if let Some(record) = record {
    println!();
    print_warning(&format!(
      "Workflow {} on {} {} was interrupted after stage {}",
      record.workflow,
      record.kind,
      record.name,
      record.last_stage().unwrap_or("-")
    ));
  }

  Ok(())
}
