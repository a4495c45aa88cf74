//! Planning and applying a project.
//!
//! `up` runs the full flow:
//!
//! 1. Take the state lock
//! 2. Evaluate the project into the pending graph
//! 3. Load persisted state
//! 4. Finish any workflow a previous run left interrupted
//! 5. Refresh every persisted resource through its provider
//! 6. Diff current against pending and show the plan
//! 7. Confirm, then execute, saving state after every change
//! 8. If a workflow ran, plan again, since it changed state behind the plan
//!
//! Nothing already applied is rolled back when a change fails.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::consts::MAX_WORKFLOW_ROUNDS;
use crate::context::Context;
use crate::diff::{Change, DiffError, diff, write_plan};
use crate::diffable::{ProviderError, ResourceGraph, ResourceKey};
use crate::execute::{ExecuteError, ExecutionReport, Replacer, execute};
use crate::scope::{Evaluation, Project, ResolveError};
use crate::state::{FileBackend, LockBackend, LockError, State, StateError, StateLock};
use crate::ui::UiError;
use crate::workflow::{ExecutionRecord, WorkflowError, WorkflowRunner};

#[derive(Debug, Error)]
pub enum ApplyError {
  #[error("failed to read project {path}: {source}")]
  ProjectRead {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid project {path}: {source}")]
  ProjectParse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error(transparent)]
  Resolve(#[from] ResolveError),

  #[error(transparent)]
  State(#[from] StateError),

  #[error(transparent)]
  Lock(#[from] LockError),

  #[error("failed to refresh {key}: {source}")]
  Refresh {
    key: ResourceKey,
    #[source]
    source: ProviderError,
  },

  #[error(transparent)]
  Diff(#[from] DiffError),

  #[error(transparent)]
  Execute(#[from] ExecuteError),

  /// A change failed. Changes before it were applied and saved, and are
  /// listed in `result`.
  #[error("failed to apply {key}: {source}")]
  ChangeFailed {
    key: ResourceKey,
    #[source]
    source: ExecuteError,
    result: ApplyResult,
  },

  #[error(transparent)]
  Workflow(#[from] WorkflowError),

  #[error("apply cancelled")]
  Declined,

  /// The operator declined a later round, after earlier rounds had already
  /// changed the world.
  #[error("apply stopped after {} changes; the remaining changes were declined", .result.applied())]
  DeclinedAfterApply { result: ApplyResult },

  #[error(transparent)]
  Ui(#[from] UiError),
}

#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
  /// Skip the confirmation prompt.
  pub auto_approve: bool,
}

/// What `up` did, one report per execution round.
#[derive(Debug, Default)]
pub struct ApplyResult {
  pub rounds: Vec<ExecutionReport>,
}

impl ApplyResult {
  pub fn is_noop(&self) -> bool {
    self.rounds.is_empty()
  }

  pub fn applied(&self) -> usize {
    self.rounds.iter().map(|r| r.applied.len()).sum()
  }
}

/// Read a project from its JSON tree.
pub fn load_project(path: &Path) -> Result<Project, ApplyError> {
  let content = fs::read_to_string(path).map_err(|source| ApplyError::ProjectRead {
    path: path.to_path_buf(),
    source,
  })?;
  serde_json::from_str(&content).map_err(|source| ApplyError::ProjectParse {
    path: path.to_path_buf(),
    source,
  })
}

/// The current side of a plan: persisted resources as their providers see
/// them now. Resources whose real object is gone are left out, so they get
/// created again.
pub fn refresh(state: &State, ctx: &Context<'_>) -> Result<ResourceGraph, ApplyError> {
  let mut current = state.graph().clone();
  let keys: Vec<ResourceKey> = current.keys().cloned().collect();
  for key in keys {
    let Some(provider) = ctx.registry.provider(&key.kind) else {
      warn!(resource = %key, "no provider registered, skipping refresh");
      continue;
    };
    let Some(resource) = current.get_mut(&key) else {
      continue;
    };
    let exists = provider.refresh(resource).map_err(|source| ApplyError::Refresh {
      key: key.clone(),
      source,
    })?;
    if !exists {
      info!(resource = %key, "resource no longer exists");
      current.remove(&key);
    }
  }
  Ok(current)
}

/// Refresh, then diff persisted state against the evaluated project.
pub fn plan_changes(evaluation: &Evaluation, state: &State, ctx: &Context<'_>) -> Result<Vec<Change>, ApplyError> {
  let current = refresh(state, ctx)?;
  let mut pending = evaluation.graph.clone();
  pending.merge_outputs(&current, ctx.registry);
  pending.settle_links();
  let changes = diff(current.iter(), pending.iter(), ctx.registry)?;
  debug!(changes = changes.len(), "plan computed");
  Ok(changes)
}

/// Show what `up` would do, without locking or changing anything.
pub fn plan(project: &Project, backend: Arc<dyn FileBackend>, ctx: &mut Context<'_>) -> Result<Vec<Change>, ApplyError> {
  let evaluation = Evaluation::evaluate(project, ctx.registry, ctx.settings.retry_budget)?;
  let state = State::load(backend)?;
  if let Some(record) = ExecutionRecord::load(state.backend().as_ref())? {
    ctx.ui.write(&format!(
      "Workflow {} on {} {} was interrupted and resumes on the next up.",
      record.workflow, record.kind, record.name
    ));
  }
  let changes = plan_changes(&evaluation, &state, ctx)?;
  if !write_plan(ctx.ui, &changes) {
    ctx.ui.write("No changes.");
  }
  Ok(changes)
}

/// Finish a workflow that a previous run left part way through.
///
/// Resources an interrupted workflow created are not declared anywhere, so
/// planning before the workflow completes would delete them. A record that
/// no longer matches a workflow or resource of the project is discarded.
fn resume_interrupted(
  evaluation: &mut Evaluation,
  state: &mut State,
  ctx: &mut Context<'_>,
  options: &ApplyOptions,
) -> Result<(), ApplyError> {
  let backend = Arc::clone(state.backend());
  let Some(record) = ExecutionRecord::load(backend.as_ref())? else {
    return Ok(());
  };
  let key = ResourceKey::new(&record.kind, &record.name);

  let known = evaluation
    .workflow_for(&record.kind)
    .is_some_and(|w| w.name == record.workflow);
  let resources = state.get(&key).cloned().zip(evaluation.graph.get(&key).cloned());
  let (current, mut pending) = match resources {
    Some(pair) if known => pair,
    _ => {
      warn!(workflow = %record.workflow, resource = %key, "discarding stale workflow execution record");
      ExecutionRecord::clear(backend.as_ref())?;
      return Ok(());
    }
  };
  state.settle(&mut pending);

  ctx.ui.write(&format!(
    "Workflow {} on {} was interrupted after stage {}.",
    record.workflow,
    key,
    record.last_stage().unwrap_or("-")
  ));
  if !options.auto_approve && !ctx.ui.read_boolean(false, "Resume it?")? {
    return Err(ApplyError::Declined);
  }
  WorkflowRunner::new(evaluation).run(ctx, state, &current, &pending)?;
  Ok(())
}

/// Bring the world in line with `project`.
pub fn up(
  project: &Project,
  backend: Arc<dyn FileBackend>,
  locks: Arc<dyn LockBackend>,
  ctx: &mut Context<'_>,
  options: &ApplyOptions,
) -> Result<ApplyResult, ApplyError> {
  let lock = StateLock::acquire(locks, "up: planning")?;
  info!(lock = lock.id(), "starting up");

  let mut evaluation = Evaluation::evaluate(project, ctx.registry, ctx.settings.retry_budget)?;
  info!(resources = evaluation.graph.len(), workflows = evaluation.workflows.len(), "project evaluated");
  let mut state = State::load(backend)?;
  resume_interrupted(&mut evaluation, &mut state, ctx, options)?;

  let mut result = ApplyResult::default();
  for round in 1..=MAX_WORKFLOW_ROUNDS {
    let changes = plan_changes(&evaluation, &state, ctx)?;
    if !write_plan(ctx.ui, &changes) {
      ctx.ui.write("No changes.");
      break;
    }
    if !options.auto_approve && !ctx.ui.read_boolean(false, "Apply these changes?")? {
      if result.is_noop() {
        return Err(ApplyError::Declined);
      }
      return Err(ApplyError::DeclinedAfterApply { result });
    }

    lock.update_info(&format!("up: applying {} changes", changes.len()))?;
    let mut report = {
      let mut runner = WorkflowRunner::new(&mut evaluation);
      execute(&changes, &mut state, &mut ctx.reborrow(), Some(&mut runner as &mut dyn Replacer))?
    };
    ctx.ui.write(&format!(
      "{} applied, {} skipped.",
      report.applied.len(),
      report.skipped.len()
    ));
    for orphan in &report.orphaned {
      ctx.ui.write(&format!(
        "! The replaced object of {} was not deleted and is no longer tracked: {}",
        orphan.key,
        orphan.to_value().render()
      ));
    }

    let ran_workflow = report.ran_workflow();
    let failed = report.failed.take();
    result.rounds.push(report);
    if let Some((key, source)) = failed {
      return Err(ApplyError::ChangeFailed { key, source, result });
    }

    if !ran_workflow {
      break;
    }
    if round == MAX_WORKFLOW_ROUNDS {
      warn!(rounds = round, "state still changing after workflows, stopping");
      break;
    }
    ctx.ui.write("A workflow changed state. Planning again.");
  }

  info!(applied = result.applied(), "up complete");
  Ok(result)
}
