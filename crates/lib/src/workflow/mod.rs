//! Staged workflows.
//!
//! A workflow takes over the replacement of resources of one type. It runs
//! a sequence of stages, each of which declares resources to create,
//! resources to delete and pairs of resources whose names to swap. Every
//! stage is planned, confirmed and executed like a top-level run. Progress
//! is recorded after each stage so an interrupted workflow resumes where
//! it stopped.

mod execution;
mod stage;

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::context::Context;
use crate::diff::{DiffError, diff, write_plan};
use crate::diffable::{Resource, ResourceGraph, ResourceKey, TypeRegistry};
use crate::execute::{ExecuteError, Replacer, execute};
use crate::scope::{Evaluation, Expr, Location, Resolution, ResolveError, ScopeId, ScopeKind};
use crate::state::{BackendError, State, StateError};
use crate::ui::UiError;
use crate::value::Value;

pub use execution::ExecutionRecord;
pub use stage::{Stage, Transition};

#[derive(Debug, Clone, PartialEq)]
pub struct Workflow {
  pub name: String,
  /// Resource type whose replacement this workflow performs.
  pub for_type: String,
  pub scope: ScopeId,
  pub first_stage: String,
  pub stages: Vec<Stage>,
  pub location: Location,
}

impl Workflow {
  pub fn stage(&self, name: &str) -> Option<&Stage> {
    self.stages.iter().find(|s| s.name == name)
  }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
  #[error("workflow {workflow} aborted at stage {stage}")]
  Aborted { workflow: String, stage: String },

  #[error("workflow {workflow}: unknown stage '{stage}'")]
  UnknownStage { workflow: String, stage: String },

  #[error("no workflow handles resources of type {0}")]
  NoWorkflow(String),

  #[error("workflow {workflow}, stage {stage}: {key} not found")]
  MissingTarget {
    workflow: String,
    stage: String,
    key: ResourceKey,
  },

  #[error("workflow {workflow}, stage {stage} failed on {key}: {source}")]
  StageFailed {
    workflow: String,
    stage: String,
    key: ResourceKey,
    #[source]
    source: ExecuteError,
  },

  #[error(transparent)]
  Resolve(#[from] ResolveError),

  #[error(transparent)]
  Diff(#[from] DiffError),

  #[error(transparent)]
  Execute(#[from] ExecuteError),

  #[error(transparent)]
  State(#[from] StateError),

  #[error(transparent)]
  Backend(#[from] BackendError),

  #[error("invalid workflow execution record: {0}")]
  Record(#[source] serde_json::Error),

  #[error(transparent)]
  Ui(#[from] UiError),
}

/// Runs workflows for the execution engine.
pub struct WorkflowRunner<'a> {
  evaluation: &'a mut Evaluation,
}

impl<'a> WorkflowRunner<'a> {
  pub fn new(evaluation: &'a mut Evaluation) -> Self {
    Self { evaluation }
  }

  /// Replace `current` with `pending` by running the workflow for its type,
  /// resuming a recorded execution of the same workflow on the same
  /// resource if there is one.
  pub fn run(
    &mut self,
    ctx: &mut Context<'_>,
    state: &mut State,
    current: &Resource,
    pending: &Resource,
  ) -> Result<(), WorkflowError> {
    let workflow = self
      .evaluation
      .workflow_for(pending.kind())
      .cloned()
      .ok_or_else(|| WorkflowError::NoWorkflow(pending.kind().to_string()))?;
    let backend = Arc::clone(state.backend());

    let record = ExecutionRecord::load(backend.as_ref())?
      .filter(|r| r.matches(pending.kind(), pending.name(), &workflow.name));
    let (mut stage_name, mut executed, mut resuming) = match record {
      Some(record) => {
        let last = record.last_stage().unwrap_or(&workflow.first_stage).to_string();
        ctx
          .ui
          .write(&format!("Resuming workflow {} at stage {}.", workflow.name, last));
        (last, record.executed_stages, true)
      }
      None => (workflow.first_stage.clone(), Vec::new(), false),
    };

    info!(workflow = %workflow.name, resource = %pending.key, stage = %stage_name, resuming, "running workflow");

    loop {
      let stage = workflow.stage(&stage_name).ok_or_else(|| WorkflowError::UnknownStage {
        workflow: workflow.name.clone(),
        stage: stage_name.clone(),
      })?;

      self.run_stage(ctx, state, &workflow, stage, current, pending, resuming)?;
      resuming = false;

      match executed.iter().position(|s| *s == stage.name) {
        Some(pos) => executed.truncate(pos + 1),
        None => executed.push(stage.name.clone()),
      }

      // Saved before the transition is chosen, so a run stopped at the
      // prompt resumes by replaying this stage instead of executing it again.
      if !stage.transitions.is_empty() {
        ExecutionRecord {
          kind: pending.kind().to_string(),
          name: pending.name().to_string(),
          workflow: workflow.name.clone(),
          executed_stages: executed.clone(),
        }
        .save(backend.as_ref())?;
      }
      let Some(transition) = stage.next(ctx.ui)? else {
        ExecutionRecord::clear(backend.as_ref())?;
        ctx.ui.write(&format!("Workflow {} complete.", workflow.name));
        return Ok(());
      };
      stage_name = transition.to.clone();
    }
  }

  /// Plan and execute one stage.
  ///
  /// A stage being replayed on resume already had its swaps persisted and
  /// was already confirmed, so neither happens again.
  #[allow(clippy::too_many_arguments)]
  fn run_stage(
    &mut self,
    ctx: &mut Context<'_>,
    state: &mut State,
    workflow: &Workflow,
    stage: &Stage,
    current: &Resource,
    pending: &Resource,
    replay: bool,
  ) -> Result<(), WorkflowError> {
    if replay {
      ctx.ui.write(&format!("Replaying stage {}.", stage.name));
    } else {
      ctx.ui.write(&format!("Executing stage {}.", stage.name));
    }

    let scope = self.evaluation.scopes.push(stage.scope, ScopeKind::Execution);
    self.evaluation.scopes.set(scope, "NAME", Value::from(pending.name()));
    self.evaluation.scopes.set(scope, "CURRENT", current.to_value());
    self.evaluation.scopes.set(scope, "PENDING", pending.to_value());

    let mut working = state.graph().clone();

    let mut swaps = Vec::new();
    if !replay {
      for swap in &stage.swaps {
        let x = self.target_name(ctx.registry, &swap.x, scope, &mut working)?;
        let y = self.target_name(ctx.registry, &swap.y, scope, &mut working)?;
        for name in [&x, &y] {
          if !working.contains(&ResourceKey::new(&swap.kind, name)) {
            return Err(WorkflowError::MissingTarget {
              workflow: workflow.name.clone(),
              stage: stage.name.clone(),
              key: ResourceKey::new(&swap.kind, name),
            });
          }
        }
        working.swap_names(&swap.kind, &x, &y);
        swaps.push((swap.kind.clone(), x, y));
      }
    }

    let mut target = working.clone();
    let created = self
      .evaluation
      .evaluate_into(ctx.registry, &stage.creates, scope, &mut target)?;
    for key in &created {
      if let Some(resource) = target.get_mut(key) {
        resource.file = current.file.clone();
      }
    }

    for delete in &stage.deletes {
      let name = self.target_name(ctx.registry, &delete.name, scope, &mut target)?;
      let key = ResourceKey::new(&delete.kind, name);
      if target.remove(&key).is_none() {
        warn!(workflow = %workflow.name, stage = %stage.name, resource = %key, "delete target already gone");
      }
    }

    target.merge_outputs(&working, ctx.registry);
    target.settle_links();
    let changes = diff(working.iter(), target.iter(), ctx.registry)?;

    if write_plan(ctx.ui, &changes)
      && stage.confirm_diff
      && !replay
      && !ctx.ui.read_boolean(false, &format!("Execute stage {}?", stage.name))?
    {
      return Err(WorkflowError::Aborted {
        workflow: workflow.name.clone(),
        stage: stage.name.clone(),
      });
    }

    if !swaps.is_empty() {
      for (kind, x, y) in &swaps {
        state.swap(kind, x, y);
        info!(workflow = %workflow.name, kind = %kind, x = %x, y = %y, "swapped");
      }
      state.save()?;
    }

    let report = execute(&changes, state, &mut ctx.reborrow(), None)?;
    if let Some((key, source)) = report.failed {
      return Err(WorkflowError::StageFailed {
        workflow: workflow.name.clone(),
        stage: stage.name.clone(),
        key,
        source,
      });
    }
    Ok(())
  }

  fn target_name(
    &mut self,
    registry: &TypeRegistry,
    expr: &Expr,
    scope: ScopeId,
    graph: &mut ResourceGraph,
  ) -> Result<String, WorkflowError> {
    match self.evaluation.resolve_in(registry, expr, scope, graph) {
      Resolution::Resolved(Value::String(name)) => Ok(name),
      Resolution::Resolved(Value::Int(i)) => Ok(i.to_string()),
      Resolution::Resolved(other) => Err(
        ResolveError::InvalidName {
          got: other.render(),
          location: Location::default(),
        }
        .into(),
      ),
      Resolution::Deferred(deferral) => Err(
        ResolveError::Unresolved {
          reference: deferral.reference,
          location: deferral.location,
        }
        .into(),
      ),
      Resolution::Failed(e) => Err(e.into()),
    }
  }
}

impl Replacer for WorkflowRunner<'_> {
  fn handles(&self, kind: &str) -> bool {
    self.evaluation.workflow_for(kind).is_some()
  }

  fn replace(
    &mut self,
    ctx: &mut Context<'_>,
    state: &mut State,
    current: &Resource,
    pending: &Resource,
  ) -> Result<(), ExecuteError> {
    self.run(ctx, state, current, pending).map_err(ExecuteError::from)
  }
}
