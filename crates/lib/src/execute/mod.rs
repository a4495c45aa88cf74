//! Applying a change set.
//!
//! Changes run in two passes:
//! 1. Creates, updates and replacements, pending dependencies first
//! 2. Deletes, and the retirement of replaced objects, dependents first as
//!    recorded in state
//!
//! State is saved after every change. The first failure stops execution;
//! nothing already applied is rolled back. A replaced object that was not
//! retired is listed in the report as orphaned, since state now only holds
//! its successor.

mod dag;
mod types;
mod wait;

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::context::Context;
use crate::diff::{Change, ChangeKind};
use crate::diffable::{Provider, ProviderError, ReplaceOrder, Resource, ResourceKey, TypeRegistry};
use crate::state::State;

pub use dag::ChangeDag;
pub use types::{ExecuteError, ExecutionReport, Outcome};
pub use wait::{WaitError, Waiter};

/// Takes over replacement of resources of the types it handles, typically
/// by running a workflow.
pub trait Replacer {
  fn handles(&self, kind: &str) -> bool;

  fn replace(
    &mut self,
    ctx: &mut Context<'_>,
    state: &mut State,
    current: &Resource,
    pending: &Resource,
  ) -> Result<(), ExecuteError>;
}

/// Apply `changes` to the world and to `state`.
///
/// Returns an error without running any hook if the changes form a
/// dependency cycle. Hook failures are reported in the returned
/// [`ExecutionReport`].
pub fn execute(
  changes: &[Change],
  state: &mut State,
  ctx: &mut Context<'_>,
  mut replacer: Option<&mut dyn Replacer>,
) -> Result<ExecutionReport, ExecuteError> {
  info!(changes = changes.len(), "starting execution");

  let dag = ChangeDag::from_changes(changes)?;
  let order = dag.creation_order()?;

  let mut report = ExecutionReport::default();
  let mut retire = Vec::new();

  for &i in &order {
    let change = &changes[i];
    let result = match change {
      Change::Delete { .. } => continue,
      Change::Create { pending, .. } => create(ctx, state, pending).map(|()| Outcome::Created),
      Change::Update {
        current,
        pending,
        changed,
        ..
      } => update(ctx, state, current, pending, changed).map(|()| Outcome::Updated),
      Change::Replace { current, pending, .. } => {
        let kind = pending.kind();
        match replacer.as_deref_mut().filter(|r| r.handles(kind)) {
          Some(replacer) => {
            ctx.ui.write(&format!("~ Replacing {} with workflow", pending.key));
            replacer
              .replace(ctx, state, current, pending)
              .map(|()| Outcome::ReplacedByWorkflow)
          }
          None => match replace_order(ctx.registry, kind) {
            ReplaceOrder::CreateBeforeDelete => create(ctx, state, pending).map(|()| {
              retire.push(i);
              Outcome::Replaced
            }),
            ReplaceOrder::DeleteBeforeCreate => delete(ctx, state, current)
              .and_then(|()| create(ctx, state, pending))
              .map(|()| Outcome::Replaced),
          },
        }
      }
    };
    if !record(&mut report, change.key(), result) {
      return Ok(finish(report, changes, &retire));
    }
  }

  for i in dag.deletion_order()? {
    let change = &changes[i];
    let result = match change {
      Change::Delete { current, .. } => delete(ctx, state, current).map(|()| Outcome::Deleted),
      Change::Replace { current, .. } if retire.contains(&i) => {
        ctx.ui.write(&format!("- Retiring replaced {}", current.key));
        match destroy(ctx, current) {
          Ok(()) => {
            retire.retain(|r| *r != i);
            continue;
          }
          Err(e) => Err(e),
        }
      }
      _ => continue,
    };
    if !record(&mut report, change.key(), result) {
      return Ok(finish(report, changes, &retire));
    }
  }

  info!(applied = report.applied.len(), "execution complete");
  Ok(report)
}

/// Record a change result. Returns false if execution must stop.
fn record(report: &mut ExecutionReport, key: &ResourceKey, result: Result<Outcome, ExecuteError>) -> bool {
  match result {
    Ok(outcome) => {
      info!(resource = %key, %outcome, "change applied");
      if let Some(existing) = report.applied.iter_mut().find(|(k, _)| k == key) {
        existing.1 = outcome;
      } else {
        report.applied.push((key.clone(), outcome));
      }
      true
    }
    Err(e) => {
      error!(resource = %key, error = %e, "change failed");
      report.applied.retain(|(k, _)| k != key);
      report.failed = Some((key.clone(), e));
      false
    }
  }
}

fn finish(mut report: ExecutionReport, changes: &[Change], retire: &[usize]) -> ExecutionReport {
  let failed = report.failed.as_ref().map(|(k, _)| k.clone());
  report.skipped = changes
    .iter()
    .map(Change::key)
    .filter(|k| Some(*k) != failed.as_ref() && report.outcome(k).is_none())
    .cloned()
    .collect();
  for change in retire.iter().map(|&i| &changes[i]) {
    if let Some(current) = change.current() {
      warn!(resource = %current.key, "replaced object was not retired");
      report.orphaned.push(current.clone());
    }
  }
  report
}

fn replace_order(registry: &TypeRegistry, kind: &str) -> ReplaceOrder {
  registry.def(kind).map(|d| d.replace_order).unwrap_or_default()
}

fn provider_for(registry: &TypeRegistry, kind: &str) -> Result<Arc<dyn Provider>, ExecuteError> {
  registry
    .provider(kind)
    .cloned()
    .ok_or_else(|| ExecuteError::UnknownType(kind.to_string()))
}

/// Run a hook, waiting for the resource to converge if the provider says
/// it is still pending.
fn run_hook(
  ctx: &mut Context<'_>,
  action: ChangeKind,
  provider: &dyn Provider,
  resource: &mut Resource,
  hook: impl FnOnce(&dyn Provider, &mut Resource) -> Result<(), ProviderError>,
) -> Result<(), ExecuteError> {
  match hook(provider, resource) {
    Ok(()) => Ok(()),
    Err(ProviderError::Pending { reason }) => {
      ctx.ui.write(&format!("  {} is pending: {}", resource.key, reason));
      let what = resource.key.to_string();
      let snapshot: &Resource = resource;
      let ready = Waiter::new(&ctx.settings.wait)
        .until(ctx.ui, &what, || provider.ready(snapshot))
        .map_err(|e| match e {
          WaitError::Provider(source) => ExecuteError::Hook { action, source },
          WaitError::Ui(e) => ExecuteError::Ui(e),
        })?;
      if ready {
        Ok(())
      } else {
        Err(ExecuteError::WaitTimeout(resource.key.clone()))
      }
    }
    Err(source) => Err(ExecuteError::Hook { action, source }),
  }
}

fn create(ctx: &mut Context<'_>, state: &mut State, pending: &Resource) -> Result<(), ExecuteError> {
  let provider = provider_for(ctx.registry, pending.kind())?;
  let mut resource = pending.clone();
  state.settle(&mut resource);

  ctx.ui.write(&format!("+ Creating {}", resource.key));
  run_hook(ctx, ChangeKind::Create, provider.as_ref(), &mut resource, |p, r| p.create(r))?;

  state.upsert(resource);
  state.save()?;
  Ok(())
}

fn update(
  ctx: &mut Context<'_>,
  state: &mut State,
  current: &Resource,
  pending: &Resource,
  changed: &std::collections::BTreeSet<String>,
) -> Result<(), ExecuteError> {
  let provider = provider_for(ctx.registry, pending.kind())?;
  let mut resource = pending.clone();
  state.settle(&mut resource);

  ctx.ui.write(&format!("* Updating {}", resource.key));
  run_hook(ctx, ChangeKind::Update, provider.as_ref(), &mut resource, |p, r| {
    p.update(current, r, changed)
  })?;

  state.upsert(resource);
  state.save()?;
  Ok(())
}

fn delete(ctx: &mut Context<'_>, state: &mut State, current: &Resource) -> Result<(), ExecuteError> {
  ctx.ui.write(&format!("- Deleting {}", current.key));
  destroy(ctx, current)?;
  state.remove(&current.key);
  state.save()?;
  Ok(())
}

/// Delete the real object behind `current` without touching state.
fn destroy(ctx: &mut Context<'_>, current: &Resource) -> Result<(), ExecuteError> {
  let provider = provider_for(ctx.registry, current.kind())?;
  let mut resource = current.clone();
  run_hook(ctx, ChangeKind::Delete, provider.as_ref(), &mut resource, |p, r| p.delete(r))
}
