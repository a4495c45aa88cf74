//! Types for change execution.

use std::fmt;

use thiserror::Error;

use crate::diff::ChangeKind;
use crate::diffable::{ProviderError, Resource, ResourceKey};
use crate::state::StateError;
use crate::ui::UiError;
use crate::workflow::WorkflowError;

/// Errors that can occur while applying changes.
#[derive(Debug, Error)]
pub enum ExecuteError {
  /// The change graph has a cycle. No hook has run.
  #[error("dependency cycle between: {}", join_keys(.0))]
  CycleDetected(Vec<ResourceKey>),

  #[error("no provider registered for '{0}'")]
  UnknownType(String),

  /// A provider hook failed.
  #[error("{action} failed: {source}")]
  Hook {
    action: ChangeKind,
    #[source]
    source: ProviderError,
  },

  /// A resource stayed pending past the wait limit.
  #[error("gave up waiting for {0}")]
  WaitTimeout(ResourceKey),

  #[error("state error: {0}")]
  State(#[from] StateError),

  #[error(transparent)]
  Workflow(Box<WorkflowError>),

  #[error("prompt failed: {0}")]
  Ui(#[from] UiError),
}

impl From<WorkflowError> for ExecuteError {
  fn from(e: WorkflowError) -> Self {
    ExecuteError::Workflow(Box::new(e))
  }
}

fn join_keys(keys: &[ResourceKey]) -> String {
  keys.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// What happened to one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
  Created,
  Updated,
  Replaced,
  /// Replaced by running the workflow registered for its type.
  ReplacedByWorkflow,
  Deleted,
}

impl fmt::Display for Outcome {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Outcome::Created => write!(f, "created"),
      Outcome::Updated => write!(f, "updated"),
      Outcome::Replaced => write!(f, "replaced"),
      Outcome::ReplacedByWorkflow => write!(f, "replaced by workflow"),
      Outcome::Deleted => write!(f, "deleted"),
    }
  }
}

/// Result of executing a change set.
///
/// Execution stops at the first failure. Changes applied before it stay
/// applied and persisted; the rest are listed as skipped.
#[derive(Debug, Default)]
pub struct ExecutionReport {
  pub applied: Vec<(ResourceKey, Outcome)>,
  pub failed: Option<(ResourceKey, ExecuteError)>,
  pub skipped: Vec<ResourceKey>,
  /// Objects replaced create-first whose retirement never succeeded. State
  /// holds their successors, so these are no longer tracked anywhere else.
  pub orphaned: Vec<Resource>,
}

impl ExecutionReport {
  pub fn is_success(&self) -> bool {
    self.failed.is_none()
  }

  pub fn ran_workflow(&self) -> bool {
    self.applied.iter().any(|(_, o)| *o == Outcome::ReplacedByWorkflow)
  }

  pub fn outcome(&self, key: &ResourceKey) -> Option<Outcome> {
    self.applied.iter().find(|(k, _)| k == key).map(|(_, o)| *o)
  }
}
