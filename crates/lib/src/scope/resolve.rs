//! Resolution outcomes and errors.

use thiserror::Error;

use crate::diffable::ResourceKey;

use super::Location;

/// A reference that cannot be satisfied yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deferral {
  pub reference: String,
  pub location: Location,
}

/// Outcome of resolving a reference or evaluating a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<T> {
  Resolved(T),
  /// Retry once more of the tree has been evaluated.
  Deferred(Deferral),
  Failed(ResolveError),
}

impl<T> Resolution<T> {
  pub fn is_resolved(&self) -> bool {
    matches!(self, Resolution::Resolved(_))
  }
}

/// Internal short-circuit used with `?` while evaluating; converted to a
/// [`Resolution`] at the public boundary.
#[derive(Debug)]
pub(crate) enum Halt {
  Defer(Deferral),
  Fail(ResolveError),
}

impl From<ResolveError> for Halt {
  fn from(e: ResolveError) -> Self {
    Halt::Fail(e)
  }
}

impl<T> From<Result<T, Halt>> for Resolution<T> {
  fn from(result: Result<T, Halt>) -> Self {
    match result {
      Ok(value) => Resolution::Resolved(value),
      Err(Halt::Defer(d)) => Resolution::Deferred(d),
      Err(Halt::Fail(e)) => Resolution::Failed(e),
    }
  }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResolveError {
  #[error("{location}: unresolved reference '{reference}'")]
  Unresolved { reference: String, location: Location },

  #[error("evaluation did not settle after {passes} passes; last unresolved reference '{reference}' at {location}")]
  RetryBudgetExhausted {
    passes: usize,
    reference: String,
    location: Location,
  },

  #[error("{location}: unknown resource type '{kind}'")]
  UnknownType { kind: String, location: Location },

  #[error("{location}: '{field}' is not a field of {kind}")]
  UnknownField {
    kind: String,
    field: String,
    location: Location,
  },

  #[error("{location}: field '{field}' of {kind} expects {expected}, got {got}")]
  TypeMismatch {
    kind: String,
    field: String,
    expected: String,
    got: String,
    location: Location,
  },

  #[error("{location}: resource name must be a string, got {got}")]
  InvalidName { got: String, location: Location },

  #[error("{location}: duplicate resource {key}")]
  DuplicateResource { key: ResourceKey, location: Location },

  #[error("{location}: resources cannot be declared inside another resource")]
  NestedResource { location: Location },

  #[error("{location}: {what} is only allowed at file level")]
  Misplaced { what: String, location: Location },

  #[error("{location}: for loop over {count} items cannot bind {variables} variables")]
  LoopArity {
    variables: usize,
    count: usize,
    location: Location,
  },

  #[error("{location}: cannot iterate over {got}")]
  NotIterable { got: String, location: Location },

  #[error("{location}: unknown import '{path}'")]
  UnknownImport { path: String, location: Location },

  #[error("{location}: template {template} has no parameter '{param}'")]
  UnknownParameter {
    template: String,
    param: String,
    location: Location,
  },

  #[error("{location}: {reference} is not known until apply and cannot be interpolated")]
  LateBoundInterpolation { reference: String, location: Location },

  #[error("{location}: workflow {workflow}: {message}")]
  Workflow {
    workflow: String,
    message: String,
    location: Location,
  },
}
