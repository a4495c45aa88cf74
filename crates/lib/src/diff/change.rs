//! Change records produced by the diff engine.

use std::collections::BTreeSet;
use std::fmt;

use crate::diffable::{Resource, ResourceKey};

/// One difference between the current and pending graphs.
///
/// `nested` holds the changes of subresource elements, which are applied
/// as part of their parent and never executed on their own.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
  Create {
    pending: Resource,
    nested: Vec<Change>,
  },
  Update {
    current: Resource,
    pending: Resource,
    changed: BTreeSet<String>,
    nested: Vec<Change>,
  },
  Replace {
    current: Resource,
    pending: Resource,
    changed: BTreeSet<String>,
    nested: Vec<Change>,
  },
  Delete {
    current: Resource,
    nested: Vec<Change>,
  },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangeKind {
  Create,
  Update,
  Replace,
  Delete,
}

impl fmt::Display for ChangeKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ChangeKind::Create => write!(f, "create"),
      ChangeKind::Update => write!(f, "update"),
      ChangeKind::Replace => write!(f, "replace"),
      ChangeKind::Delete => write!(f, "delete"),
    }
  }
}

impl Change {
  pub fn kind(&self) -> ChangeKind {
    match self {
      Change::Create { .. } => ChangeKind::Create,
      Change::Update { .. } => ChangeKind::Update,
      Change::Replace { .. } => ChangeKind::Replace,
      Change::Delete { .. } => ChangeKind::Delete,
    }
  }

  pub fn key(&self) -> &ResourceKey {
    match self {
      Change::Create { pending, .. } => &pending.key,
      Change::Update { pending, .. } | Change::Replace { pending, .. } => &pending.key,
      Change::Delete { current, .. } => &current.key,
    }
  }

  pub fn current(&self) -> Option<&Resource> {
    match self {
      Change::Create { .. } => None,
      Change::Update { current, .. } | Change::Replace { current, .. } | Change::Delete { current, .. } => {
        Some(current)
      }
    }
  }

  pub fn pending(&self) -> Option<&Resource> {
    match self {
      Change::Create { pending, .. } | Change::Update { pending, .. } | Change::Replace { pending, .. } => {
        Some(pending)
      }
      Change::Delete { .. } => None,
    }
  }

  /// Names of the fields that differ. Empty for creates and deletes.
  pub fn changed_fields(&self) -> Option<&BTreeSet<String>> {
    match self {
      Change::Update { changed, .. } | Change::Replace { changed, .. } => Some(changed),
      _ => None,
    }
  }

  pub fn nested(&self) -> &[Change] {
    match self {
      Change::Create { nested, .. }
      | Change::Update { nested, .. }
      | Change::Replace { nested, .. }
      | Change::Delete { nested, .. } => nested,
    }
  }
}
