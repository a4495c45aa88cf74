//! Comparing current and pending resources.
//!
//! Resources are matched by primary key. Only configured fields are
//! compared; provider outputs never produce a change. Subresource lists are
//! diffed recursively and a change in any element marks the parent field as
//! changed.

use std::collections::{BTreeSet, HashMap, HashSet};

use thiserror::Error;
use tracing::trace;

use crate::diffable::{FieldKind, Resource, ResourceKey, TypeDef, TypeRegistry};

use super::Change;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiffError {
  #[error("duplicate resource {0} in the {1} graph")]
  DuplicateKey(ResourceKey, &'static str),

  #[error("unknown resource type '{0}'")]
  UnknownType(String),
}

/// Diff two resource lists.
///
/// Changes come out in pending order, followed by deletes in current order.
pub fn diff<'a>(
  current: impl IntoIterator<Item = &'a Resource>,
  pending: impl IntoIterator<Item = &'a Resource>,
  registry: &TypeRegistry,
) -> Result<Vec<Change>, DiffError> {
  let current: Vec<&Resource> = current.into_iter().collect();
  let pending: Vec<&Resource> = pending.into_iter().collect();

  let mut index: HashMap<&ResourceKey, &Resource> = HashMap::with_capacity(current.len());
  for resource in &current {
    if index.insert(&resource.key, resource).is_some() {
      return Err(DiffError::DuplicateKey(resource.key.clone(), "current"));
    }
  }

  let mut seen = HashSet::with_capacity(pending.len());
  let mut changes = Vec::new();
  for resource in &pending {
    if !seen.insert(&resource.key) {
      return Err(DiffError::DuplicateKey(resource.key.clone(), "pending"));
    }
    let def = registry
      .def(resource.kind())
      .ok_or_else(|| DiffError::UnknownType(resource.kind().to_string()))?;

    match index.get(&resource.key) {
      None => changes.push(create(resource, def, registry)?),
      Some(existing) => {
        if let Some(change) = compare(existing, resource, def, registry)? {
          changes.push(change);
        }
      }
    }
  }

  for resource in current {
    if !seen.contains(&resource.key) {
      let def = registry
        .def(resource.kind())
        .ok_or_else(|| DiffError::UnknownType(resource.kind().to_string()))?;
      changes.push(delete(resource, def, registry)?);
    }
  }

  trace!(changes = changes.len(), "diff complete");
  Ok(changes)
}

fn create(pending: &Resource, def: &TypeDef, registry: &TypeRegistry) -> Result<Change, DiffError> {
  let mut nested = Vec::new();
  for field in def.subresource_fields() {
    let sub_def = subresource_def(&field.kind, registry)?;
    for element in pending.subresources.get(&field.name).into_iter().flatten() {
      nested.push(create(element, sub_def, registry)?);
    }
  }
  Ok(Change::Create {
    pending: pending.clone(),
    nested,
  })
}

fn delete(current: &Resource, def: &TypeDef, registry: &TypeRegistry) -> Result<Change, DiffError> {
  let mut nested = Vec::new();
  for field in def.subresource_fields() {
    let sub_def = subresource_def(&field.kind, registry)?;
    for element in current.subresources.get(&field.name).into_iter().flatten() {
      nested.push(delete(element, sub_def, registry)?);
    }
  }
  Ok(Change::Delete {
    current: current.clone(),
    nested,
  })
}

/// Compare two versions of the same resource. `None` means no change.
fn compare(
  current: &Resource,
  pending: &Resource,
  def: &TypeDef,
  registry: &TypeRegistry,
) -> Result<Option<Change>, DiffError> {
  let mut changed = BTreeSet::new();
  let mut nested = Vec::new();

  for field in &def.fields {
    if field.output {
      continue;
    }
    if let FieldKind::Subresource { .. } = field.kind {
      let sub_def = subresource_def(&field.kind, registry)?;
      let empty = Vec::new();
      let before = current.subresources.get(&field.name).unwrap_or(&empty);
      let after = pending.subresources.get(&field.name).unwrap_or(&empty);
      let field_changes = diff_elements(before, after, sub_def, registry)?;
      if !field_changes.is_empty() {
        changed.insert(field.name.clone());
        nested.extend(field_changes);
      }
      continue;
    }
    if current.get(&field.name) != pending.get(&field.name) {
      changed.insert(field.name.clone());
    }
  }

  if changed.is_empty() {
    return Ok(None);
  }

  let updatable = changed
    .iter()
    .all(|name| def.field_def(name).is_some_and(|f| f.updatable));
  trace!(resource = %pending.key, ?changed, updatable, "resource differs");

  let current = current.clone();
  let pending = pending.clone();
  Ok(Some(if updatable {
    Change::Update {
      current,
      pending,
      changed,
      nested,
    }
  } else {
    Change::Replace {
      current,
      pending,
      changed,
      nested,
    }
  }))
}

/// Diff subresource elements, matched by identifier.
fn diff_elements(
  current: &[Resource],
  pending: &[Resource],
  def: &TypeDef,
  registry: &TypeRegistry,
) -> Result<Vec<Change>, DiffError> {
  let mut changes = Vec::new();
  for element in pending {
    match current.iter().find(|c| c.key == element.key) {
      None => changes.push(create(element, def, registry)?),
      Some(existing) => changes.extend(compare(existing, element, def, registry)?),
    }
  }
  for element in current {
    if !pending.iter().any(|p| p.key == element.key) {
      changes.push(delete(element, def, registry)?);
    }
  }
  Ok(changes)
}

fn subresource_def<'r>(kind: &FieldKind, registry: &'r TypeRegistry) -> Result<&'r TypeDef, DiffError> {
  match kind {
    FieldKind::Subresource { kind, .. } => registry.def(kind).ok_or_else(|| DiffError::UnknownType(kind.clone())),
    other => Err(DiffError::UnknownType(other.to_string())),
  }
}
