//! An arena of resources addressed by stable ids.
//!
//! Dependency edges are stored on both endpoints as [`ResourceKey`] sets. The
//! graph owns the resources; everything else refers to them by key or id.

use std::collections::HashMap;

use thiserror::Error;
use tracing::trace;

use crate::value::{Link, Value};

use super::{Resource, ResourceKey, TypeRegistry};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
  #[error("duplicate resource: {0}")]
  Duplicate(ResourceKey),
}

/// Stable index of a resource in a [`ResourceGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(usize);

#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
  slots: Vec<Option<Resource>>,
  index: HashMap<ResourceKey, ResourceId>,
}

impl ResourceGraph {
  pub fn new() -> Self {
    Self::default()
  }

  /// Insert a resource and wire its dependency edges to whatever endpoints
  /// are already present.
  pub fn insert(&mut self, mut resource: Resource) -> Result<ResourceId, GraphError> {
    if self.index.contains_key(&resource.key) {
      return Err(GraphError::Duplicate(resource.key));
    }
    resource.dependencies.remove(&resource.key);
    resource.dependents.remove(&resource.key);

    let key = resource.key.clone();
    let id = ResourceId(self.slots.len());
    let dependencies: Vec<_> = resource.dependencies.iter().cloned().collect();
    let dependents: Vec<_> = resource.dependents.iter().cloned().collect();
    self.slots.push(Some(resource));
    self.index.insert(key.clone(), id);

    for dependency in dependencies {
      if let Some(target) = self.get_mut(&dependency) {
        target.dependents.insert(key.clone());
      }
    }
    for dependent in dependents {
      if let Some(source) = self.get_mut(&dependent) {
        source.dependencies.insert(key.clone());
      }
    }
    // Resources inserted earlier may already point at this key.
    let waiting: Vec<ResourceKey> = self
      .iter()
      .filter(|r| r.key != key && r.dependencies.contains(&key))
      .map(|r| r.key.clone())
      .collect();
    if let Some(this) = self.get_mut(&key) {
      this.dependents.extend(waiting);
    }

    trace!(resource = %key, "inserted into graph");
    Ok(id)
  }

  /// Insert or overwrite a resource, keeping its slot when the key exists.
  pub fn upsert(&mut self, resource: Resource) {
    match self.index.get(&resource.key).copied() {
      Some(id) => {
        let previous_dependents = self.slots[id.0]
          .as_ref()
          .map(|r| r.dependents.clone())
          .unwrap_or_default();
        let key = resource.key.clone();
        self.detach(&key);
        let mut resource = resource;
        resource.dependents.extend(previous_dependents);
        resource.dependencies.remove(&key);
        let dependencies: Vec<_> = resource.dependencies.iter().cloned().collect();
        self.slots[id.0] = Some(resource);
        for dependency in dependencies {
          if let Some(target) = self.get_mut(&dependency) {
            target.dependents.insert(key.clone());
          }
        }
      }
      None => {
        // Cannot collide: the key is absent.
        let _ = self.insert(resource);
      }
    }
  }

  /// Record that `dependent` depends on `dependency`. Self edges are ignored.
  pub fn link(&mut self, dependent: &ResourceKey, dependency: &ResourceKey) {
    if dependent == dependency {
      return;
    }
    if let Some(r) = self.get_mut(dependent) {
      r.dependencies.insert(dependency.clone());
    }
    if let Some(r) = self.get_mut(dependency) {
      r.dependents.insert(dependent.clone());
    }
  }

  pub fn remove(&mut self, key: &ResourceKey) -> Option<Resource> {
    let id = self.index.remove(key)?;
    let resource = self.slots[id.0].take()?;
    for dependency in &resource.dependencies {
      if let Some(r) = self.get_mut(dependency) {
        r.dependents.remove(key);
      }
    }
    for dependent in &resource.dependents {
      if let Some(r) = self.get_mut(dependent) {
        r.dependencies.remove(key);
      }
    }
    trace!(resource = %key, "removed from graph");
    Some(resource)
  }

  fn detach(&mut self, key: &ResourceKey) {
    let Some(dependencies) = self.get(key).map(|r| r.dependencies.clone()) else {
      return;
    };
    for dependency in &dependencies {
      if let Some(r) = self.get_mut(dependency) {
        r.dependents.remove(key);
      }
    }
  }

  pub fn get(&self, key: &ResourceKey) -> Option<&Resource> {
    self.index.get(key).and_then(|id| self.slots[id.0].as_ref())
  }

  pub fn get_mut(&mut self, key: &ResourceKey) -> Option<&mut Resource> {
    let id = *self.index.get(key)?;
    self.slots[id.0].as_mut()
  }

  fn id_of(&self, key: &ResourceKey) -> Option<ResourceId> {
    self.index.get(key).copied()
  }

  pub fn contains(&self, key: &ResourceKey) -> bool {
    self.index.contains_key(key)
  }

  /// Resources in insertion order.
  pub fn iter(&self) -> impl Iterator<Item = &Resource> {
    self.slots.iter().filter_map(Option::as_ref)
  }

  pub fn keys(&self) -> impl Iterator<Item = &ResourceKey> {
    self.iter().map(|r| &r.key)
  }

  pub fn of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Resource> + 'a {
    self.iter().filter(move |r| r.key.kind == kind)
  }

  pub fn len(&self) -> usize {
    self.index.len()
  }

  pub fn is_empty(&self) -> bool {
    self.index.is_empty()
  }

  /// Exchange the identifiers of two resources of the same type, along with
  /// every edge and link that names them.
  ///
  /// Returns false if either resource is missing.
  pub fn swap_names(&mut self, kind: &str, x: &str, y: &str) -> bool {
    let kx = ResourceKey::new(kind, x);
    let ky = ResourceKey::new(kind, y);
    if kx == ky {
      return self.contains(&kx);
    }
    let (Some(ix), Some(iy)) = (self.id_of(&kx), self.id_of(&ky)) else {
      return false;
    };

    let rename = |key: &ResourceKey| -> ResourceKey {
      if *key == kx {
        ky.clone()
      } else if *key == ky {
        kx.clone()
      } else {
        key.clone()
      }
    };

    for slot in self.slots.iter_mut().flatten() {
      slot.dependencies = slot.dependencies.iter().map(rename).collect();
      slot.dependents = slot.dependents.iter().map(rename).collect();
      for value in slot.fields.values_mut() {
        value.visit_links_mut(&mut |v| {
          if let Value::Link(link) = v {
            link.target = rename(&link.target);
          }
        });
      }
    }
    if let Some(r) = self.slots[ix.0].as_mut() {
      r.key = ky.clone();
    }
    if let Some(r) = self.slots[iy.0].as_mut() {
      r.key = kx.clone();
    }
    self.index.insert(kx, iy);
    self.index.insert(ky, ix);
    true
  }

  /// Replace late-bound links in `value` with the target's attribute when
  /// the target is in this graph and has a non-null value for it.
  pub fn settle_value(&self, value: &mut Value) {
    value.visit_links_mut(&mut |v| {
      let replacement = match &*v {
        Value::Link(Link {
          target,
          attribute: Some(attribute),
        }) => self
          .get(target)
          .map(|r| r.get(attribute))
          .filter(|found| !found.is_null())
          .cloned(),
        _ => None,
      };
      if let Some(replacement) = replacement {
        *v = replacement;
      }
    });
  }

  /// Settle every late-bound link of `resource` against this graph.
  pub fn settle(&self, resource: &mut Resource) {
    for value in resource.fields.values_mut() {
      self.settle_value(value);
    }
    for nested in resource.subresources.values_mut().flatten() {
      self.settle(nested);
    }
  }

  /// Settle links between resources of this graph.
  pub fn settle_links(&mut self) {
    let keys: Vec<ResourceKey> = self.keys().cloned().collect();
    for key in keys {
      if let Some(mut resource) = self.get(&key).cloned() {
        self.settle(&mut resource);
        if let Some(slot) = self.get_mut(&key) {
          slot.fields = resource.fields;
          slot.subresources = resource.subresources;
        }
      }
    }
  }

  /// Copy provider-generated fields from matching resources of `current`
  /// wherever this graph has none, so unchanged objects diff as equal and
  /// links to generated attributes resolve.
  pub fn merge_outputs(&mut self, current: &ResourceGraph, registry: &TypeRegistry) {
    for slot in self.slots.iter_mut().flatten() {
      let Some(existing) = current.get(&slot.key) else {
        continue;
      };
      let Some(def) = registry.def(&slot.key.kind) else {
        continue;
      };
      for field in def.output_fields() {
        let known = existing.get(&field.name);
        if !known.is_null() && slot.get(&field.name).is_null() {
          slot.fields.insert(field.name.clone(), known.clone());
        }
      }
    }
  }
}
