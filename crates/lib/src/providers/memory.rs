//! A simulated cloud holding objects in memory.
//!
//! Every [`MemoryProvider`] made from one [`MemoryCloud`] shares its object
//! table, call log and injected failures. Objects are addressed by their
//! generated id when the type has one and by resource key otherwise, so a
//! renamed resource still finds its object. A cloud opened on a file
//! persists its objects there after every change, so separate runs see the
//! same world.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::diff::ChangeKind;
use crate::diffable::{Provider, ProviderError, Resource, ResourceKey};
use crate::value::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredObject {
  kind: String,
  fields: BTreeMap<String, Value>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Objects {
  serial: u64,
  objects: BTreeMap<String, StoredObject>,
}

#[derive(Debug, Default)]
struct World {
  stored: Objects,
  calls: Vec<String>,
  failures: BTreeSet<(ChangeKind, ResourceKey)>,
  /// Remaining readiness checks per converging object.
  converging: BTreeMap<ResourceKey, u32>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryCloud {
  world: Arc<Mutex<World>>,
  path: Option<PathBuf>,
}

impl MemoryCloud {
  pub fn new() -> Self {
    Self::default()
  }

  /// A cloud persisted to `path`, loading whatever is already there.
  pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
    let path = path.as_ref().to_path_buf();
    let stored = match fs::read_to_string(&path) {
      Ok(content) => serde_json::from_str(&content).map_err(io::Error::other)?,
      Err(e) if e.kind() == io::ErrorKind::NotFound => Objects::default(),
      Err(e) => return Err(e),
    };
    debug!(path = %path.display(), objects = stored.objects.len(), "cloud loaded");
    Ok(Self {
      world: Arc::new(Mutex::new(World {
        stored,
        ..Default::default()
      })),
      path: Some(path),
    })
  }

  pub fn provider(&self, kind: &str) -> MemoryProvider {
    MemoryProvider {
      cloud: self.clone(),
      kind: kind.to_string(),
      generated: None,
      checks: 0,
    }
  }

  fn world(&self) -> MutexGuard<'_, World> {
    self.world.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn persist(&self, world: &World) -> Result<(), ProviderError> {
    let Some(path) = &self.path else {
      return Ok(());
    };
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(&world.stored).map_err(io::Error::other)?;
    fs::write(path, content)?;
    Ok(())
  }

  /// Every hook call so far, as `"<action> <kind> <name>"`.
  pub fn calls(&self) -> Vec<String> {
    self.world().calls.clone()
  }

  pub fn clear_calls(&self) {
    self.world().calls.clear();
  }

  /// Make the next `action` hook on `key` fail.
  pub fn fail_on(&self, action: ChangeKind, key: ResourceKey) {
    self.world().failures.insert((action, key));
  }

  pub fn contains(&self, id: &str) -> bool {
    self.world().stored.objects.contains_key(id)
  }

  pub fn object(&self, id: &str) -> Option<BTreeMap<String, Value>> {
    self.world().stored.objects.get(id).map(|o| o.fields.clone())
  }

  /// Fields of every object of `kind`, ordered by id.
  pub fn objects(&self, kind: &str) -> Vec<BTreeMap<String, Value>> {
    self
      .world()
      .stored
      .objects
      .values()
      .filter(|o| o.kind == kind)
      .map(|o| o.fields.clone())
      .collect()
  }

  pub fn len(&self) -> usize {
    self.world().stored.objects.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Delete an object behind the engine's back.
  pub fn forget(&self, id: &str) {
    self.world().stored.objects.remove(id);
  }

  /// Change a field behind the engine's back.
  pub fn drift(&self, id: &str, field: &str, value: Value) {
    if let Some(object) = self.world().stored.objects.get_mut(id) {
      object.fields.insert(field.to_string(), value);
    }
  }
}

/// Provider for one resource type inside a [`MemoryCloud`].
#[derive(Debug, Clone)]
pub struct MemoryProvider {
  cloud: MemoryCloud,
  kind: String,
  generated: Option<String>,
  checks: u32,
}

impl MemoryProvider {
  /// Fill `field` with a fresh identifier on create.
  pub fn generating(mut self, field: &str) -> Self {
    self.generated = Some(field.to_string());
    self
  }

  /// Report creates as pending until `checks` readiness polls have been
  /// made.
  pub fn converging(mut self, checks: u32) -> Self {
    self.checks = checks;
    self
  }

  /// Log the call and consume an injected failure for it, if any.
  fn enter(&self, world: &mut World, action: ChangeKind, key: &ResourceKey) -> Result<(), ProviderError> {
    trace!(%action, resource = %key, "memory provider call");
    world.calls.push(format!("{} {}", action, key));
    if world.failures.remove(&(action, key.clone())) {
      return Err(ProviderError::failed(format!("injected {} failure for {}", action, key)));
    }
    Ok(())
  }

  /// The generated id of `resource`, or its key.
  fn object_id(&self, resource: &Resource) -> String {
    match self.generated.as_deref().map(|field| resource.get(field)) {
      Some(Value::String(id)) => id.clone(),
      _ => resource.key.to_string(),
    }
  }

  fn store(&self, world: &mut World, resource: &Resource) {
    world.stored.objects.insert(
      self.object_id(resource),
      StoredObject {
        kind: self.kind.clone(),
        fields: resource.fields.clone(),
      },
    );
  }
}

impl Provider for MemoryProvider {
  fn refresh(&self, resource: &mut Resource) -> Result<bool, ProviderError> {
    let world = self.cloud.world();
    let Some(object) = world.stored.objects.get(&self.object_id(resource)) else {
      return Ok(false);
    };
    for (field, value) in &object.fields {
      resource.fields.insert(field.clone(), value.clone());
    }
    Ok(true)
  }

  fn create(&self, resource: &mut Resource) -> Result<(), ProviderError> {
    let mut world = self.cloud.world();
    self.enter(&mut world, ChangeKind::Create, &resource.key)?;
    if let Some(field) = &self.generated {
      world.stored.serial += 1;
      let id = format!("{}-{}", self.kind.rsplit("::").next().unwrap_or(&self.kind), world.stored.serial);
      resource.fields.insert(field.clone(), Value::String(id));
    }
    self.store(&mut world, resource);
    self.cloud.persist(&world)?;
    if self.checks > 0 {
      world.converging.insert(resource.key.clone(), self.checks);
      return Err(ProviderError::pending(format!("{} is starting", resource.key)));
    }
    Ok(())
  }

  fn update(&self, current: &Resource, pending: &mut Resource, changed: &BTreeSet<String>) -> Result<(), ProviderError> {
    let mut world = self.cloud.world();
    self.enter(&mut world, ChangeKind::Update, &pending.key)?;
    debug!(resource = %pending.key, ?changed, "memory update");
    if let Some(field) = &self.generated
      && pending.get(field).is_null()
    {
      pending.fields.insert(field.clone(), current.get(field).clone());
    }
    self.store(&mut world, pending);
    self.cloud.persist(&world)?;
    Ok(())
  }

  fn delete(&self, resource: &Resource) -> Result<(), ProviderError> {
    let mut world = self.cloud.world();
    self.enter(&mut world, ChangeKind::Delete, &resource.key)?;
    world.stored.objects.remove(&self.object_id(resource));
    world.converging.remove(&resource.key);
    self.cloud.persist(&world)?;
    Ok(())
  }

  fn ready(&self, resource: &Resource) -> Result<bool, ProviderError> {
    let mut world = self.cloud.world();
    world.calls.push(format!("ready {}", resource.key));
    match world.converging.get_mut(&resource.key) {
      None => Ok(true),
      Some(remaining) => {
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
          world.converging.remove(&resource.key);
          Ok(true)
        } else {
          Ok(false)
        }
      }
    }
  }
}
