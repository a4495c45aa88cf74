//! Persisted state: the current resource graph.
//!
//! Resources are stored per declaring file, one JSON blob each under
//! `resources/`. Every applied change is saved right away so an interrupted
//! run leaves state matching what actually happened.

mod backend;
mod lock;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use crate::consts::{STATE_PREFIX, STATE_SUFFIX, STATE_VERSION};
use crate::diffable::{Resource, ResourceGraph, ResourceKey};

pub use backend::{BackendError, FileBackend, LocalFileBackend, MemoryBackend, OutputStream};
pub use lock::{FileLockBackend, LockBackend, LockError, LockMetadata, MemoryLockBackend, StateLock, new_lock_id};

#[derive(Debug, Error)]
pub enum StateError {
  #[error(transparent)]
  Backend(#[from] BackendError),

  #[error("failed to parse {path}: {source}")]
  Parse {
    path: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to serialize state: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("{path}: unsupported state version {version}")]
  UnsupportedVersion { path: String, version: u32 },

  #[error("{path}: duplicate resource {key}")]
  Duplicate { path: String, key: ResourceKey },
}

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
  version: u32,
  resources: Vec<Resource>,
}

pub struct State {
  graph: ResourceGraph,
  backend: Arc<dyn FileBackend>,
  /// Blobs known to exist, so emptied files get removed on save.
  written: BTreeSet<String>,
}

impl std::fmt::Debug for State {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("State")
      .field("resources", &self.graph.len())
      .field("written", &self.written)
      .finish()
  }
}

fn blob_path(file: &str) -> String {
  let name = if file.is_empty() { "_" } else { file };
  format!("{}{}{}", STATE_PREFIX, name, STATE_SUFFIX)
}

impl State {
  /// An empty state that saves to `backend`.
  pub fn empty(backend: Arc<dyn FileBackend>) -> Self {
    Self {
      graph: ResourceGraph::new(),
      backend,
      written: BTreeSet::new(),
    }
  }

  /// Load every resource blob from `backend`.
  pub fn load(backend: Arc<dyn FileBackend>) -> Result<Self, StateError> {
    let mut graph = ResourceGraph::new();
    let mut written = BTreeSet::new();
    let mut edges = Vec::new();

    for path in backend.list()? {
      if !(path.starts_with(STATE_PREFIX) && path.ends_with(STATE_SUFFIX)) {
        continue;
      }
      let content = backend.read_to_string(&path)?;
      let file: StateFile = serde_json::from_str(&content).map_err(|source| StateError::Parse {
        path: path.clone(),
        source,
      })?;
      if file.version != STATE_VERSION {
        return Err(StateError::UnsupportedVersion {
          path,
          version: file.version,
        });
      }
      for mut resource in file.resources {
        // Edges are rebuilt from dependencies once every blob is loaded.
        resource.dependents.clear();
        let dependencies = std::mem::take(&mut resource.dependencies);
        edges.extend(dependencies.into_iter().map(|d| (resource.key.clone(), d)));
        let key = resource.key.clone();
        graph
          .insert(resource)
          .map_err(|_| StateError::Duplicate { path: path.clone(), key })?;
      }
      written.insert(path);
    }
    for (dependent, dependency) in &edges {
      graph.link(dependent, dependency);
    }
    // Dependencies on resources that are gone still matter for ordering.
    for (dependent, dependency) in edges {
      if let Some(resource) = graph.get_mut(&dependent) {
        resource.dependencies.insert(dependency);
      }
    }

    debug!(resources = graph.len(), blobs = written.len(), "state loaded");
    Ok(Self {
      graph,
      backend,
      written,
    })
  }

  pub fn graph(&self) -> &ResourceGraph {
    &self.graph
  }

  pub fn get(&self, key: &ResourceKey) -> Option<&Resource> {
    self.graph.get(key)
  }

  pub fn resources(&self) -> impl Iterator<Item = &Resource> {
    self.graph.iter()
  }

  pub fn backend(&self) -> &Arc<dyn FileBackend> {
    &self.backend
  }

  pub fn upsert(&mut self, mut resource: Resource) {
    resource.location = None;
    trace!(resource = %resource.key, "state upsert");
    self.graph.upsert(resource);
  }

  pub fn remove(&mut self, key: &ResourceKey) -> Option<Resource> {
    trace!(resource = %key, "state remove");
    self.graph.remove(key)
  }

  pub fn swap(&mut self, kind: &str, x: &str, y: &str) -> bool {
    self.graph.swap_names(kind, x, y)
  }

  /// Settle late-bound links in `resource` against persisted values.
  pub fn settle(&self, resource: &mut Resource) {
    self.graph.settle(resource);
  }

  /// Write every per-file blob and remove blobs for files with no
  /// resources left.
  pub fn save(&mut self) -> Result<(), StateError> {
    let mut by_file: BTreeMap<String, Vec<Resource>> = BTreeMap::new();
    for resource in self.graph.iter() {
      by_file.entry(blob_path(&resource.file)).or_default().push(resource.clone());
    }

    for (path, mut resources) in by_file.iter_mut().map(|(p, r)| (p.clone(), std::mem::take(r))) {
      resources.sort_by(|a, b| a.key.cmp(&b.key));
      for resource in &mut resources {
        resource.dependents.clear();
      }
      let content = serde_json::to_string_pretty(&StateFile {
        version: STATE_VERSION,
        resources,
      })
      .map_err(StateError::Serialize)?;
      self.backend.write_all(&path, content.as_bytes())?;
      self.written.insert(path);
    }

    let stale: Vec<String> = self
      .written
      .iter()
      .filter(|p| !by_file.contains_key(*p))
      .cloned()
      .collect();
    for path in stale {
      self.backend.delete(&path)?;
      self.written.remove(&path);
    }

    trace!(resources = self.graph.len(), "state saved");
    Ok(())
  }
}
