//! Scope storage.
//!
//! Scopes form a tree through parent ids. They live in one arena and are
//! addressed by [`ScopeId`], so child scopes never hold references to their
//! parents.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::diffable::ResourceKey;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeKind {
  Root,
  File { path: String },
  Resource { key: ResourceKey },
  /// A `for`/`if`/template frame.
  Frame,
  Workflow { name: String },
  Stage { name: String },
  /// The per-run scope of a workflow stage.
  Execution,
}

#[derive(Debug, Clone)]
pub struct Scope {
  pub parent: Option<ScopeId>,
  pub kind: ScopeKind,
  values: BTreeMap<String, Value>,
  imports: BTreeMap<String, ScopeId>,
  resources: BTreeSet<ResourceKey>,
}

impl Scope {
  fn new(parent: Option<ScopeId>, kind: ScopeKind) -> Self {
    Self {
      parent,
      kind,
      values: BTreeMap::new(),
      imports: BTreeMap::new(),
      resources: BTreeSet::new(),
    }
  }

  pub fn value(&self, key: &str) -> Option<&Value> {
    self.values.get(key)
  }

  pub fn values(&self) -> &BTreeMap<String, Value> {
    &self.values
  }

  pub fn import(&self, alias: &str) -> Option<ScopeId> {
    self.imports.get(alias).copied()
  }

  /// Resources declared directly in this file scope.
  pub fn resources(&self) -> &BTreeSet<ResourceKey> {
    &self.resources
  }

  pub fn is_file(&self) -> bool {
    matches!(self.kind, ScopeKind::File { .. })
  }
}

#[derive(Debug, Clone)]
pub struct ScopeArena {
  scopes: Vec<Scope>,
  files: HashMap<String, ScopeId>,
  global: Option<ScopeId>,
}

impl Default for ScopeArena {
  fn default() -> Self {
    Self::new()
  }
}

impl ScopeArena {
  pub fn new() -> Self {
    Self {
      scopes: vec![Scope::new(None, ScopeKind::Root)],
      files: HashMap::new(),
      global: None,
    }
  }

  pub fn root(&self) -> ScopeId {
    ScopeId(0)
  }

  pub fn push(&mut self, parent: ScopeId, kind: ScopeKind) -> ScopeId {
    let id = ScopeId(self.scopes.len());
    self.scopes.push(Scope::new(Some(parent), kind));
    id
  }

  /// Add a file scope under the root, or return the existing one.
  pub fn add_file(&mut self, path: &str) -> ScopeId {
    if let Some(id) = self.files.get(path) {
      return *id;
    }
    let id = self.push(self.root(), ScopeKind::File { path: path.to_string() });
    self.files.insert(path.to_string(), id);
    id
  }

  pub fn file(&self, path: &str) -> Option<ScopeId> {
    self.files.get(path).copied()
  }

  pub fn set_global(&mut self, id: ScopeId) {
    self.global = Some(id);
  }

  pub fn global(&self) -> Option<ScopeId> {
    self.global
  }

  pub fn get(&self, id: ScopeId) -> &Scope {
    &self.scopes[id.0]
  }

  pub fn set(&mut self, id: ScopeId, key: impl Into<String>, value: Value) {
    self.scopes[id.0].values.insert(key.into(), value);
  }

  pub fn add_import(&mut self, id: ScopeId, alias: impl Into<String>, target: ScopeId) {
    self.scopes[id.0].imports.insert(alias.into(), target);
  }

  pub fn add_resource(&mut self, id: ScopeId, key: ResourceKey) {
    self.scopes[id.0].resources.insert(key);
  }

  /// `id` and its ancestors, nearest first.
  pub fn ancestors(&self, id: ScopeId) -> impl Iterator<Item = ScopeId> + '_ {
    std::iter::successors(Some(id), move |s| self.get(*s).parent)
  }

  pub fn nearest_file(&self, id: ScopeId) -> Option<ScopeId> {
    self.ancestors(id).find(|s| self.get(*s).is_file())
  }

  pub fn file_path(&self, id: ScopeId) -> &str {
    match self.nearest_file(id).map(|s| &self.get(s).kind) {
      Some(ScopeKind::File { path }) => path,
      _ => "",
    }
  }

  /// Look a variable up through the parent chain. A file scope that misses
  /// consults the global scope before the walk continues.
  pub fn lookup(&self, id: ScopeId, key: &str) -> Option<&Value> {
    for scope_id in self.ancestors(id) {
      let scope = self.get(scope_id);
      if let Some(value) = scope.value(key) {
        return Some(value);
      }
      if !scope.is_file() {
        continue;
      }
      if let Some(global) = self.global.filter(|g| *g != scope_id) {
        if let Some(value) = self.get(global).value(key) {
          return Some(value);
        }
      }
    }
    None
  }
}
