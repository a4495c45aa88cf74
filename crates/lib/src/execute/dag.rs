//! Dependency ordering of a change set.
//!
//! Every top-level change becomes a node in two graphs. Edges run from a
//! dependency to its dependent. Creates, updates and replaces are ordered by
//! the edges of their pending side. Deletes and retirements are ordered by
//! the edges of their current side, so a resource is removed before the
//! resources it used to depend on.

use std::collections::HashMap;

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};

use crate::diff::Change;
use crate::diffable::{Resource, ResourceKey};

use super::types::ExecuteError;

pub struct ChangeDag {
  pending: DiGraph<usize, ()>,
  current: DiGraph<usize, ()>,
}

impl ChangeDag {
  /// Build both graphs. Node weights are indices into `changes`.
  pub fn from_changes(changes: &[Change]) -> Result<Self, ExecuteError> {
    let dag = Self {
      pending: build(changes, Change::pending),
      current: build(changes, Change::current),
    };
    verify_acyclic(&dag.pending, changes)?;
    verify_acyclic(&dag.current, changes)?;
    Ok(dag)
  }

  /// Change indices with every pending dependency before its dependents.
  pub fn creation_order(&self) -> Result<Vec<usize>, ExecuteError> {
    sorted(&self.pending)
  }

  /// Change indices with every dependent, as recorded in state, before the
  /// resources it depends on.
  pub fn deletion_order(&self) -> Result<Vec<usize>, ExecuteError> {
    let mut order = sorted(&self.current)?;
    order.reverse();
    Ok(order)
  }
}

fn build<'c>(changes: &'c [Change], side: impl Fn(&'c Change) -> Option<&'c Resource>) -> DiGraph<usize, ()> {
  let mut graph = DiGraph::new();
  let mut nodes: HashMap<&ResourceKey, NodeIndex> = HashMap::with_capacity(changes.len());

  for (i, change) in changes.iter().enumerate() {
    nodes.insert(change.key(), graph.add_node(i));
  }

  for change in changes {
    let Some(resource) = side(change) else {
      continue;
    };
    let dependent = nodes[change.key()];
    for dependency in &resource.dependencies {
      if dependency == change.key() {
        continue;
      }
      if let Some(&dep_idx) = nodes.get(dependency) {
        if !graph.contains_edge(dep_idx, dependent) {
          graph.add_edge(dep_idx, dependent, ());
        }
      }
    }
  }
  graph
}

fn verify_acyclic(graph: &DiGraph<usize, ()>, changes: &[Change]) -> Result<(), ExecuteError> {
  if toposort(graph, None).is_ok() {
    return Ok(());
  }
  let mut participants: Vec<ResourceKey> = tarjan_scc(graph)
    .into_iter()
    .filter(|component| component.len() > 1)
    .flatten()
    .map(|idx| changes[graph[idx]].key().clone())
    .collect();
  participants.sort();
  Err(ExecuteError::CycleDetected(participants))
}

fn sorted(graph: &DiGraph<usize, ()>) -> Result<Vec<usize>, ExecuteError> {
  let order = toposort(graph, None).map_err(|_| ExecuteError::CycleDetected(Vec::new()))?;
  Ok(order.into_iter().map(|idx| graph[idx]).collect())
}
