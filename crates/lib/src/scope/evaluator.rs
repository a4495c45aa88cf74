//! Fixpoint evaluation of a configuration tree.
//!
//! Top-level nodes are evaluated in passes. A node whose references cannot be
//! satisfied yet is deferred and retried in the next pass. Each node runs
//! against a private [`Batch`]; only a node that resolves completely commits
//! its resources, so a deferred node leaves no partial state behind.
//!
//! Evaluation ends when every node has committed, when a pass makes no
//! progress, or when the retry budget is spent.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, trace};

use crate::diffable::{Resource, ResourceGraph, ResourceKey, TypeDef, TypeRegistry};
use crate::value::Value;
use crate::workflow::{Stage, Transition, Workflow};

use super::arena::{ScopeArena, ScopeId, ScopeKind};
use super::resolve::{Deferral, Halt, Resolution, ResolveError};
use super::tree::{Expr, Location, Node, Project, StageNode};

/// A template definition, instantiated by naming it as a resource kind.
#[derive(Debug, Clone)]
pub(crate) struct Template {
  pub params: Vec<String>,
  pub body: Vec<Node>,
}

/// The result of evaluating a project: the declared resources and the
/// scopes they were declared in.
///
/// Scopes outlive evaluation because workflow stages evaluate their captured
/// statements later, inside the scopes that declared them.
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
  pub graph: ResourceGraph,
  pub scopes: ScopeArena,
  pub workflows: Vec<Workflow>,
  templates: HashMap<String, Template>,
  retry_budget: usize,
}

impl Evaluation {
  /// Evaluate every file of `project`.
  pub fn evaluate(project: &Project, registry: &TypeRegistry, retry_budget: usize) -> Result<Self, ResolveError> {
    let mut evaluation = Evaluation {
      retry_budget,
      ..Default::default()
    };

    for file in &project.files {
      evaluation.scopes.add_file(&file.path);
    }
    if let Some(global) = &project.global {
      let id = evaluation.scopes.file(global).ok_or_else(|| ResolveError::UnknownImport {
        path: global.clone(),
        location: Location::default(),
      })?;
      evaluation.scopes.set_global(id);
    }

    evaluation.collect_structure(project)?;

    // The global file goes first so its values are available on pass one.
    let mut files: Vec<_> = project.files.iter().collect();
    files.sort_by_key(|f| Some(&f.path) != project.global.as_ref());

    let mut queue = Vec::new();
    for file in files {
      let scope = evaluation.scopes.file(&file.path).unwrap_or(evaluation.scopes.root());
      for node in &file.body {
        if !matches!(node, Node::Import { .. } | Node::Template { .. }) {
          queue.push(Queued::new(node, scope));
        }
      }
    }

    let Evaluation {
      graph,
      scopes,
      workflows,
      templates,
      ..
    } = &mut evaluation;
    let mut evaluator = Evaluator::new(registry, scopes, graph, templates, Some(workflows));
    evaluator.settle(queue, retry_budget)?;

    debug!(
      resources = evaluation.graph.len(),
      workflows = evaluation.workflows.len(),
      "evaluation settled"
    );
    Ok(evaluation)
  }

  /// Imports and templates are structural: they are wired before any value
  /// is evaluated.
  fn collect_structure(&mut self, project: &Project) -> Result<(), ResolveError> {
    for file in &project.files {
      let scope = self.scopes.add_file(&file.path);
      for node in &file.body {
        match node {
          Node::Import { path, alias, location } => {
            let target = self.scopes.file(path).ok_or_else(|| ResolveError::UnknownImport {
              path: path.clone(),
              location: location.clone(),
            })?;
            let alias = alias
              .clone()
              .unwrap_or_else(|| path.rsplit('/').next().unwrap_or(path).to_string());
            self.scopes.add_import(scope, alias, target);
          }
          Node::Template {
            name,
            params,
            body,
            location,
          } => {
            if self.templates.contains_key(name) {
              return Err(ResolveError::Misplaced {
                what: format!("a second definition of template {}", name),
                location: location.clone(),
              });
            }
            self.templates.insert(
              name.clone(),
              Template {
                params: params.clone(),
                body: body.clone(),
              },
            );
          }
          _ => {}
        }
      }
    }
    Ok(())
  }

  /// Resolve an expression against an arbitrary graph.
  pub fn resolve_in(
    &mut self,
    registry: &TypeRegistry,
    expr: &Expr,
    scope: ScopeId,
    graph: &mut ResourceGraph,
  ) -> Resolution<Value> {
    let Evaluation { scopes, templates, .. } = self;
    let mut evaluator = Evaluator::new(registry, scopes, graph, templates, None);
    evaluator.eval_expr(expr, scope, &Batch::default()).into()
  }

  /// Evaluate resource statements inside `scope` and merge the resources
  /// they declare into `target`, replacing any with the same key. Returns
  /// the keys that were declared.
  pub fn evaluate_into(
    &mut self,
    registry: &TypeRegistry,
    nodes: &[Node],
    scope: ScopeId,
    target: &mut ResourceGraph,
  ) -> Result<Vec<ResourceKey>, ResolveError> {
    let queue = nodes.iter().map(|n| Queued::new(n, scope)).collect();
    let budget = self.retry_budget.max(1);
    let Evaluation { scopes, templates, .. } = self;
    let mut evaluator = Evaluator::new(registry, scopes, target, templates, None);
    evaluator.merge = true;
    evaluator.settle(queue, budget)?;
    Ok(evaluator.committed)
  }

  pub fn workflow_for(&self, kind: &str) -> Option<&Workflow> {
    self.workflows.iter().find(|w| w.for_type == kind)
  }
}

/// A top-level node waiting to be evaluated.
pub(crate) struct Queued<'n> {
  node: &'n Node,
  scope: ScopeId,
  deferral: Option<Deferral>,
}

impl<'n> Queued<'n> {
  fn new(node: &'n Node, scope: ScopeId) -> Self {
    Self {
      node,
      scope,
      deferral: None,
    }
  }
}

/// Resources produced by one top-level node, committed together.
#[derive(Debug, Default)]
pub(crate) struct Batch {
  resources: Vec<(Resource, Option<ScopeId>)>,
}

impl Batch {
  pub fn get(&self, key: &ResourceKey) -> Option<&Resource> {
    self.resources.iter().map(|(r, _)| r).find(|r| r.key == *key)
  }

  pub fn in_file(&self, file: ScopeId, key: &ResourceKey) -> Option<&Resource> {
    self
      .resources
      .iter()
      .find(|(r, f)| *f == Some(file) && r.key == *key)
      .map(|(r, _)| r)
  }

  pub fn of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Resource> + 'a {
    self.resources.iter().map(|(r, _)| r).filter(move |r| r.key.kind == kind)
  }

  fn push(&mut self, resource: Resource, file: Option<ScopeId>) {
    self.resources.push((resource, file));
  }
}

pub(crate) struct Evaluator<'e> {
  pub(super) registry: &'e TypeRegistry,
  pub(super) scopes: &'e mut ScopeArena,
  pub(super) graph: &'e mut ResourceGraph,
  pub(super) templates: &'e HashMap<String, Template>,
  workflows: Option<&'e mut Vec<Workflow>>,
  /// Kinds each queued node may still declare, indexed by queue slot.
  pending_kinds: Vec<Option<BTreeSet<String>>>,
  current: Option<usize>,
  /// Keys referenced while building the innermost resource.
  touched: Vec<BTreeSet<ResourceKey>>,
  /// Resources under construction and their scopes.
  pub(super) building: Vec<(ResourceKey, ScopeId)>,
  /// Overwrite resources already in the graph instead of rejecting them.
  merge: bool,
  committed: Vec<ResourceKey>,
}

impl<'e> Evaluator<'e> {
  pub(crate) fn new(
    registry: &'e TypeRegistry,
    scopes: &'e mut ScopeArena,
    graph: &'e mut ResourceGraph,
    templates: &'e HashMap<String, Template>,
    workflows: Option<&'e mut Vec<Workflow>>,
  ) -> Self {
    Self {
      registry,
      scopes,
      graph,
      templates,
      workflows,
      pending_kinds: Vec::new(),
      current: None,
      touched: Vec::new(),
      building: Vec::new(),
      merge: false,
      committed: Vec::new(),
    }
  }

  /// Run passes over `queue` until every node has committed.
  pub(crate) fn settle(&mut self, mut queue: Vec<Queued<'_>>, budget: usize) -> Result<(), ResolveError> {
    let mut passes = 0;
    while !queue.is_empty() {
      if passes >= budget {
        let deferral = first_deferral(&queue);
        return Err(ResolveError::RetryBudgetExhausted {
          passes,
          reference: deferral.reference,
          location: deferral.location,
        });
      }
      passes += 1;

      self.pending_kinds = queue
        .iter()
        .map(|q| Some(declared_kinds(q.node, self.templates, &mut BTreeSet::new())))
        .collect();

      let before = queue.len();
      let mut remaining = Vec::new();
      for (slot, mut queued) in queue.into_iter().enumerate() {
        self.current = Some(slot);
        let mut batch = Batch::default();
        match self.eval_top(queued.node, queued.scope, &mut batch) {
          Ok(()) => {
            self.commit(batch)?;
            self.pending_kinds[slot] = None;
          }
          Err(Halt::Defer(deferral)) => {
            trace!(reference = %deferral.reference, location = %deferral.location, "deferred");
            queued.deferral = Some(deferral);
            remaining.push(queued);
          }
          Err(Halt::Fail(e)) => return Err(e),
        }
      }
      self.current = None;

      if remaining.len() == before {
        let deferral = first_deferral(&remaining);
        return Err(ResolveError::Unresolved {
          reference: deferral.reference,
          location: deferral.location,
        });
      }
      debug!(pass = passes, deferred = remaining.len(), "evaluation pass complete");
      queue = remaining;
    }
    Ok(())
  }

  fn commit(&mut self, batch: Batch) -> Result<(), ResolveError> {
    for (resource, file) in batch.resources {
      let key = resource.key.clone();
      let location = resource.location.clone().unwrap_or_default();
      if self.merge {
        self.graph.upsert(resource);
      } else {
        self
          .graph
          .insert(resource)
          .map_err(|_| ResolveError::DuplicateResource {
            key: key.clone(),
            location,
          })?;
      }
      if let Some(file) = file {
        self.scopes.add_resource(file, key.clone());
      }
      self.committed.push(key);
    }
    Ok(())
  }

  /// True if a queued node other than the one being evaluated may still
  /// declare a resource of `kind`.
  pub(super) fn may_declare(&self, kind: &str) -> bool {
    self
      .pending_kinds
      .iter()
      .enumerate()
      .any(|(slot, kinds)| Some(slot) != self.current && kinds.as_ref().is_some_and(|k| k.contains(kind)))
  }

  pub(super) fn touch(&mut self, key: &ResourceKey) {
    if let Some(set) = self.touched.last_mut() {
      set.insert(key.clone());
    }
  }

  pub(super) fn eval_top(&mut self, node: &Node, scope: ScopeId, batch: &mut Batch) -> Result<(), Halt> {
    match node {
      Node::Pair { key, value, .. } => {
        let value = self.eval_expr(value, scope, batch)?;
        self.scopes.set(scope, key.clone(), value);
        Ok(())
      }
      Node::Resource {
        kind,
        name,
        body,
        location,
      } => self.eval_resource(kind, name, body, location, scope, batch),
      Node::For {
        variables,
        items,
        body,
        location,
      } => {
        for frame in self.for_frames(variables, items, location, scope, batch)? {
          self.eval_block(body, frame, batch)?;
        }
        Ok(())
      }
      Node::If {
        condition,
        body,
        otherwise,
        ..
      } => {
        let (branch, frame) = self.if_branch(condition, body, otherwise, scope, batch)?;
        self.eval_block(branch, frame, batch)
      }
      Node::Workflow {
        name,
        for_type,
        stages,
        location,
      } => self.eval_workflow(name, for_type, stages, location, scope),
      Node::Import { location, .. } | Node::Template { location, .. } => {
        if self.scopes.get(scope).is_file() {
          Ok(())
        } else {
          Err(misplaced("imports and templates", location))
        }
      }
      Node::KeyBlock { key, location, .. } => Err(misplaced(&format!("block '{}'", key), location)),
    }
  }

  /// Statements inside a frame: anything but directives.
  pub(super) fn eval_block(&mut self, nodes: &[Node], scope: ScopeId, batch: &mut Batch) -> Result<(), Halt> {
    for node in nodes {
      match node {
        Node::Import { location, .. } | Node::Template { location, .. } | Node::Workflow { location, .. } => {
          return Err(misplaced("directives", location));
        }
        _ => self.eval_top(node, scope, batch)?,
      }
    }
    Ok(())
  }

  fn eval_resource(
    &mut self,
    kind: &str,
    name: &Expr,
    body: &[Node],
    location: &Location,
    scope: ScopeId,
    batch: &mut Batch,
  ) -> Result<(), Halt> {
    let name = self.eval_expr(name, scope, batch)?;
    let name = resource_name(name, location)?;

    let templates = self.templates;
    if let Some(template) = templates.get(kind) {
      return self.instantiate(kind, template, &name, body, location, scope, batch);
    }

    let registry = self.registry;
    let def = registry.def(kind).ok_or_else(|| ResolveError::UnknownType {
      kind: kind.to_string(),
      location: location.clone(),
    })?;
    if registry.provider(kind).is_none() {
      return Err(misplaced(&format!("{} blocks", kind), location));
    }

    let key = ResourceKey::new(kind, &name);
    let file = self.scopes.file_path(scope).to_string();
    let resource_scope = self.scopes.push(scope, ScopeKind::Resource { key: key.clone() });
    let mut resource = Resource::new(key.clone(), file);
    resource.location = Some(location.clone());

    self.touched.push(BTreeSet::new());
    self.building.push((key.clone(), resource_scope));
    let result = self.eval_resource_body(body, resource_scope, &mut resource, def, batch);
    self.building.pop();
    let touched = self.touched.pop().unwrap_or_default();
    result?;

    resource.dependencies = touched;
    resource.dependencies.extend(resource.linked_keys());
    resource.dependencies.remove(&key);

    if (!self.merge && self.graph.contains(&key)) || batch.get(&key).is_some() {
      return Err(Halt::Fail(ResolveError::DuplicateResource {
        key,
        location: location.clone(),
      }));
    }
    trace!(resource = %key, dependencies = resource.dependencies.len(), "resource resolved");
    batch.push(resource, self.scopes.nearest_file(scope));
    Ok(())
  }

  fn eval_resource_body(
    &mut self,
    nodes: &[Node],
    scope: ScopeId,
    resource: &mut Resource,
    def: &TypeDef,
    batch: &mut Batch,
  ) -> Result<(), Halt> {
    for node in nodes {
      match node {
        Node::Pair { key, value, location } => {
          let field = def.field_def(key).ok_or_else(|| ResolveError::UnknownField {
            kind: def.name.clone(),
            field: key.clone(),
            location: location.clone(),
          })?;
          if field.output || field.is_subresource() {
            return Err(Halt::Fail(ResolveError::TypeMismatch {
              kind: def.name.clone(),
              field: key.clone(),
              expected: if field.output {
                "no value (generated by the provider)".to_string()
              } else {
                format!("{} blocks", field.kind)
              },
              got: "a value".to_string(),
              location: location.clone(),
            }));
          }
          let value = self.eval_expr(value, scope, batch)?;
          let accepted = if value.is_null() {
            field.nullable
          } else {
            field.kind.accepts(&value)
          };
          if !accepted {
            return Err(Halt::Fail(ResolveError::TypeMismatch {
              kind: def.name.clone(),
              field: key.clone(),
              expected: field.kind.to_string(),
              got: value.render(),
              location: location.clone(),
            }));
          }
          resource.fields.insert(key.clone(), value.clone());
          self.scopes.set(scope, key.clone(), value);
        }
        Node::KeyBlock {
          key,
          name,
          body,
          location,
        } => {
          let nested = self.eval_subresource(key, name.as_ref(), body, location, scope, resource, def, batch)?;
          resource.subresources.entry(key.clone()).or_default().push(nested);
        }
        Node::For {
          variables,
          items,
          body,
          location,
        } => {
          for frame in self.for_frames(variables, items, location, scope, batch)? {
            self.eval_resource_body(body, frame, resource, def, batch)?;
          }
        }
        Node::If {
          condition,
          body,
          otherwise,
          ..
        } => {
          let (branch, frame) = self.if_branch(condition, body, otherwise, scope, batch)?;
          self.eval_resource_body(branch, frame, resource, def, batch)?;
        }
        Node::Resource { location, .. } => {
          return Err(Halt::Fail(ResolveError::NestedResource {
            location: location.clone(),
          }));
        }
        Node::Import { location, .. } | Node::Template { location, .. } | Node::Workflow { location, .. } => {
          return Err(misplaced("directives", location));
        }
      }
    }
    Ok(())
  }

  #[allow(clippy::too_many_arguments)]
  fn eval_subresource(
    &mut self,
    field: &str,
    name: Option<&Expr>,
    body: &[Node],
    location: &Location,
    scope: ScopeId,
    parent: &Resource,
    def: &TypeDef,
    batch: &mut Batch,
  ) -> Result<Resource, Halt> {
    let field_def = def.field_def(field).ok_or_else(|| ResolveError::UnknownField {
      kind: def.name.clone(),
      field: field.to_string(),
      location: location.clone(),
    })?;
    let crate::diffable::FieldKind::Subresource { kind, key_field } = &field_def.kind else {
      return Err(Halt::Fail(ResolveError::TypeMismatch {
        kind: def.name.clone(),
        field: field.to_string(),
        expected: field_def.kind.to_string(),
        got: "a block".to_string(),
        location: location.clone(),
      }));
    };
    let registry = self.registry;
    let nested_def = registry.def(kind).ok_or_else(|| ResolveError::UnknownType {
      kind: kind.clone(),
      location: location.clone(),
    })?;

    let frame = self.scopes.push(scope, ScopeKind::Frame);
    let mut nested = Resource::new(ResourceKey::new(kind.as_str(), ""), parent.file.clone());
    nested.location = Some(location.clone());
    self.eval_resource_body(body, frame, &mut nested, nested_def, batch)?;

    let identity = match (name, key_field) {
      (Some(expr), _) => {
        let value = self.eval_expr(expr, scope, batch)?;
        resource_name(value, location)?
      }
      (None, Some(key_field)) => match nested.get(key_field) {
        Value::Null => {
          return Err(Halt::Fail(ResolveError::TypeMismatch {
            kind: kind.clone(),
            field: key_field.clone(),
            expected: "a value identifying the element".to_string(),
            got: "null".to_string(),
            location: location.clone(),
          }));
        }
        value => resource_name(value.clone(), location)?,
      },
      (None, None) => parent.subresources.get(field).map_or(0, Vec::len).to_string(),
    };
    nested.key.name = identity;
    Ok(nested)
  }

  #[allow(clippy::too_many_arguments)]
  fn instantiate(
    &mut self,
    kind: &str,
    template: &Template,
    instance: &str,
    body: &[Node],
    location: &Location,
    scope: ScopeId,
    batch: &mut Batch,
  ) -> Result<(), Halt> {
    let frame = self.scopes.push(scope, ScopeKind::Frame);
    self.scopes.set(frame, "NAME", Value::from(instance));
    for param in &template.params {
      self.scopes.set(frame, param.clone(), Value::Null);
    }
    for node in body {
      match node {
        Node::Pair {
          key,
          value,
          location: at,
        } => {
          if !template.params.contains(key) {
            return Err(Halt::Fail(ResolveError::UnknownParameter {
              template: kind.to_string(),
              param: key.clone(),
              location: at.clone(),
            }));
          }
          let value = self.eval_expr(value, scope, batch)?;
          self.scopes.set(frame, key.clone(), value);
        }
        other => return Err(misplaced("statements other than parameters", other.location())),
      }
    }
    trace!(template = kind, instance, at = %location, "instantiating template");
    self.eval_block(&template.body, frame, batch)
  }

  fn eval_workflow(
    &mut self,
    name: &str,
    for_type: &str,
    stages: &[StageNode],
    location: &Location,
    scope: ScopeId,
  ) -> Result<(), Halt> {
    let workflow_error = |message: String| {
      Halt::Fail(ResolveError::Workflow {
        workflow: name.to_string(),
        message,
        location: location.clone(),
      })
    };
    if self.workflows.is_none() {
      return Err(misplaced("workflows", location));
    }
    if !self.registry.contains(for_type) {
      return Err(Halt::Fail(ResolveError::UnknownType {
        kind: for_type.to_string(),
        location: location.clone(),
      }));
    }
    let Some(first) = stages.first() else {
      return Err(workflow_error("has no stages".to_string()));
    };

    let workflow_scope = self.scopes.push(scope, ScopeKind::Workflow { name: name.to_string() });
    let mut built = Vec::with_capacity(stages.len());
    for stage in stages {
      if built.iter().any(|s: &Stage| s.name == stage.name) {
        return Err(workflow_error(format!("stage '{}' is defined twice", stage.name)));
      }
      let stage_scope = self.scopes.push(
        workflow_scope,
        ScopeKind::Stage {
          name: stage.name.clone(),
        },
      );
      let batch = Batch::default();
      for node in &stage.body {
        match node {
          Node::Pair { key, value, .. } => {
            let value = self.eval_expr(value, stage_scope, &batch)?;
            self.scopes.set(stage_scope, key.clone(), value);
          }
          other => return Err(misplaced("statements other than settings", other.location())),
        }
      }
      let settings = self.scopes.get(stage_scope);
      let confirm_diff = settings.value("confirm-diff").is_none_or(Value::is_truthy);
      let transition_prompt = settings.value("transition-prompt").map(|v| v.to_string());

      built.push(Stage {
        name: stage.name.clone(),
        scope: stage_scope,
        confirm_diff,
        transition_prompt,
        creates: stage.creates.clone(),
        deletes: stage.deletes.clone(),
        swaps: stage.swaps.clone(),
        transitions: stage
          .transitions
          .iter()
          .map(|t| Transition {
            name: t.name.clone(),
            to: t.to.clone(),
            description: t.description.clone(),
          })
          .collect(),
      });
    }

    for stage in &built {
      for transition in &stage.transitions {
        if !built.iter().any(|s| s.name == transition.to) {
          return Err(workflow_error(format!(
            "transition '{}' of stage '{}' targets unknown stage '{}'",
            transition.name, stage.name, transition.to
          )));
        }
      }
    }

    let Some(workflows) = self.workflows.as_deref_mut() else {
      return Err(misplaced("workflows", location));
    };
    if workflows.iter().any(|w| w.name == name) {
      return Err(workflow_error("is defined twice".to_string()));
    }
    workflows.push(Workflow {
      name: name.to_string(),
      for_type: for_type.to_string(),
      scope: workflow_scope,
      first_stage: first.name.clone(),
      stages: built,
      location: location.clone(),
    });
    Ok(())
  }
}

fn misplaced(what: &str, location: &Location) -> Halt {
  Halt::Fail(ResolveError::Misplaced {
    what: what.to_string(),
    location: location.clone(),
  })
}

/// Resource names are strings; integers are accepted and rendered.
pub(super) fn resource_name(value: Value, location: &Location) -> Result<String, Halt> {
  match value {
    Value::String(s) => Ok(s),
    Value::Int(i) => Ok(i.to_string()),
    other => Err(Halt::Fail(ResolveError::InvalidName {
      got: other.render(),
      location: location.clone(),
    })),
  }
}

fn first_deferral(queue: &[Queued<'_>]) -> Deferral {
  queue
    .iter()
    .find_map(|q| q.deferral.clone())
    .unwrap_or_else(|| Deferral {
      reference: "<unknown>".to_string(),
      location: queue.first().map(|q| q.node.location().clone()).unwrap_or_default(),
    })
}

/// Every kind a node may declare, looking through control blocks and
/// template instantiations.
fn declared_kinds(node: &Node, templates: &HashMap<String, Template>, seen: &mut BTreeSet<String>) -> BTreeSet<String> {
  let mut kinds = BTreeSet::new();
  match node {
    Node::Resource { kind, .. } => match templates.get(kind) {
      Some(template) if seen.insert(kind.clone()) => {
        for inner in &template.body {
          kinds.extend(declared_kinds(inner, templates, seen));
        }
      }
      Some(_) => {}
      None => {
        kinds.insert(kind.clone());
      }
    },
    Node::For { body, .. } => {
      for inner in body {
        kinds.extend(declared_kinds(inner, templates, seen));
      }
    }
    Node::If { body, otherwise, .. } => {
      for inner in body.iter().chain(otherwise) {
        kinds.extend(declared_kinds(inner, templates, seen));
      }
    }
    _ => {}
  }
  kinds
}
