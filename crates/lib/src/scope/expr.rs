//! Expression evaluation and reference resolution.

use std::collections::BTreeMap;

use crate::diffable::{Resource, ResourceKey};
use crate::value::{Link, Value};

use super::arena::ScopeId;
use super::evaluator::{Batch, Evaluator, resource_name};
use super::resolve::{Deferral, Halt, ResolveError};
use super::tree::{CompareOp, Expr, Location};

fn defer(reference: impl Into<String>, location: &Location) -> Halt {
  Halt::Defer(Deferral {
    reference: reference.into(),
    location: location.clone(),
  })
}

impl Evaluator<'_> {
  pub(crate) fn eval_expr(&mut self, expr: &Expr, scope: ScopeId, batch: &Batch) -> Result<Value, Halt> {
    match expr {
      Expr::Literal { value } => Ok(value.clone()),
      Expr::List { items } => {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
          out.push(self.eval_expr(item, scope, batch)?);
        }
        Ok(Value::List(out))
      }
      Expr::Map { entries } => {
        let mut out = BTreeMap::new();
        for (key, value) in entries {
          out.insert(key.clone(), self.eval_expr(value, scope, batch)?);
        }
        Ok(Value::Map(out))
      }
      Expr::Interpolate { parts } => {
        let mut out = String::new();
        for part in parts {
          let value = self.eval_expr(part, scope, batch)?;
          match value {
            Value::Null => {}
            Value::Link(link) => {
              return Err(Halt::Fail(ResolveError::LateBoundInterpolation {
                reference: link.to_string(),
                location: expr_location(part),
              }));
            }
            other if other.is_late_bound() => {
              return Err(Halt::Fail(ResolveError::LateBoundInterpolation {
                reference: other.render(),
                location: expr_location(part),
              }));
            }
            other => out.push_str(&other.to_string()),
          }
        }
        Ok(Value::String(out))
      }
      Expr::Compare { left, op, right } => {
        let left = self.eval_expr(left, scope, batch)?;
        let right = self.eval_expr(right, scope, batch)?;
        Ok(Value::Bool(match op {
          CompareOp::Eq => left == right,
          CompareOp::Ne => left != right,
        }))
      }
      Expr::Reference {
        path,
        name: None,
        attribute,
        location,
      } => {
        let value = self.lookup_variable(path, scope).ok_or_else(|| defer(path.as_str(), location))?;
        self.select_attribute(value, attribute.as_deref(), location)
      }
      Expr::Reference {
        path,
        name: Some(name),
        attribute,
        location,
      } => {
        let name = self.eval_expr(name, scope, batch)?;
        let name = resource_name(name, location)?;
        self.resolve_resource(path, &name, attribute.as_deref(), location, scope, batch)
      }
    }
  }

  /// Follow leading path segments that name imports, starting from the
  /// nearest file scope. Returns the scope reached, the unmatched remainder
  /// and whether any segment matched.
  fn descend_imports<'p>(&self, path: &'p str, scope: ScopeId) -> (ScopeId, &'p str, bool) {
    let mut current = self.scopes.nearest_file(scope).unwrap_or(self.scopes.root());
    let mut rest = path;
    let mut qualified = false;
    while let Some((head, tail)) = rest.split_once('.') {
      match self.scopes.get(current).import(head) {
        Some(next) => {
          current = next;
          rest = tail;
          qualified = true;
        }
        None => break,
      }
    }
    (current, rest, qualified)
  }

  fn lookup_variable(&self, path: &str, scope: ScopeId) -> Option<Value> {
    let (target, rest, qualified) = self.descend_imports(path, scope);
    let direct = if qualified {
      self.scopes.get(target).value(rest)
    } else {
      self.scopes.lookup(scope, rest)
    };
    if let Some(value) = direct {
      return Some(value.clone());
    }

    // `config.region` reads into a map-valued variable.
    let (head, tail) = rest.split_once('.')?;
    let root = if qualified {
      self.scopes.get(target).value(head)
    } else {
      self.scopes.lookup(scope, head)
    }?;
    tail
      .split('.')
      .try_fold(root, |value, segment| value.as_map().and_then(|m| m.get(segment)))
      .cloned()
  }

  fn select_attribute(&self, value: Value, attribute: Option<&str>, location: &Location) -> Result<Value, Halt> {
    let Some(attribute) = attribute else {
      return Ok(value);
    };
    match value {
      Value::Map(map) => Ok(map.get(attribute).cloned().unwrap_or_default()),
      Value::Link(Link { target, attribute: None }) => {
        match self.graph.get(&target) {
          Some(resource) => self.attribute_of(resource, attribute, location),
          None => Ok(Value::Link(Link {
            target,
            attribute: Some(attribute.to_string()),
          })),
        }
      }
      _ => Ok(Value::Null),
    }
  }

  /// Value of `attribute` on `resource`, or a late-bound link when the field
  /// is generated and not known yet.
  fn attribute_of(&self, resource: &Resource, attribute: &str, location: &Location) -> Result<Value, Halt> {
    let value = resource.get(attribute);
    if !value.is_null() {
      return Ok(value.clone());
    }
    let def = self.registry.def(resource.kind());
    match def.and_then(|d| d.field_def(attribute)) {
      Some(field) if field.output => Ok(Value::Link(Link {
        target: resource.key.clone(),
        attribute: Some(attribute.to_string()),
      })),
      Some(_) => Ok(Value::Null),
      None if attribute == "name" => Ok(Value::from(resource.name())),
      None => Err(Halt::Fail(ResolveError::UnknownField {
        kind: resource.kind().to_string(),
        field: attribute.to_string(),
        location: location.clone(),
      })),
    }
  }

  fn resolve_resource(
    &mut self,
    path: &str,
    name: &str,
    attribute: Option<&str>,
    location: &Location,
    scope: ScopeId,
    batch: &Batch,
  ) -> Result<Value, Halt> {
    let (file, kind, qualified) = self.descend_imports(path, scope);

    if let Some(prefix) = name.strip_suffix('*') {
      return self.resolve_wildcard(kind, prefix, attribute, location, batch);
    }

    let key = ResourceKey::new(kind, name);

    // A resource referring to itself reads its own scope and adds no edge.
    if let Some((_, own_scope)) = self.building.iter().rev().find(|(k, _)| *k == key) {
      return match attribute {
        None => Ok(Value::Link(Link { target: key, attribute: None })),
        Some(attribute) => self
          .scopes
          .get(*own_scope)
          .value(attribute)
          .cloned()
          .ok_or_else(|| defer(format!("{} | {}", key, attribute), location)),
      };
    }

    let found = if qualified {
      self.find_in_file(file, &key, batch)
    } else {
      self.find_resource(scope, &key, batch)
    };
    let Some(resource) = found else {
      return Err(defer(key.to_string(), location));
    };

    let value = match attribute {
      None => Ok(Value::Link(Link {
        target: key.clone(),
        attribute: None,
      })),
      Some(attribute) => self.attribute_of(resource, attribute, location),
    }?;
    self.touch(&key);
    Ok(value)
  }

  /// Every resource of `kind` whose name starts with `prefix`, as a list.
  ///
  /// Defers while another queued node may still declare such a resource, so
  /// the list is complete once it resolves.
  fn resolve_wildcard(
    &mut self,
    kind: &str,
    prefix: &str,
    attribute: Option<&str>,
    location: &Location,
    batch: &Batch,
  ) -> Result<Value, Halt> {
    if self.may_declare(kind) {
      return Err(defer(format!("{} {}*", kind, prefix), location));
    }

    let mut matches: Vec<&Resource> = self
      .graph
      .of_kind(kind)
      .chain(batch.of_kind(kind))
      .filter(|r| r.name().starts_with(prefix))
      .collect();
    matches.sort_by(|a, b| a.name().cmp(b.name()));

    let mut values = Vec::with_capacity(matches.len());
    let mut keys = Vec::with_capacity(matches.len());
    for resource in matches {
      values.push(match attribute {
        None => Value::Link(Link {
          target: resource.key.clone(),
          attribute: None,
        }),
        Some(attribute) => self.attribute_of(resource, attribute, location)?,
      });
      keys.push(resource.key.clone());
    }
    for key in &keys {
      self.touch(key);
    }
    Ok(Value::List(values))
  }

  /// Walk outward from `scope`: each file scope checks its own table, then
  /// the global file's. The root sees every committed resource.
  fn find_resource<'b>(&'b self, scope: ScopeId, key: &ResourceKey, batch: &'b Batch) -> Option<&'b Resource> {
    for id in self.scopes.ancestors(scope) {
      let current = self.scopes.get(id);
      if current.is_file() {
        if let Some(found) = self.find_in_file(id, key, batch) {
          return Some(found);
        }
        if let Some(global) = self.scopes.global().filter(|g| *g != id) {
          if let Some(found) = self.find_in_file(global, key, batch) {
            return Some(found);
          }
        }
      } else if current.parent.is_none() {
        return self.graph.get(key).or_else(|| batch.get(key));
      }
    }
    None
  }

  fn find_in_file<'b>(&'b self, file: ScopeId, key: &ResourceKey, batch: &'b Batch) -> Option<&'b Resource> {
    if self.scopes.get(file).resources().contains(key) {
      return self.graph.get(key);
    }
    batch.in_file(file, key)
  }
}

fn expr_location(expr: &Expr) -> Location {
  match expr {
    Expr::Reference { location, .. } => location.clone(),
    _ => Location::default(),
  }
}
