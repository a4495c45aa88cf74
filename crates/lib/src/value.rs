//! Resolved configuration values.
//!
//! Every field of a resource, every scope variable and every element of a
//! list or map resolves to a [`Value`]. References to other resources
//! resolve to a [`Value::Link`], which keeps the target identity so the
//! dependency survives serialization.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::diffable::ResourceKey;

/// A resolved reference to a resource, optionally narrowed to one attribute.
///
/// A link with an attribute is late-bound while the attribute is unknown
/// (typically a provider-generated field of a resource that has not been
/// created yet). It is settled against the graph right before the hook
/// that consumes it runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Link {
  pub target: ResourceKey,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub attribute: Option<String>,
}

impl fmt::Display for Link {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.attribute {
      Some(attribute) => write!(f, "$({} | {})", self.target, attribute),
      None => write!(f, "$({})", self.target),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LinkEnvelope {
  #[serde(rename = "$link")]
  link: Link,
}

/// A configuration value.
///
/// Serialized untagged so persisted state reads like plain JSON; links are
/// wrapped in a `{"$link": ...}` envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
  #[default]
  Null,
  Bool(bool),
  Int(i64),
  Float(f64),
  String(String),
  List(Vec<Value>),
  #[serde(with = "link_envelope")]
  Link(Link),
  Map(BTreeMap<String, Value>),
}

mod link_envelope {
  use serde::{Deserialize, Deserializer, Serialize, Serializer};

  use super::{Link, LinkEnvelope};

  pub fn serialize<S: Serializer>(link: &Link, serializer: S) -> Result<S::Ok, S::Error> {
    LinkEnvelope { link: link.clone() }.serialize(serializer)
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Link, D::Error> {
    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Envelope {
      #[serde(rename = "$link")]
      link: Link,
    }

    Envelope::deserialize(deserializer).map(|e| e.link)
  }
}

impl PartialEq for Value {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (Value::Null, Value::Null) => true,
      (Value::Bool(a), Value::Bool(b)) => a == b,
      (Value::Int(a), Value::Int(b)) => a == b,
      (Value::Float(a), Value::Float(b)) => a == b,
      (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => (*a as f64) == *b,
      (Value::String(a), Value::String(b)) => a == b,
      (Value::List(a), Value::List(b)) => a == b,
      (Value::Map(a), Value::Map(b)) => a == b,
      (Value::Link(a), Value::Link(b)) => a == b,
      _ => false,
    }
  }
}

impl Value {
  pub fn is_null(&self) -> bool {
    matches!(self, Value::Null)
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::String(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_int(&self) -> Option<i64> {
    match self {
      Value::Int(i) => Some(*i),
      _ => None,
    }
  }

  pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
    match self {
      Value::Map(m) => Some(m),
      _ => None,
    }
  }

  /// Truthiness used by `if` blocks.
  pub fn is_truthy(&self) -> bool {
    match self {
      Value::Null => false,
      Value::Bool(b) => *b,
      Value::Int(i) => *i != 0,
      Value::Float(f) => *f != 0.0,
      Value::String(s) => !s.is_empty(),
      Value::List(l) => !l.is_empty(),
      Value::Map(m) => !m.is_empty(),
      Value::Link(_) => true,
    }
  }

  /// Returns true if this value (or anything nested in it) is a link whose
  /// attribute is still unknown.
  pub fn is_late_bound(&self) -> bool {
    match self {
      Value::Link(link) => link.attribute.is_some(),
      Value::List(items) => items.iter().any(Value::is_late_bound),
      Value::Map(map) => map.values().any(Value::is_late_bound),
      _ => false,
    }
  }

  /// Collect the targets of every link in this value.
  pub fn collect_links<'a>(&'a self, out: &mut Vec<&'a ResourceKey>) {
    match self {
      Value::Link(link) => out.push(&link.target),
      Value::List(items) => items.iter().for_each(|v| v.collect_links(out)),
      Value::Map(map) => map.values().for_each(|v| v.collect_links(out)),
      _ => {}
    }
  }

  /// Rewrite every link in place.
  pub fn visit_links_mut(&mut self, f: &mut dyn FnMut(&mut Value)) {
    match self {
      Value::Link(_) => f(self),
      Value::List(items) => items.iter_mut().for_each(|v| v.visit_links_mut(f)),
      Value::Map(map) => map.values_mut().for_each(|v| v.visit_links_mut(f)),
      _ => {}
    }
  }

  /// Plan-style rendering: strings quoted, collections bracketed.
  pub fn render(&self) -> String {
    match self {
      Value::String(s) => format!("'{}'", s),
      Value::List(items) => format!("[ {} ]", items.iter().map(Value::render).collect::<Vec<_>>().join(", ")),
      Value::Map(map) => format!(
        "{{ {} }}",
        map
          .iter()
          .map(|(k, v)| format!("{}: {}", k, v.render()))
          .collect::<Vec<_>>()
          .join(", ")
      ),
      other => other.to_string(),
    }
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Null => write!(f, "null"),
      Value::Bool(b) => write!(f, "{}", b),
      Value::Int(i) => write!(f, "{}", i),
      Value::Float(x) => write!(f, "{}", x),
      Value::String(s) => write!(f, "{}", s),
      Value::Link(link) => write!(f, "{}", link),
      Value::List(_) | Value::Map(_) => write!(f, "{}", self.render()),
    }
  }
}

impl From<&str> for Value {
  fn from(s: &str) -> Self {
    Value::String(s.to_string())
  }
}

impl From<String> for Value {
  fn from(s: String) -> Self {
    Value::String(s)
  }
}

impl From<i64> for Value {
  fn from(i: i64) -> Self {
    Value::Int(i)
  }
}

impl From<i32> for Value {
  fn from(i: i32) -> Self {
    Value::Int(i64::from(i))
  }
}

impl From<bool> for Value {
  fn from(b: bool) -> Self {
    Value::Bool(b)
  }
}

impl From<Link> for Value {
  fn from(link: Link) -> Self {
    Value::Link(link)
  }
}
