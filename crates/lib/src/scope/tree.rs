//! The parsed configuration tree.
//!
//! A [`Project`] is the output of a front-end parser, serialized as JSON. The
//! evaluator walks it; nothing here is resolved yet.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Source position of a node, carried into errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
  #[serde(default)]
  pub file: String,
  #[serde(default)]
  pub line: u32,
  #[serde(default)]
  pub column: u32,
}

impl fmt::Display for Location {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}:{}", self.file, self.line, self.column)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
  pub files: Vec<SourceFile>,
  /// Path of the file whose scope every other file falls back to.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub global: Option<String>,
}

impl Project {
  pub fn file(&self, path: &str) -> Option<&SourceFile> {
    self.files.iter().find(|f| f.path == path)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceFile {
  pub path: String,
  #[serde(default)]
  pub body: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Node {
  /// `key: value`
  Pair {
    key: String,
    value: Expr,
    #[serde(default)]
    location: Location,
  },
  /// `kind name ... end`. `kind` may also name a template.
  Resource {
    kind: String,
    name: Expr,
    #[serde(default)]
    body: Vec<Node>,
    #[serde(default)]
    location: Location,
  },
  /// A keyed block inside a resource, e.g. a subresource element.
  KeyBlock {
    key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<Expr>,
    #[serde(default)]
    body: Vec<Node>,
    #[serde(default)]
    location: Location,
  },
  /// `@for a, b in items`. A list is consumed in chunks of
  /// `variables.len()`; a map binds key and value.
  For {
    variables: Vec<String>,
    items: Expr,
    #[serde(default)]
    body: Vec<Node>,
    #[serde(default)]
    location: Location,
  },
  If {
    condition: Expr,
    #[serde(default)]
    body: Vec<Node>,
    #[serde(default)]
    otherwise: Vec<Node>,
    #[serde(default)]
    location: Location,
  },
  /// `@import path as alias`
  Import {
    path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    alias: Option<String>,
    #[serde(default)]
    location: Location,
  },
  /// A reusable block instantiated by naming it as a resource kind.
  Template {
    name: String,
    #[serde(default)]
    params: Vec<String>,
    #[serde(default)]
    body: Vec<Node>,
    #[serde(default)]
    location: Location,
  },
  Workflow {
    name: String,
    for_type: String,
    #[serde(default)]
    stages: Vec<StageNode>,
    #[serde(default)]
    location: Location,
  },
}

impl Node {
  pub fn location(&self) -> &Location {
    match self {
      Node::Pair { location, .. }
      | Node::Resource { location, .. }
      | Node::KeyBlock { location, .. }
      | Node::For { location, .. }
      | Node::If { location, .. }
      | Node::Import { location, .. }
      | Node::Template { location, .. }
      | Node::Workflow { location, .. } => location,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageNode {
  pub name: String,
  /// Settings such as `confirm-diff` and `transition-prompt`.
  #[serde(default)]
  pub body: Vec<Node>,
  /// Resource statements merged into the pending graph when the stage runs.
  #[serde(default)]
  pub creates: Vec<Node>,
  #[serde(default)]
  pub deletes: Vec<TargetNode>,
  #[serde(default)]
  pub swaps: Vec<SwapNode>,
  #[serde(default)]
  pub transitions: Vec<TransitionNode>,
  #[serde(default)]
  pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetNode {
  pub kind: String,
  pub name: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapNode {
  pub kind: String,
  pub x: Expr,
  pub y: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionNode {
  pub name: String,
  pub to: String,
  #[serde(default)]
  pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
  Eq,
  Ne,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "expr", rename_all = "snake_case")]
pub enum Expr {
  Literal {
    value: Value,
  },
  List {
    items: Vec<Expr>,
  },
  Map {
    entries: BTreeMap<String, Expr>,
  },
  /// `$(path)`, `$(kind name)` or `$(kind name | attribute)`.
  ///
  /// `path` is dotted: leading segments that match import aliases select the
  /// imported file's scope. A `name` ending in `*` matches every resource of
  /// the kind with that prefix.
  Reference {
    path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<Box<Expr>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attribute: Option<String>,
    #[serde(default)]
    location: Location,
  },
  /// String interpolation: parts are rendered and concatenated.
  Interpolate {
    parts: Vec<Expr>,
  },
  Compare {
    left: Box<Expr>,
    op: CompareOp,
    right: Box<Expr>,
  },
}

impl Expr {
  pub fn literal(value: impl Into<Value>) -> Self {
    Expr::Literal { value: value.into() }
  }

  pub fn var(path: impl Into<String>) -> Self {
    Expr::Reference {
      path: path.into(),
      name: None,
      attribute: None,
      location: Location::default(),
    }
  }

  pub fn resource(kind: impl Into<String>, name: impl Into<String>, attribute: Option<&str>) -> Self {
    Expr::Reference {
      path: kind.into(),
      name: Some(Box::new(Expr::literal(Value::String(name.into())))),
      attribute: attribute.map(str::to_string),
      location: Location::default(),
    }
  }
}
