//! Per-type field tables and the type registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::value::Value;

use super::Provider;

/// The kind of value a field holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
  String,
  Int,
  Float,
  Bool,
  List,
  Map,
  /// Accepts any value, including links to other resources.
  Any,
  /// A nested resource list. Elements are diffed recursively as their own
  /// type, matched by `key_field` when set and by position otherwise.
  Subresource { kind: String, key_field: Option<String> },
}

impl FieldKind {
  /// Returns true if `value` can be stored in a field of this kind.
  ///
  /// Links are accepted everywhere since their value is only known once the
  /// target exists.
  pub fn accepts(&self, value: &Value) -> bool {
    match (self, value) {
      (_, Value::Link(_)) => true,
      (FieldKind::Any, _) => true,
      (FieldKind::String, Value::String(_)) => true,
      (FieldKind::Int, Value::Int(_)) => true,
      (FieldKind::Float, Value::Float(_) | Value::Int(_)) => true,
      (FieldKind::Bool, Value::Bool(_)) => true,
      (FieldKind::List, Value::List(_)) => true,
      (FieldKind::Map, Value::Map(_)) => true,
      _ => false,
    }
  }
}

impl fmt::Display for FieldKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FieldKind::String => write!(f, "string"),
      FieldKind::Int => write!(f, "int"),
      FieldKind::Float => write!(f, "float"),
      FieldKind::Bool => write!(f, "bool"),
      FieldKind::List => write!(f, "list"),
      FieldKind::Map => write!(f, "map"),
      FieldKind::Any => write!(f, "any"),
      FieldKind::Subresource { kind, .. } => write!(f, "{}", kind),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
  pub name: String,
  pub kind: FieldKind,
  pub updatable: bool,
  pub nullable: bool,
  /// Generated by the provider. Never compared, never configured.
  pub output: bool,
}

impl FieldDef {
  pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
    Self {
      name: name.into(),
      kind,
      updatable: false,
      nullable: true,
      output: false,
    }
  }

  pub fn updatable(mut self) -> Self {
    self.updatable = true;
    self
  }

  pub fn required(mut self) -> Self {
    self.nullable = false;
    self
  }

  pub fn output(mut self) -> Self {
    self.output = true;
    self
  }

  pub fn is_subresource(&self) -> bool {
    matches!(self.kind, FieldKind::Subresource { .. })
  }
}

/// How a resource is replaced when a non-updatable field changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplaceOrder {
  /// Create the new object first and retire the old one in the delete pass.
  #[default]
  CreateBeforeDelete,
  /// Delete the old object, then create the new one. For types whose
  /// identity cannot exist twice.
  DeleteBeforeCreate,
}

/// The field table of a resource type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDef {
  pub name: String,
  pub fields: Vec<FieldDef>,
  pub replace_order: ReplaceOrder,
}

impl TypeDef {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      fields: Vec::new(),
      replace_order: ReplaceOrder::default(),
    }
  }

  pub fn field(mut self, field: FieldDef) -> Self {
    self.fields.push(field);
    self
  }

  pub fn replace_order(mut self, order: ReplaceOrder) -> Self {
    self.replace_order = order;
    self
  }

  pub fn field_def(&self, name: &str) -> Option<&FieldDef> {
    self.fields.iter().find(|f| f.name == name)
  }

  pub fn subresource_fields(&self) -> impl Iterator<Item = &FieldDef> {
    self.fields.iter().filter(|f| f.is_subresource())
  }

  pub fn output_fields(&self) -> impl Iterator<Item = &FieldDef> {
    self.fields.iter().filter(|f| f.output)
  }
}

/// A registered type: its field table and, for top-level types, the
/// provider that owns its lifecycle.
#[derive(Clone)]
pub struct RegisteredType {
  pub def: TypeDef,
  pub provider: Option<Arc<dyn Provider>>,
}

impl fmt::Debug for RegisteredType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RegisteredType")
      .field("def", &self.def)
      .field("provider", &self.provider.is_some())
      .finish()
  }
}

/// Maps type names to field tables and providers.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
  types: HashMap<String, RegisteredType>,
}

impl TypeRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a top-level resource type.
  pub fn register(&mut self, def: TypeDef, provider: Arc<dyn Provider>) {
    self.types.insert(
      def.name.clone(),
      RegisteredType {
        def,
        provider: Some(provider),
      },
    );
  }

  /// Register a type that only ever appears nested inside another resource.
  pub fn register_embedded(&mut self, def: TypeDef) {
    self.types.insert(def.name.clone(), RegisteredType { def, provider: None });
  }

  pub fn get(&self, kind: &str) -> Option<&RegisteredType> {
    self.types.get(kind)
  }

  pub fn def(&self, kind: &str) -> Option<&TypeDef> {
    self.types.get(kind).map(|t| &t.def)
  }

  pub fn provider(&self, kind: &str) -> Option<&Arc<dyn Provider>> {
    self.types.get(kind).and_then(|t| t.provider.as_ref())
  }

  pub fn contains(&self, kind: &str) -> bool {
    self.types.contains_key(kind)
  }
}
