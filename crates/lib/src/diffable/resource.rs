//! Resource identity and content.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::scope::Location;
use crate::value::Value;

use super::TypeDef;

/// The primary key of a resource: its type plus identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
  pub kind: String,
  pub name: String,
}

impl ResourceKey {
  pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      kind: kind.into(),
      name: name.into(),
    }
  }
}

impl fmt::Display for ResourceKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.kind, self.name)
  }
}

/// A declared or persisted resource.
///
/// `dependencies` and `dependents` are the two directions of the same edge
/// set; [`super::ResourceGraph`] keeps them consistent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
  #[serde(flatten)]
  pub key: ResourceKey,
  #[serde(default)]
  pub fields: BTreeMap<String, Value>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub subresources: BTreeMap<String, Vec<Resource>>,
  /// Source file that declared this resource. Decides which state blob it
  /// persists to.
  #[serde(default)]
  pub file: String,
  #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
  pub dependencies: BTreeSet<ResourceKey>,
  #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
  pub dependents: BTreeSet<ResourceKey>,
  #[serde(skip)]
  pub location: Option<Location>,
}

impl Resource {
  pub fn new(key: ResourceKey, file: impl Into<String>) -> Self {
    Self {
      key,
      fields: BTreeMap::new(),
      subresources: BTreeMap::new(),
      file: file.into(),
      dependencies: BTreeSet::new(),
      dependents: BTreeSet::new(),
      location: None,
    }
  }

  pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
    self.fields.insert(name.into(), value.into());
    self
  }

  pub fn kind(&self) -> &str {
    &self.key.kind
  }

  pub fn name(&self) -> &str {
    &self.key.name
  }

  /// Field value, with a missing field reading as null.
  pub fn get(&self, field: &str) -> &Value {
    static NULL: Value = Value::Null;
    self.fields.get(field).unwrap_or(&NULL)
  }

  /// Names of fields set from configuration, skipping provider outputs.
  pub fn configured_fields<'a>(&'a self, def: &'a TypeDef) -> impl Iterator<Item = &'a String> + 'a {
    self
      .fields
      .keys()
      .filter(move |name| def.field_def(name).is_none_or(|f| !f.output))
  }

  /// Every resource this one links to from its field values, nested ones
  /// included.
  pub fn linked_keys(&self) -> BTreeSet<ResourceKey> {
    let mut links = Vec::new();
    for value in self.fields.values() {
      value.collect_links(&mut links);
    }
    let mut keys: BTreeSet<ResourceKey> = links.into_iter().cloned().collect();
    for nested in self.subresources.values().flatten() {
      keys.extend(nested.linked_keys());
    }
    keys.remove(&self.key);
    keys
  }

  /// Field values as a map, for seeding `CURRENT`/`PENDING` in workflow
  /// scopes.
  pub fn to_value(&self) -> Value {
    let mut map = self.fields.clone();
    map.insert("name".to_string(), Value::from(self.name()));
    Value::Map(map)
  }
}
