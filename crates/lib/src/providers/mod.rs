//! Built-in providers.
//!
//! The `test::*` family simulates a small cloud so projects can be planned
//! and applied without any vendor account.

mod memory;

use std::sync::Arc;

use crate::diffable::{FieldDef, FieldKind, ReplaceOrder, TypeDef, TypeRegistry};

pub use memory::{MemoryCloud, MemoryProvider};

pub const NETWORK: &str = "test::network";
pub const VM: &str = "test::vm";
pub const DISK: &str = "test::disk";
pub const DATABASE: &str = "test::database";
pub const SERVICE: &str = "test::service";

/// Readiness polls a freshly created `test::service` needs.
const SERVICE_STARTUP_CHECKS: u32 = 2;

/// Register the `test::*` types, all backed by `cloud`.
pub fn register_test_types(registry: &mut TypeRegistry, cloud: &MemoryCloud) {
  registry.register(
    TypeDef::new(NETWORK)
      .field(FieldDef::new("cidr", FieldKind::String).required())
      .field(FieldDef::new("tags", FieldKind::Map).updatable())
      .field(FieldDef::new("id", FieldKind::String).output()),
    Arc::new(cloud.provider(NETWORK).generating("id")),
  );

  registry.register(
    TypeDef::new(VM)
      .field(FieldDef::new("image", FieldKind::String).required())
      .field(FieldDef::new("size", FieldKind::Int).updatable())
      .field(FieldDef::new("network", FieldKind::String).updatable())
      .field(FieldDef::new("tags", FieldKind::Map).updatable())
      .field(
        FieldDef::new(
          "disk",
          FieldKind::Subresource {
            kind: DISK.to_string(),
            key_field: Some("name".to_string()),
          },
        )
        .updatable(),
      )
      .field(FieldDef::new("id", FieldKind::String).output()),
    Arc::new(cloud.provider(VM).generating("id")),
  );
  registry.register_embedded(
    TypeDef::new(DISK)
      .field(FieldDef::new("name", FieldKind::String).required())
      .field(FieldDef::new("size", FieldKind::Int).updatable()),
  );

  registry.register(
    TypeDef::new(DATABASE)
      .field(FieldDef::new("engine", FieldKind::String).required())
      .field(FieldDef::new("size", FieldKind::Int).updatable())
      .field(FieldDef::new("network", FieldKind::String))
      .field(FieldDef::new("arn", FieldKind::String).output())
      .replace_order(ReplaceOrder::DeleteBeforeCreate),
    Arc::new(cloud.provider(DATABASE).generating("arn")),
  );

  registry.register(
    TypeDef::new(SERVICE)
      .field(FieldDef::new("image", FieldKind::String).required())
      .field(FieldDef::new("replicas", FieldKind::Int).updatable())
      .field(FieldDef::new("vm", FieldKind::String))
      .field(FieldDef::new("endpoints", FieldKind::List).updatable()),
    Arc::new(cloud.provider(SERVICE).converging(SERVICE_STARTUP_CHECKS)),
  );
}

/// A registry holding only the `test::*` types.
pub fn test_registry(cloud: &MemoryCloud) -> TypeRegistry {
  let mut registry = TypeRegistry::new();
  register_test_types(&mut registry, cloud);
  registry
}
