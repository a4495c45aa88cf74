//! The resource model: identities, field tables, providers and the graph
//! that holds them.

mod graph;
mod provider;
mod resource;
mod types;

pub use graph::{GraphError, ResourceGraph, ResourceId};
pub use provider::{Provider, ProviderError};
pub use resource::{Resource, ResourceKey};
pub use types::{FieldDef, FieldKind, RegisteredType, ReplaceOrder, TypeDef, TypeRegistry};
