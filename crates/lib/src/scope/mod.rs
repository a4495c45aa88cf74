//! Scopes, references and deferred evaluation of the configuration tree.
//!
//! [`Evaluation::evaluate`] turns a parsed [`Project`] into a
//! [`ResourceGraph`](crate::diffable::ResourceGraph). References between
//! resources, across imported files and into a global file resolve in any
//! declaration order; a reference that can never resolve is an error
//! naming its location.

mod arena;
mod control;
mod evaluator;
mod expr;
mod resolve;
mod tree;

pub use arena::{Scope, ScopeArena, ScopeId, ScopeKind};
pub use evaluator::Evaluation;
pub use resolve::{Deferral, Resolution, ResolveError};
pub use tree::{
  CompareOp, Expr, Location, Node, Project, SourceFile, StageNode, SwapNode, TargetNode, TransitionNode,
};
