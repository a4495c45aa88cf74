//! Diffing a pending graph against the current one.

mod change;
mod engine;
mod render;

pub use change::{Change, ChangeKind};
pub use engine::{DiffError, diff};
pub use render::write_plan;
