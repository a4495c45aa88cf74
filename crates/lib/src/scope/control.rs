//! `for` and `if` frames.
//!
//! Each iteration or taken branch gets a fresh frame scope, a child of the
//! scope the block appears in. The body is evaluated anew in every frame, so
//! resources and values declared inside never alias between iterations.

use crate::value::Value;

use super::arena::{ScopeId, ScopeKind};
use super::evaluator::{Batch, Evaluator};
use super::resolve::{Halt, ResolveError};
use super::tree::{Expr, Location, Node};

impl Evaluator<'_> {
  /// Evaluate `items` and build one frame per iteration with the loop
  /// variables bound.
  ///
  /// A list is consumed in chunks of `variables.len()` and must divide
  /// evenly. A map binds its key, and its value when two variables are given.
  pub(super) fn for_frames(
    &mut self,
    variables: &[String],
    items: &Expr,
    location: &Location,
    scope: ScopeId,
    batch: &Batch,
  ) -> Result<Vec<ScopeId>, Halt> {
    let items = self.eval_expr(items, scope, batch)?;
    let arity = variables.len();

    let bindings: Vec<Vec<Value>> = match items {
      Value::List(list) => {
        if arity == 0 || list.len() % arity != 0 {
          return Err(Halt::Fail(ResolveError::LoopArity {
            variables: arity,
            count: list.len(),
            location: location.clone(),
          }));
        }
        list.chunks(arity).map(<[Value]>::to_vec).collect()
      }
      Value::Map(map) => {
        if arity == 0 || arity > 2 {
          return Err(Halt::Fail(ResolveError::LoopArity {
            variables: arity,
            count: map.len(),
            location: location.clone(),
          }));
        }
        map
          .into_iter()
          .map(|(k, v)| if arity == 1 { vec![Value::String(k)] } else { vec![Value::String(k), v] })
          .collect()
      }
      other => {
        return Err(Halt::Fail(ResolveError::NotIterable {
          got: other.render(),
          location: location.clone(),
        }));
      }
    };

    let mut frames = Vec::with_capacity(bindings.len());
    for values in bindings {
      let frame = self.scopes.push(scope, ScopeKind::Frame);
      for (name, value) in variables.iter().zip(values) {
        self.scopes.set(frame, name.clone(), value);
      }
      frames.push(frame);
    }
    Ok(frames)
  }

  /// Pick the branch of an `if` block and open a frame for it.
  pub(super) fn if_branch<'n>(
    &mut self,
    condition: &Expr,
    body: &'n [Node],
    otherwise: &'n [Node],
    scope: ScopeId,
    batch: &Batch,
  ) -> Result<(&'n [Node], ScopeId), Halt> {
    let taken = self.eval_expr(condition, scope, batch)?.is_truthy();
    let frame = self.scopes.push(scope, ScopeKind::Frame);
    Ok((if taken { body } else { otherwise }, frame))
  }
}
