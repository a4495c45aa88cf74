//! Workflow stages and transitions.

use crate::scope::{Node, ScopeId, SwapNode, TargetNode};
use crate::ui::{Ui, UiError};

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
  pub name: String,
  pub to: String,
  pub description: String,
}

/// One step of a workflow. Its statements are captured at evaluation time
/// and only evaluated when the stage runs.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
  pub name: String,
  pub scope: ScopeId,
  /// Show the stage's plan and ask before executing it.
  pub confirm_diff: bool,
  pub transition_prompt: Option<String>,
  pub creates: Vec<Node>,
  pub deletes: Vec<TargetNode>,
  pub swaps: Vec<SwapNode>,
  pub transitions: Vec<Transition>,
}

impl Stage {
  /// Pick the next stage.
  ///
  /// No transitions ends the workflow. A single transition is taken without
  /// asking. With several, the operator is asked until they name one.
  pub fn next(&self, ui: &mut dyn Ui) -> Result<Option<&Transition>, UiError> {
    match self.transitions.as_slice() {
      [] => Ok(None),
      [only] => {
        ui.write(&format!("Transitioning to stage {}.", only.to));
        Ok(Some(only))
      }
      options => {
        ui.write("Transitions:");
        for transition in options {
          if transition.description.is_empty() {
            ui.write(&format!("  {}", transition.name));
          } else {
            ui.write(&format!("  {}: {}", transition.name, transition.description));
          }
        }
        let prompt = self.transition_prompt.clone().unwrap_or_else(|| {
          format!(
            "Next transition ({})?",
            options.iter().map(|t| t.name.as_str()).collect::<Vec<_>>().join(", ")
          )
        });
        loop {
          let answer = ui.read_text(&prompt)?;
          let answer = answer.trim();
          if let Some(transition) = options.iter().find(|t| t.name == answer) {
            return Ok(Some(transition));
          }
          ui.write(&format!("'{}' is not a valid transition.", answer));
        }
      }
    }
  }
}
