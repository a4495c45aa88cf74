//! Operator interaction.
//!
//! The engine never touches stdin or stdout directly. Plans, progress and
//! prompts go through a [`Ui`], which the CLI backs with the terminal and
//! tests back with a [`ScriptedUi`].

use std::collections::VecDeque;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UiError {
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("no answer available for prompt: {0}")]
  NoAnswer(String),
}

pub trait Ui {
  fn write(&mut self, message: &str);

  fn read_boolean(&mut self, default: bool, prompt: &str) -> Result<bool, UiError>;

  fn read_text(&mut self, prompt: &str) -> Result<String, UiError>;

  fn is_verbose(&self) -> bool {
    false
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
  Yes,
  No,
  Text(String),
}

/// A [`Ui`] that replays queued answers and records everything written.
#[derive(Debug, Default)]
pub struct ScriptedUi {
  answers: VecDeque<Answer>,
  output: String,
  prompts: Vec<String>,
  verbose: bool,
}

impl ScriptedUi {
  pub fn new(answers: impl IntoIterator<Item = Answer>) -> Self {
    Self {
      answers: answers.into_iter().collect(),
      ..Default::default()
    }
  }

  pub fn verbose(mut self) -> Self {
    self.verbose = true;
    self
  }

  pub fn output(&self) -> &str {
    &self.output
  }

  pub fn prompts(&self) -> &[String] {
    &self.prompts
  }

  pub fn remaining(&self) -> usize {
    self.answers.len()
  }
}

impl Ui for ScriptedUi {
  fn write(&mut self, message: &str) {
    self.output.push_str(message);
    self.output.push('\n');
  }

  fn read_boolean(&mut self, _default: bool, prompt: &str) -> Result<bool, UiError> {
    self.prompts.push(prompt.to_string());
    match self.answers.pop_front() {
      Some(Answer::Yes) => Ok(true),
      Some(Answer::No) => Ok(false),
      Some(Answer::Text(text)) => Ok(matches!(text.trim().to_lowercase().as_str(), "y" | "yes")),
      None => Err(UiError::NoAnswer(prompt.to_string())),
    }
  }

  fn read_text(&mut self, prompt: &str) -> Result<String, UiError> {
    self.prompts.push(prompt.to_string());
    match self.answers.pop_front() {
      Some(Answer::Text(text)) => Ok(text),
      Some(Answer::Yes) => Ok("yes".to_string()),
      Some(Answer::No) => Ok("no".to_string()),
      None => Err(UiError::NoAnswer(prompt.to_string())),
    }
  }

  fn is_verbose(&self) -> bool {
    self.verbose
  }
}
