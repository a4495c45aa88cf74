//! Terminal-backed operator interaction.

use std::io::{self, BufRead, IsTerminal, Write};

use owo_colors::{OwoColorize, Stream};

use cairn_lib::ui::{Ui, UiError};

/// Writes plans and progress to stdout and reads answers from stdin.
///
/// Answers may be piped in. Once stdin is exhausted, further prompts fail
/// instead of silently picking the default.
pub struct ConsoleUi {
  verbose: bool,
}

impl ConsoleUi {
  pub fn new(verbose: bool) -> Self {
    Self { verbose }
  }

  fn ask(&mut self, prompt: &str) -> Result<String, UiError> {
    let mut stderr = io::stderr();
    write!(
      stderr,
      "{} ",
      prompt.if_supports_color(Stream::Stderr, |s| s.bold())
    )?;
    stderr.flush()?;

    let mut input = String::new();
    if io::stdin().lock().read_line(&mut input)? == 0 {
      let hint = if io::stdin().is_terminal() {
        prompt.to_string()
      } else {
        format!("{} (stdin is not interactive; use --yes to skip confirmation)", prompt)
      };
      return Err(UiError::NoAnswer(hint));
    }
    Ok(input.trim().to_string())
  }
}

impl Ui for ConsoleUi {
  fn write(&mut self, message: &str) {
    println!("{}", colorize(message));
  }

  fn read_boolean(&mut self, default: bool, prompt: &str) -> Result<bool, UiError> {
    let choices = if default { "[Y/n]" } else { "[y/N]" };
    let answer = self.ask(&format!("{} {}", prompt, choices))?;
    Ok(match answer.to_ascii_lowercase().as_str() {
      "" => default,
      "y" | "yes" => true,
      _ => false,
    })
  }

  fn read_text(&mut self, prompt: &str) -> Result<String, UiError> {
    self.ask(prompt)
  }

  fn is_verbose(&self) -> bool {
    self.verbose
  }
}

/// Colors plan lines by their change marker.
fn colorize(line: &str) -> String {
  let marker = line.trim_start().chars().next();
  match marker {
    Some('+') => line.if_supports_color(Stream::Stdout, |s| s.green()).to_string(),
    Some('-') => line.if_supports_color(Stream::Stdout, |s| s.red()).to_string(),
    Some('*') => line.if_supports_color(Stream::Stdout, |s| s.yellow()).to_string(),
    Some('~') => line.if_supports_color(Stream::Stdout, |s| s.magenta()).to_string(),
    _ => line.to_string(),
  }
}
