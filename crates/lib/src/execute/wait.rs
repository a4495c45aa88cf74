//! Polling resources that have not converged yet.

use std::thread;
use std::time::Instant;

use tracing::debug;

use crate::config::WaitSettings;
use crate::diffable::ProviderError;
use crate::ui::{Ui, UiError};

#[derive(Debug, thiserror::Error)]
pub enum WaitError {
  #[error(transparent)]
  Provider(#[from] ProviderError),

  #[error(transparent)]
  Ui(#[from] UiError),
}

/// Polls a readiness check until it passes or the operator gives up.
pub struct Waiter<'s> {
  settings: &'s WaitSettings,
}

impl<'s> Waiter<'s> {
  pub fn new(settings: &'s WaitSettings) -> Self {
    Self { settings }
  }

  /// Poll `check` every `check_every` for up to `at_most`. When time runs
  /// out and prompting is enabled, ask whether to keep waiting.
  ///
  /// Returns false if the check never passed.
  pub fn until(
    &self,
    ui: &mut dyn Ui,
    what: &str,
    mut check: impl FnMut() -> Result<bool, ProviderError>,
  ) -> Result<bool, WaitError> {
    loop {
      let started = Instant::now();
      loop {
        if check()? {
          return Ok(true);
        }
        if started.elapsed() >= self.settings.at_most {
          break;
        }
        debug!(what, "not ready, waiting");
        thread::sleep(self.settings.check_every);
      }

      if !self.settings.prompt {
        return Ok(false);
      }
      ui.write(&format!(
        "Waited {} for {}.",
        humantime::format_duration(self.settings.at_most),
        what
      ));
      if !ui.read_boolean(false, "Wait for completion?")? {
        return Ok(false);
      }
    }
  }
}
