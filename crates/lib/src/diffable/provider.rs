//! The lifecycle hooks a resource type implements.

use std::collections::BTreeSet;

use thiserror::Error;

use super::Resource;

/// Errors returned by provider hooks.
#[derive(Debug, Error)]
pub enum ProviderError {
  /// The operation was accepted but has not converged. The caller polls
  /// [`Provider::ready`] until it does.
  #[error("still in progress: {reason}")]
  Pending { reason: String },

  #[error("{message}")]
  Failed { message: String },

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
}

impl ProviderError {
  pub fn failed(message: impl Into<String>) -> Self {
    ProviderError::Failed {
      message: message.into(),
    }
  }

  pub fn pending(reason: impl Into<String>) -> Self {
    ProviderError::Pending { reason: reason.into() }
  }
}

/// Lifecycle hooks for one resource type.
///
/// Hooks receive resources whose links have already been settled. `create`
/// and `update` may write output fields back onto the resource they are
/// given; those values are what gets persisted.
pub trait Provider: Send + Sync {
  /// Refresh `resource` from the real world. Returns false if it no longer
  /// exists.
  fn refresh(&self, resource: &mut Resource) -> Result<bool, ProviderError>;

  fn create(&self, resource: &mut Resource) -> Result<(), ProviderError>;

  fn update(&self, current: &Resource, pending: &mut Resource, changed: &BTreeSet<String>) -> Result<(), ProviderError>;

  fn delete(&self, resource: &Resource) -> Result<(), ProviderError>;

  /// Polled after a hook returned [`ProviderError::Pending`].
  fn ready(&self, _resource: &Resource) -> Result<bool, ProviderError> {
    Ok(true)
  }
}
