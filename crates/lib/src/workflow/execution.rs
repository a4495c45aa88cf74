//! The resumption record of an in-flight workflow.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::consts::EXECUTION_FILE;
use crate::state::{BackendError, FileBackend};

use super::WorkflowError;

/// Which workflow is running against which resource, and the stages that
/// have completed so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
  #[serde(rename = "type")]
  pub kind: String,
  pub name: String,
  pub workflow: String,
  #[serde(default)]
  pub executed_stages: Vec<String>,
}

impl ExecutionRecord {
  pub fn load(backend: &dyn FileBackend) -> Result<Option<Self>, WorkflowError> {
    let content = match backend.read_to_string(EXECUTION_FILE) {
      Ok(content) => content,
      Err(BackendError::NotFound(_)) => return Ok(None),
      Err(e) => return Err(e.into()),
    };
    let record = serde_json::from_str(&content).map_err(WorkflowError::Record)?;
    Ok(Some(record))
  }

  pub fn save(&self, backend: &dyn FileBackend) -> Result<(), WorkflowError> {
    let content = serde_json::to_string_pretty(self).map_err(WorkflowError::Record)?;
    backend.write_all(EXECUTION_FILE, content.as_bytes())?;
    debug!(workflow = %self.workflow, stages = ?self.executed_stages, "workflow progress saved");
    Ok(())
  }

  pub fn clear(backend: &dyn FileBackend) -> Result<(), WorkflowError> {
    backend.delete(EXECUTION_FILE)?;
    Ok(())
  }

  pub fn matches(&self, kind: &str, name: &str, workflow: &str) -> bool {
    self.kind == kind && self.name == name && self.workflow == workflow
  }

  pub fn last_stage(&self) -> Option<&str> {
    self.executed_stages.last().map(String::as_str)
  }
}
