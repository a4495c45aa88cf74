//! Shared test helpers for CLI integration tests.

#![allow(dead_code)]

use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Get path to a fixture file.
pub fn fixture_path(name: &str) -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    .join("tests")
    .join("fixtures")
    .join(name)
}

/// Read fixture content.
pub fn fixture_content(name: &str) -> String {
  std::fs::read_to_string(fixture_path(name)).unwrap_or_else(|e| panic!("Failed to load fixture {}: {}", name, e))
}

/// Isolated test environment.
///
/// Each test gets its own temporary directory holding the project and, under
/// `.cairn/state`, its state, lock and simulated cloud.
pub struct TestEnv {
  pub temp: TempDir,
  pub project_path: PathBuf,
}

impl TestEnv {
  /// Create from a fixture file.
  ///
  /// Copies the fixture content to a temporary `cairn.json`.
  pub fn from_fixture(name: &str) -> Self {
    let temp = TempDir::new().unwrap();
    let project_path = temp.path().join("cairn.json");
    std::fs::write(&project_path, fixture_content(name)).unwrap();
    Self { temp, project_path }
  }

  /// Replace the project with another fixture, keeping state.
  pub fn use_fixture(&self, name: &str) {
    std::fs::write(&self.project_path, fixture_content(name)).unwrap();
  }

  pub fn state_dir(&self) -> PathBuf {
    self.temp.path().join(".cairn").join("state")
  }

  /// Write a file relative to the state directory.
  pub fn write_state_file(&self, relative_path: &str, content: &str) {
    let path = self.state_dir().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  /// Get a pre-configured Command for the cairn binary.
  ///
  /// Runs inside the temp directory with every `CAIRN_*` override cleared,
  /// except a short readiness poll interval.
  pub fn cairn_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("cairn");
    cmd.current_dir(self.temp.path());
    for var in ["CAIRN_STATE_DIR", "CAIRN_RETRY_BUDGET", "CAIRN_WAIT_TIMEOUT", "CAIRN_WAIT_PROMPT", "RUST_LOG"] {
      cmd.env_remove(var);
    }
    cmd.env("CAIRN_WAIT_INTERVAL", "10ms");
    cmd
  }
}
