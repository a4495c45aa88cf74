mod plan;
mod state;
mod unlock;
mod up;

pub use plan::cmd_plan;
pub use state::cmd_state;
pub use unlock::cmd_unlock;
pub use up::cmd_up;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use cairn_lib::config::Settings;
use cairn_lib::consts::ENV_STATE_DIR;
use cairn_lib::diffable::TypeRegistry;
use cairn_lib::providers::{MemoryCloud, test_registry};
use cairn_lib::state::{FileBackend, FileLockBackend, LocalFileBackend};

/// File under the state directory where the built-in cloud keeps its objects.
const CLOUD_FILE: &str = "cloud.json";

/// Settings from `CAIRN_*` variables with the `--state-dir` flag on top.
///
/// Without the flag or the variable, state lives next to the project.
pub fn load_settings(project: &Path, state_dir: Option<&Path>) -> Result<Settings> {
  let mut settings = Settings::from_env().context("Invalid configuration")?;

  if let Some(dir) = state_dir {
    settings.state_dir = dir.to_path_buf();
  } else if std::env::var_os(ENV_STATE_DIR).is_none() {
    if let Some(parent) = project.parent() {
      settings.state_dir = parent.join(&settings.state_dir);
    }
  }

  Ok(settings)
}

/// The state directory and the providers a command works against.
pub struct Workspace {
  pub settings: Settings,
  pub cloud: MemoryCloud,
  pub registry: TypeRegistry,
}

impl Workspace {
  pub fn open(settings: Settings) -> Result<Self> {
    let cloud_path = settings.state_dir.join(CLOUD_FILE);
    let cloud = MemoryCloud::open(&cloud_path)
      .with_context(|| format!("Failed to load cloud objects: {}", cloud_path.display()))?;
    let registry = test_registry(&cloud);
    Ok(Self {
      settings,
      cloud,
      registry,
    })
  }

  pub fn state_dir(&self) -> &PathBuf {
    &self.settings.state_dir
  }

  pub fn backend(&self) -> Arc<dyn FileBackend> {
    Arc::new(LocalFileBackend::new(self.state_dir()))
  }

  pub fn locks(&self) -> Arc<FileLockBackend> {
    Arc::new(FileLockBackend::new(self.state_dir()))
  }
}
