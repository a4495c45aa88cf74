//! Locking persisted state against concurrent runs.
//!
//! A lock is identified by a caller-chosen id. It outlives the process that
//! took it, so a crashed run leaves the lock behind until it is released
//! with the same id or forced open.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::consts::{APP_NAME, LOCK_FILENAME};

const LOCK_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub id: String,
  pub pid: u32,
  pub started_at_unix: u64,
  /// Free-form description of what the holder is doing.
  #[serde(default)]
  pub info: String,
}

impl LockMetadata {
  fn new(id: &str, info: &str) -> Self {
    Self {
      version: LOCK_VERSION,
      id: id.to_string(),
      pid: std::process::id(),
      started_at_unix: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
      info: info.to_string(),
    }
  }
}

#[derive(Debug, Error)]
pub enum LockError {
  #[error(
    "State is locked by {id}: {info} (PID {pid}, started at Unix timestamp {started_at_unix})\n\
     If you're sure no {app} process is running, release it with:\n  {app} unlock {id}"
  )]
  Contention {
    id: String,
    info: String,
    pid: u32,
    started_at_unix: u64,
    app: &'static str,
  },

  #[error("State is locked (could not read lock metadata at {0})")]
  ContentionUnknown(PathBuf),

  #[error("Lock {requested} is not held (held by {holder})")]
  NotHolder { requested: String, holder: String },

  #[error("No lock is held")]
  NotLocked,

  #[error("Failed to access lock file: {0}")]
  Io(#[from] io::Error),
}

impl LockError {
  fn contention(metadata: LockMetadata) -> Self {
    LockError::Contention {
      id: metadata.id,
      info: metadata.info,
      pid: metadata.pid,
      started_at_unix: metadata.started_at_unix,
      app: APP_NAME,
    }
  }
}

pub trait LockBackend: Send + Sync {
  /// Take the lock for `id`. Taking a lock already held by `id` succeeds.
  fn lock(&self, id: &str, info: &str) -> Result<(), LockError>;

  fn unlock(&self, id: &str) -> Result<(), LockError>;

  fn update_lock_info(&self, id: &str, info: &str) -> Result<(), LockError>;

  /// Current holder, if any.
  fn holder(&self) -> Result<Option<LockMetadata>, LockError>;
}

/// A lock file next to the state it guards.
#[derive(Debug, Clone)]
pub struct FileLockBackend {
  path: PathBuf,
}

impl FileLockBackend {
  pub fn new(state_dir: impl AsRef<Path>) -> Self {
    Self {
      path: state_dir.as_ref().join(LOCK_FILENAME),
    }
  }

  pub fn lock_path(&self) -> &Path {
    &self.path
  }

  fn read(&self) -> Result<Option<LockMetadata>, LockError> {
    match fs::read_to_string(&self.path) {
      Ok(content) => serde_json::from_str(&content)
        .map(Some)
        .map_err(|_| LockError::ContentionUnknown(self.path.clone())),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e.into()),
    }
  }

  fn write(&self, metadata: &LockMetadata, create_new: bool) -> Result<(), LockError> {
    let mut options = OpenOptions::new();
    options.write(true);
    if create_new {
      options.create_new(true);
    } else {
      options.truncate(true);
    }
    let mut file = options.open(&self.path)?;
    serde_json::to_writer_pretty(&mut file, metadata).map_err(io::Error::other)?;
    file.flush()?;
    Ok(())
  }

  /// Remove the lock regardless of holder. Returns who held it.
  pub fn force_unlock(&self) -> Result<Option<LockMetadata>, LockError> {
    let previous = self.read().unwrap_or(None);
    match fs::remove_file(&self.path) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => return Err(e.into()),
    }
    warn!(path = %self.path.display(), "lock forcibly removed");
    Ok(previous)
  }
}

impl LockBackend for FileLockBackend {
  fn lock(&self, id: &str, info: &str) -> Result<(), LockError> {
    if let Some(parent) = self.path.parent() {
      fs::create_dir_all(parent)?;
    }
    match self.write(&LockMetadata::new(id, info), true) {
      Ok(()) => {
        debug!(id, path = %self.path.display(), "lock acquired");
        Ok(())
      }
      Err(LockError::Io(e)) if e.kind() == io::ErrorKind::AlreadyExists => match self.read()? {
        Some(holder) if holder.id == id => Ok(()),
        Some(holder) => Err(LockError::contention(holder)),
        None => Err(LockError::ContentionUnknown(self.path.clone())),
      },
      Err(e) => Err(e),
    }
  }

  fn unlock(&self, id: &str) -> Result<(), LockError> {
    let holder = self.read()?.ok_or(LockError::NotLocked)?;
    if holder.id != id {
      return Err(LockError::NotHolder {
        requested: id.to_string(),
        holder: holder.id,
      });
    }
    fs::remove_file(&self.path)?;
    debug!(id, "lock released");
    Ok(())
  }

  fn update_lock_info(&self, id: &str, info: &str) -> Result<(), LockError> {
    let mut holder = self.read()?.ok_or(LockError::NotLocked)?;
    if holder.id != id {
      return Err(LockError::NotHolder {
        requested: id.to_string(),
        holder: holder.id,
      });
    }
    holder.info = info.to_string();
    self.write(&holder, false)
  }

  fn holder(&self) -> Result<Option<LockMetadata>, LockError> {
    self.read()
  }
}

/// An in-process lock. Clones share the same lock.
#[derive(Debug, Clone, Default)]
pub struct MemoryLockBackend {
  held: Arc<Mutex<Option<LockMetadata>>>,
}

impl MemoryLockBackend {
  pub fn new() -> Self {
    Self::default()
  }
}

impl LockBackend for MemoryLockBackend {
  fn lock(&self, id: &str, info: &str) -> Result<(), LockError> {
    let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
    match held.as_ref() {
      Some(holder) if holder.id == id => Ok(()),
      Some(holder) => Err(LockError::contention(holder.clone())),
      None => {
        *held = Some(LockMetadata::new(id, info));
        Ok(())
      }
    }
  }

  fn unlock(&self, id: &str) -> Result<(), LockError> {
    let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
    match held.as_ref() {
      None => Err(LockError::NotLocked),
      Some(holder) if holder.id != id => Err(LockError::NotHolder {
        requested: id.to_string(),
        holder: holder.id.clone(),
      }),
      Some(_) => {
        *held = None;
        Ok(())
      }
    }
  }

  fn update_lock_info(&self, id: &str, info: &str) -> Result<(), LockError> {
    let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
    match held.as_mut() {
      None => Err(LockError::NotLocked),
      Some(holder) if holder.id != id => Err(LockError::NotHolder {
        requested: id.to_string(),
        holder: holder.id.clone(),
      }),
      Some(holder) => {
        holder.info = info.to_string();
        Ok(())
      }
    }
  }

  fn holder(&self) -> Result<Option<LockMetadata>, LockError> {
    Ok(self.held.lock().unwrap_or_else(|e| e.into_inner()).clone())
  }
}

/// A fresh lock id: a short digest of the process id and the current time.
pub fn new_lock_id() -> String {
  let nanos = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_nanos();
  let digest = Sha256::digest(format!("{}:{}", std::process::id(), nanos).as_bytes());
  hex::encode(&digest[..6])
}

/// Holds a lock for its lifetime and releases it on drop.
pub struct StateLock {
  backend: Arc<dyn LockBackend>,
  id: String,
}

impl StateLock {
  pub fn acquire(backend: Arc<dyn LockBackend>, info: &str) -> Result<Self, LockError> {
    let id = new_lock_id();
    backend.lock(&id, info)?;
    Ok(Self { backend, id })
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn update_info(&self, info: &str) -> Result<(), LockError> {
    self.backend.update_lock_info(&self.id, info)
  }
}

impl Drop for StateLock {
  fn drop(&mut self) {
    if let Err(e) = self.backend.unlock(&self.id) {
      warn!(id = %self.id, error = %e, "failed to release lock");
    }
  }
}
