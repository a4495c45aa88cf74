//! Storage for persisted state.
//!
//! A [`FileBackend`] is a flat namespace of slash-separated paths holding
//! bytes. Writes go through an [`OutputStream`] that only becomes visible on
//! [`OutputStream::commit`], so a crash mid-write never leaves a torn file.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::trace;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum BackendError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("invalid path: {0}")]
  InvalidPath(String),

  #[error("I/O error on {path}: {source}")]
  Io {
    path: String,
    #[source]
    source: io::Error,
  },
}

impl BackendError {
  fn io(path: &str, source: io::Error) -> Self {
    BackendError::Io {
      path: path.to_string(),
      source,
    }
  }
}

/// A pending write. Nothing is visible until it is committed; dropping it
/// discards the data.
pub trait OutputStream: Write {
  fn commit(self: Box<Self>) -> Result<(), BackendError>;
}

pub trait FileBackend: Send + Sync {
  /// Every stored path, sorted.
  fn list(&self) -> Result<Vec<String>, BackendError>;

  fn open_input(&self, path: &str) -> Result<Box<dyn Read>, BackendError>;

  fn open_output(&self, path: &str) -> Result<Box<dyn OutputStream>, BackendError>;

  /// Remove `path`. Removing a missing path is not an error.
  fn delete(&self, path: &str) -> Result<(), BackendError>;

  fn exists(&self, path: &str) -> Result<bool, BackendError> {
    Ok(self.list()?.iter().any(|p| p == path))
  }

  fn read_to_string(&self, path: &str) -> Result<String, BackendError> {
    let mut content = String::new();
    self
      .open_input(path)?
      .read_to_string(&mut content)
      .map_err(|e| BackendError::io(path, e))?;
    Ok(content)
  }

  fn write_all(&self, path: &str, bytes: &[u8]) -> Result<(), BackendError> {
    let mut output = self.open_output(path)?;
    output.write_all(bytes).map_err(|e| BackendError::io(path, e))?;
    output.commit()
  }
}

fn validate(path: &str) -> Result<(), BackendError> {
  let bad = path.is_empty()
    || path.starts_with('/')
    || path.split('/').any(|segment| segment.is_empty() || segment == "..");
  if bad {
    return Err(BackendError::InvalidPath(path.to_string()));
  }
  Ok(())
}

/// Stores files under a local directory.
#[derive(Debug, Clone)]
pub struct LocalFileBackend {
  root: PathBuf,
}

impl LocalFileBackend {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn resolve(&self, path: &str) -> Result<PathBuf, BackendError> {
    validate(path)?;
    Ok(self.root.join(path))
  }
}

struct LocalOutput {
  temp: NamedTempFile,
  target: PathBuf,
  path: String,
}

impl Write for LocalOutput {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.temp.write(buf)
  }

  fn flush(&mut self) -> io::Result<()> {
    self.temp.flush()
  }
}

impl OutputStream for LocalOutput {
  fn commit(self: Box<Self>) -> Result<(), BackendError> {
    let LocalOutput { temp, target, path } = *self;
    temp.as_file().sync_all().map_err(|e| BackendError::io(&path, e))?;
    temp.persist(&target).map_err(|e| BackendError::io(&path, e.error))?;
    trace!(path, "committed");
    Ok(())
  }
}

impl FileBackend for LocalFileBackend {
  fn list(&self) -> Result<Vec<String>, BackendError> {
    if !self.root.exists() {
      return Ok(Vec::new());
    }
    let mut paths = Vec::new();
    for entry in WalkDir::new(&self.root).min_depth(1) {
      let entry = entry.map_err(|e| BackendError::io(&self.root.display().to_string(), e.into()))?;
      if !entry.file_type().is_file() {
        continue;
      }
      let Ok(relative) = entry.path().strip_prefix(&self.root) else {
        continue;
      };
      let path = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
      // Uncommitted temp files are not part of the namespace.
      if !path.rsplit('/').next().is_some_and(|name| name.starts_with(".tmp")) {
        paths.push(path);
      }
    }
    paths.sort();
    Ok(paths)
  }

  fn open_input(&self, path: &str) -> Result<Box<dyn Read>, BackendError> {
    let full = self.resolve(path)?;
    match fs::File::open(&full) {
      Ok(file) => Ok(Box::new(file)),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Err(BackendError::NotFound(path.to_string())),
      Err(e) => Err(BackendError::io(path, e)),
    }
  }

  fn open_output(&self, path: &str) -> Result<Box<dyn OutputStream>, BackendError> {
    let target = self.resolve(path)?;
    let dir = target.parent().unwrap_or(&self.root).to_path_buf();
    fs::create_dir_all(&dir).map_err(|e| BackendError::io(path, e))?;
    let temp = NamedTempFile::new_in(&dir).map_err(|e| BackendError::io(path, e))?;
    Ok(Box::new(LocalOutput {
      temp,
      target,
      path: path.to_string(),
    }))
  }

  fn delete(&self, path: &str) -> Result<(), BackendError> {
    let full = self.resolve(path)?;
    match fs::remove_file(&full) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(BackendError::io(path, e)),
    }
  }
}

/// Keeps files in memory. Clones share the same files.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
  files: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryBackend {
  pub fn new() -> Self {
    Self::default()
  }

  fn files(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
    // A poisoned map is still consistent: writes replace whole entries.
    self.files.lock().unwrap_or_else(|e| e.into_inner())
  }
}

struct MemoryOutput {
  files: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
  path: String,
  buffer: Vec<u8>,
}

impl Write for MemoryOutput {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.buffer.extend_from_slice(buf);
    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

impl OutputStream for MemoryOutput {
  fn commit(self: Box<Self>) -> Result<(), BackendError> {
    let MemoryOutput { files, path, buffer } = *self;
    files.lock().unwrap_or_else(|e| e.into_inner()).insert(path, buffer);
    Ok(())
  }
}

impl FileBackend for MemoryBackend {
  fn list(&self) -> Result<Vec<String>, BackendError> {
    Ok(self.files().keys().cloned().collect())
  }

  fn open_input(&self, path: &str) -> Result<Box<dyn Read>, BackendError> {
    validate(path)?;
    let bytes = self
      .files()
      .get(path)
      .cloned()
      .ok_or_else(|| BackendError::NotFound(path.to_string()))?;
    Ok(Box::new(Cursor::new(bytes)))
  }

  fn open_output(&self, path: &str) -> Result<Box<dyn OutputStream>, BackendError> {
    validate(path)?;
    Ok(Box::new(MemoryOutput {
      files: Arc::clone(&self.files),
      path: path.to_string(),
      buffer: Vec::new(),
    }))
  }

  fn delete(&self, path: &str) -> Result<(), BackendError> {
    validate(path)?;
    self.files().remove(path);
    Ok(())
  }
}
