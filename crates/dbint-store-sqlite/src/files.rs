//! [`LocalFileStore`]: file references resolved against a directory.

use std::{
  fs,
  io::ErrorKind,
  path::{Component, Path, PathBuf},
};

use dbint_core::store::FileStore;

use crate::{Error, Result};

/// Answers file questions relative to the site's file root.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
  root: PathBuf,
}

impl LocalFileStore {
  pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }

  pub fn root(&self) -> &Path { &self.root }

  /// Join `relative` onto the root. Only plain name components are allowed.
  fn resolve(&self, relative: &str) -> Result<PathBuf> {
    let path = Path::new(relative);
    let plain = path.components().all(|c| matches!(c, Component::Normal(_)));
    if relative.is_empty() || !plain {
      return Err(Error::InvalidPath(relative.to_owned()));
    }
    Ok(self.root.join(path))
  }
}

impl FileStore for LocalFileStore {
  type Error = Error;

  fn exists(&self, path: &str) -> Result<bool> { Ok(self.resolve(path)?.is_file()) }

  fn list(&self, folder: &str) -> Result<Vec<String>> {
    let folder = folder.trim_end_matches('/');
    let dir = self.resolve(folder)?;

    let entries = match fs::read_dir(&dir) {
      Ok(entries) => entries,
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
      Err(e) => return Err(e.into()),
    };

    let mut paths = vec![];
    for entry in entries {
      let entry = entry?;
      if !entry.file_type()?.is_file() {
        continue;
      }
      match entry.file_name().to_str() {
        Some(name) => paths.push(format!("{folder}/{name}")),
        None => tracing::warn!(dir = %dir.display(), "skipping file with non-UTF-8 name"),
      }
    }
    paths.sort();
    Ok(paths)
  }
}
