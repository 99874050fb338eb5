//! The in-sandbox filesystem namespace.
//!
//! The engine's program and asset files live under one root directory; the
//! public `*Fs` operations are thin wrappers that never let a path escape
//! it.

use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("path escapes the sandbox root: {0}")]
    Escape(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One directory entry from a long listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsEntry {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
}

/// A filesystem rooted at a fixed directory.
pub struct SandboxFs {
    root: PathBuf,
}

impl SandboxFs {
    /// Creates the root directory if needed and jails all operations under
    /// it.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, FsError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a caller path into the sandbox, rejecting absolute paths and
    /// any `..` component before touching the filesystem.
    fn resolve(&self, path: &str) -> Result<PathBuf, FsError> {
        let mut resolved = self.root.clone();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(FsError::Escape(path.to_owned()));
                }
            }
        }
        Ok(resolved)
    }

    /// Writes a file, creating parent directories as needed.
    pub fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), FsError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(target, contents)?;
        Ok(())
    }

    pub fn read_file(&self, path: &str) -> Result<Vec<u8>, FsError> {
        Ok(fs::read(self.resolve(path)?)?)
    }

    /// Names in a directory, sorted.
    pub fn ls(&self, path: &str) -> Result<Vec<String>, FsError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.resolve(path)?)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    /// Long listing: name, size, kind.
    pub fn ll(&self, path: &str) -> Result<Vec<FsEntry>, FsError> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(self.resolve(path)?)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            entries.push(FsEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: metadata.len(),
                is_dir: metadata.is_dir(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Removes a file or directory tree. Missing targets are not an error.
    pub fn rmrf(&self, path: &str) -> Result<(), FsError> {
        let target = self.resolve(path)?;
        match fs::metadata(&target) {
            Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(target)?,
            Ok(_) => fs::remove_file(target)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }
}
