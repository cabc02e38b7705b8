//! Filesystem access for `File.*` operations.
//!
//! The interpreter only talks to the [`Filesystem`] trait.  [`StdFs`] is the
//! real thing, optionally confined to a root directory; [`DeniedFs`] refuses
//! everything and is used when file access is disabled.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

pub trait Filesystem {
    fn read(&self, path: &str) -> io::Result<String>;
    fn write(&self, path: &str, contents: &str) -> io::Result<()>;
    fn exists(&self, path: &str) -> bool;
    /// Entry names of a directory, sorted.
    fn list(&self, path: &str) -> io::Result<Vec<String>>;
    fn delete(&self, path: &str) -> io::Result<()>;
}

// ── StdFs ─────────────────────────────────────────────────────────────────────

/// `std::fs`, with relative paths resolved against `root` when one is set.
/// A rooted filesystem refuses absolute paths outside the root and any path
/// containing `..`.
#[derive(Debug, Clone, Default)]
pub struct StdFs {
    root: Option<PathBuf>,
}

fn denied(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::PermissionDenied, format!("{path} is outside the file root"))
}

impl StdFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        StdFs { root: Some(root.into()) }
    }

    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let p = Path::new(path);
        let Some(root) = &self.root else {
            return Ok(p.to_path_buf());
        };
        if p.components().any(|c| c == Component::ParentDir) {
            return Err(denied(path));
        }
        if p.is_absolute() {
            return if p.starts_with(root) { Ok(p.to_path_buf()) } else { Err(denied(path)) };
        }
        Ok(root.join(p))
    }
}

impl Filesystem for StdFs {
    fn read(&self, path: &str) -> io::Result<String> {
        fs::read_to_string(self.resolve(path)?)
    }

    fn write(&self, path: &str, contents: &str) -> io::Result<()> {
        fs::write(self.resolve(path)?, contents)
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_ok_and(|p| p.exists())
    }

    fn list(&self, path: &str) -> io::Result<Vec<String>> {
        let mut names = fs::read_dir(self.resolve(path)?)?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<io::Result<Vec<_>>>()?;
        names.sort();
        Ok(names)
    }

    fn delete(&self, path: &str) -> io::Result<()> {
        let p = self.resolve(path)?;
        if p.is_dir() {
            fs::remove_dir(p)
        } else {
            fs::remove_file(p)
        }
    }
}

// ── DeniedFs ──────────────────────────────────────────────────────────────────

/// Refuses every operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeniedFs;

fn disabled() -> io::Error {
    io::Error::new(io::ErrorKind::PermissionDenied, "file access is disabled")
}

impl Filesystem for DeniedFs {
    fn read(&self, _path: &str) -> io::Result<String> {
        Err(disabled())
    }

    fn write(&self, _path: &str, _contents: &str) -> io::Result<()> {
        Err(disabled())
    }

    fn exists(&self, _path: &str) -> bool {
        false
    }

    fn list(&self, _path: &str) -> io::Result<Vec<String>> {
        Err(disabled())
    }

    fn delete(&self, _path: &str) -> io::Result<()> {
        Err(disabled())
    }
}
