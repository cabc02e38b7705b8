//! Module resolution for `import`.
//!
//! A module name is a path, with or without the `.md` extension.  Relative
//! names are tried against the importing document's directory (or the
//! working directory), then each configured search path.  [`ImportGraph`]
//! tracks the chain of modules being rendered so circular and repeated
//! imports are refused before anything is evaluated.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("module '{0}' not found")]
    NotFound(String),

    #[error("circular import: {0}")]
    Circular(String),

    #[error("module '{0}' is already imported")]
    Duplicate(String),

    #[error("cannot read module {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
}

pub trait ModuleResolver {
    /// Locate `name`, imported from the document at `from` (if known).
    fn resolve(&self, name: &str, from: Option<&Path>) -> Result<PathBuf, ImportError>;
    fn load(&self, path: &Path) -> Result<String, ImportError>;
}

// ── Filesystem resolver ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct FsModuleResolver {
    search_paths: Vec<PathBuf>,
}

impl FsModuleResolver {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        FsModuleResolver { search_paths }
    }

    fn candidates(&self, name: &str, from: Option<&Path>) -> Vec<PathBuf> {
        let with_ext = |p: PathBuf| {
            let mut out = vec![p.clone()];
            if p.extension().is_none() {
                out.push(p.with_extension("md"));
            }
            out
        };
        let path = Path::new(name);
        if path.is_absolute() {
            return with_ext(path.to_path_buf());
        }
        let base = from
            .and_then(Path::parent)
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        std::iter::once(base)
            .chain(self.search_paths.iter().cloned())
            .flat_map(|dir| with_ext(dir.join(path)))
            .collect()
    }
}

impl ModuleResolver for FsModuleResolver {
    fn resolve(&self, name: &str, from: Option<&Path>) -> Result<PathBuf, ImportError> {
        self.candidates(name, from)
            .into_iter()
            .find(|p| p.is_file())
            .map(|p| fs::canonicalize(&p).unwrap_or(p))
            .ok_or_else(|| ImportError::NotFound(name.to_owned()))
    }

    fn load(&self, path: &Path) -> Result<String, ImportError> {
        fs::read_to_string(path).map_err(|source| ImportError::Read {
            path: path.display().to_string(),
            source,
        })
    }
}

// ── Import graph ──────────────────────────────────────────────────────────────

/// Modules being rendered (innermost last) and modules already rendered.
#[derive(Debug, Default)]
pub struct ImportGraph {
    stack: Vec<PathBuf>,
    loaded: HashSet<PathBuf>,
}

impl ImportGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start rendering `path`.  Refuses a module that is already on the
    /// stack (circular) or was rendered before (duplicate).
    pub fn enter(&mut self, path: &Path) -> Result<(), ImportError> {
        if let Some(i) = self.stack.iter().position(|p| p == path) {
            let chain: Vec<String> = self.stack[i..]
                .iter()
                .chain(std::iter::once(&path.to_path_buf()))
                .map(|p| display_name(p))
                .collect();
            return Err(ImportError::Circular(chain.join(" -> ")));
        }
        if self.loaded.contains(path) {
            return Err(ImportError::Duplicate(display_name(path)));
        }
        self.stack.push(path.to_path_buf());
        Ok(())
    }

    /// Finish the innermost module.
    pub fn leave(&mut self) {
        if let Some(done) = self.stack.pop() {
            self.loaded.insert(done);
        }
    }

    /// The module currently being rendered.
    pub fn current(&self) -> Option<&Path> {
        self.stack.last().map(PathBuf::as_path)
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_with_and_without_extension() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("lib.md"), "x").unwrap();
        let from = dir.path().join("main.md");
        let r = FsModuleResolver::default();
        let a = r.resolve("lib.md", Some(&from)).unwrap();
        let b = r.resolve("lib", Some(&from)).unwrap();
        assert_eq!(a, b);
        assert_eq!(r.load(&a).unwrap(), "x");
    }

    #[test]
    fn search_paths_are_consulted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("shared.md"), "").unwrap();
        let r = FsModuleResolver::new(vec![dir.path().to_path_buf()]);
        assert!(r.resolve("shared", None).is_ok());
        assert!(matches!(r.resolve("nope", None), Err(ImportError::NotFound(_))));
    }

    #[test]
    fn circular_import_refused() {
        let mut g = ImportGraph::new();
        g.enter(Path::new("/d/a.md")).unwrap();
        g.enter(Path::new("/d/b.md")).unwrap();
        let err = g.enter(Path::new("/d/a.md")).unwrap_err();
        assert_eq!(err.to_string(), "circular import: a.md -> b.md -> a.md");
    }

    #[test]
    fn duplicate_import_refused() {
        let mut g = ImportGraph::new();
        g.enter(Path::new("/d/a.md")).unwrap();
        g.leave();
        assert_eq!(g.depth(), 0);
        assert!(matches!(g.enter(Path::new("/d/a.md")), Err(ImportError::Duplicate(_))));
    }
}
