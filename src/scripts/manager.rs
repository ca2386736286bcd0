//! Registry of shell scripts available to scripted experiments.

#![allow(missing_docs)]

use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::errors::{ChaosError, Result};
use crate::scripts::shell::ShellScript;

/// Source of script assets for experiment selection.
pub trait ScriptRegistry: Send + Sync {
    fn scripts(&self) -> Vec<Arc<ShellScript>>;
}

/// Scripts held in memory, optionally loaded from a directory.
#[derive(Debug, Default)]
pub struct ScriptManager {
    scripts: RwLock<Vec<Arc<ShellScript>>>,
}

impl ScriptManager {
    #[must_use]
    pub fn new(scripts: Vec<ShellScript>) -> Self {
        Self {
            scripts: RwLock::new(scripts.into_iter().map(Arc::new).collect()),
        }
    }

    /// Empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load every regular file in `dir`, sorted by file name.
    ///
    /// A script that fails to parse is reported on stderr and skipped; an
    /// unreadable directory is an error.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut paths: Vec<_> = fs::read_dir(dir)
            .map_err(|source| ChaosError::io(dir, source))?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        paths.sort();

        let mut scripts = Vec::with_capacity(paths.len());
        for path in paths {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let contents = fs::read_to_string(&path).map_err(|source| ChaosError::io(&path, source))?;
            match ShellScript::parse(&name, &contents) {
                Ok(script) => scripts.push(script),
                Err(e) => eprintln!("[CHX-SCRIPT] skipping {}: {e}", path.display()),
            }
        }
        Ok(Self::new(scripts))
    }

    /// Replace the registered scripts (config reload).
    pub fn replace(&self, scripts: Vec<ShellScript>) {
        *self.scripts.write() = scripts.into_iter().map(Arc::new).collect();
    }

    /// Adopt the scripts held by `other`.
    pub fn replace_from(&self, other: &Self) {
        let scripts = other.scripts.read().clone();
        *self.scripts.write() = scripts;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.scripts.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scripts.read().is_empty()
    }
}

impl ScriptRegistry for ScriptManager {
    fn scripts(&self) -> Vec<Arc<ShellScript>> {
        self.scripts.read().clone()
    }
}
