//! Where a compile request runs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use kiln_common::{KilnError, KilnResult};

/// The engine a compile request targets. Resolved per request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum RuntimeTarget {
    /// The in-process engine.
    #[default]
    Current,
    /// Another engine binary, driven as a child process.
    Alternate(AlternateRuntime),
}

impl RuntimeTarget {
    /// Targets the executable at `path` with no extra arguments.
    pub fn alternate(path: impl Into<PathBuf>) -> Self {
        RuntimeTarget::Alternate(AlternateRuntime::new(path))
    }
}

/// An alternate runtime executable with its launch settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlternateRuntime {
    /// Path to the executable.
    pub path: PathBuf,
    /// Arguments placed before the fixed child arguments.
    pub args: Vec<String>,
    /// Extra environment for the child.
    pub env: BTreeMap<String, String>,
}

impl AlternateRuntime {
    /// Creates a runtime with no extra arguments or environment.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    /// Sets the leading arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Adds an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Checks that the executable exists and is a regular file.
    ///
    /// Symlinks are followed. `PATH` is not searched.
    pub fn check(&self) -> KilnResult<&Path> {
        match std::fs::metadata(&self.path) {
            Ok(meta) if meta.is_file() => Ok(&self.path),
            _ => Err(KilnError::RuntimeNotFound {
                path: self.path.clone(),
            }),
        }
    }
}
