use std::path::{Path, PathBuf};

use crate::{encoding::Encoding, error::Result};

/// Environment variable that overrides the default storage root.
pub const DATA_PATH_ENV: &str = "KNOWLEDGE_MCP_PATH";

/// Storage root used when neither a flag nor the environment names one.
pub const DEFAULT_DATA_PATH: &str = ".knowledge";

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the storage root from, in order of priority:
    /// 1. An explicit path (from --data-path)
    /// 2. The KNOWLEDGE_MCP_PATH environment variable
    /// 3. `.knowledge` in the current directory
    ///
    /// Relative paths are anchored at the current directory. Nothing is
    /// created on disk until the first write.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var(DATA_PATH_ENV)
            && !val.is_empty()
        {
            PathBuf::from(val)
        } else {
            PathBuf::from(DEFAULT_DATA_PATH)
        };

        let root = if root.is_absolute() {
            root
        } else {
            std::env::current_dir()?.join(root)
        };

        Ok(Self { root })
    }

    /// Use `root` as-is, without consulting the environment.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn atoms_dir(&self) -> PathBuf {
        self.root.join("atoms")
    }

    pub fn index_file(&self, encoding: Encoding) -> PathBuf {
        self.root.join(format!("index.{}", encoding.extension()))
    }

    pub fn atom_file(&self, id: &str, encoding: Encoding) -> PathBuf {
        self.atoms_dir()
            .join(format!("{id}.{}", encoding.extension()))
    }

    /// Create the root and the atoms directory if they are missing.
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(self.atoms_dir())?;
        Ok(())
    }
}
