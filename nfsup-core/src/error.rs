//! Error types for nfsup-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from instance configuration and data-model parsing.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load; includes file path and line context from serde_yaml.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`; cannot locate `~/.nfsup/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// No configuration file exists for the requested instance.
    #[error("instance config not found at {path}")]
    ConfigNotFound { path: PathBuf },

    /// Instance names end up in file names and socket paths.
    #[error("invalid instance name '{0}': use letters, digits, '-', '_' or '.'")]
    InvalidInstance(String),

    #[error("unknown package backend '{0}'; expected ipk, rpm or deb")]
    InvalidBackend(String),
}

/// Errors raised by a [`crate::build::BuildSystem`] implementation.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse build manifest at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("variable {name} is not set for recipe '{recipe}'")]
    MissingVariable { recipe: String, name: String },

    #[error("provisioning '{tool}' from '{recipe}' failed: {message}")]
    Provision {
        recipe: String,
        tool: String,
        message: String,
    },
}

pub(crate) fn build_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> BuildError {
    BuildError::Io {
        path: path.into(),
        source,
    }
}
