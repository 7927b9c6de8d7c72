//! Error types for nfsup-sync.

use std::path::PathBuf;

use thiserror::Error;

use nfsup_core::{BuildError, CoreError, PackageBackend};

/// All errors that can arise from synchronization operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A package-manager command could not be started or exited non-zero.
    #[error("command `{command}` failed ({status}):\n{output}")]
    Command {
        command: String,
        status: String,
        output: String,
    },

    /// The build system could not answer a variable or provisioning request.
    #[error("build system error: {0}")]
    Build(#[from] BuildError),

    #[error("{0}")]
    Core(#[from] CoreError),

    /// A required native tool is missing after provisioning.
    #[error("tool '{tool}' from '{recipe}' not found at {path}")]
    ToolMissing {
        recipe: String,
        tool: String,
        path: PathBuf,
    },

    #[error("package type '{0}' is not supported yet")]
    Unsupported(PackageBackend),

    /// Stamp file exists but does not hold a timestamp.
    #[error("malformed stamp at {path}: {content:?}")]
    MalformedStamp { path: PathBuf, content: String },
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
