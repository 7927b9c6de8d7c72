use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the listener, its sessions, and the socket client.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Core(#[from] nfsup_core::CoreError),

    #[error("tool provisioning failed: {0}")]
    Provisioning(#[source] nfsup_sync::SyncError),

    #[error("cannot determine user name: neither USER nor LOGNAME is set")]
    UnknownUser,

    #[error("daemon socket already in use: {socket}")]
    SocketInUse { socket: PathBuf },

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
