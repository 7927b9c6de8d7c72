//! nfsroot updater daemon: single-flight job admission, one-shot socket
//! sessions, and the listener that ties them together.

pub mod admission;
mod error;
pub mod job;
pub mod paths;
pub mod protocol;
mod runtime;
pub mod session;

pub use admission::{Admission, AdmissionGate};
pub use error::DaemonError;
pub use job::{provision_toolchain, NfsrootSyncJob, SyncJob};
pub use protocol::{send_raw, send_signal};
pub use runtime::{
    init_tracing, prepare_socket_for_bind, provision_tools, run, run_on, serve, start_blocking,
};
