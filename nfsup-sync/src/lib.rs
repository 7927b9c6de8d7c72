//! # nfsup-sync
//!
//! Package synchronization of an nfsroot against a freshly built feed.
//!
//! Resolve a [`plan::SyncPlan`] from the build system, open a
//! [`PackageManager`] with [`open_backend`], then call [`pipeline::run`].

pub mod diff;
pub mod error;
pub mod opkg;
pub mod package_manager;
pub mod pipeline;
pub mod plan;
pub mod stamp;
pub mod toolchain;

pub use diff::install_diff;
pub use error::SyncError;
pub use package_manager::{DeployDirLock, PackageManager};
pub use pipeline::{InstallStep, Stage, SyncOutcome};
pub use plan::SyncPlan;
pub use toolchain::Toolchain;

use nfsup_core::PackageBackend;

/// Package-manager backend for `plan`'s package type.
pub fn open_backend(
    plan: &SyncPlan,
    toolchain: &Toolchain,
) -> Result<Box<dyn PackageManager>, SyncError> {
    match plan.backend {
        PackageBackend::Ipk => Ok(Box::new(opkg::OpkgPackageManager::new(plan, toolchain)?)),
        other => Err(SyncError::Unsupported(other)),
    }
}
