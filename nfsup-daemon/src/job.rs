//! The unit of work the admission gate launches.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use nfsup_core::{BuildSystem, InstanceConfig, PackageBackend};
use nfsup_sync::{
    open_backend, pipeline, stamp, toolchain, SyncError, SyncOutcome, SyncPlan, Toolchain,
};

/// Work run once per admitted `bitbake_done`.
pub trait SyncJob: Send + Sync + 'static {
    /// Run to completion. Outcomes are reported through logs only.
    fn run(&self);

    /// Time of the last completed synchronization, `None` if never.
    fn last_synced(&self) -> Result<Option<DateTime<Utc>>, SyncError>;
}

/// Provision every tool the package backend of `rootfs_recipe` needs.
pub fn provision_toolchain(
    build: &dyn BuildSystem,
    rootfs_recipe: &str,
) -> Result<Toolchain, SyncError> {
    let classes = build.require_variable(Some(rootfs_recipe), "PACKAGE_CLASSES")?;
    let backend = PackageBackend::from_package_classes(&classes)?;
    toolchain::provision(build, backend)
}

/// Synchronizes one instance's nfsroot against the latest build.
pub struct NfsrootSyncJob {
    config: InstanceConfig,
    build: Arc<dyn BuildSystem>,
    toolchain: Toolchain,
}

impl NfsrootSyncJob {
    pub fn new(config: InstanceConfig, build: Arc<dyn BuildSystem>, toolchain: Toolchain) -> Self {
        Self {
            config,
            build,
            toolchain,
        }
    }

    pub fn nfsroot(&self) -> &Path {
        &self.config.nfsroot
    }

    /// Resolve a fresh plan, open the backend, and run the pipeline.
    ///
    /// Errors are plan or backend failures that happen before the pipeline
    /// starts; pipeline failures are folded into the outcome.
    pub fn run_once(&self) -> Result<SyncOutcome, SyncError> {
        let plan = SyncPlan::resolve(
            self.build.as_ref(),
            &self.config.rootfs_recipe,
            &self.config.nfsroot,
        )?;
        let pkgmgr = open_backend(&plan, &self.toolchain)?;
        Ok(pipeline::run(&plan.desired, &plan.nfsroot, pkgmgr.as_ref()))
    }
}

impl SyncJob for NfsrootSyncJob {
    fn run(&self) {
        match self.run_once() {
            Ok(outcome @ SyncOutcome::FullySucceeded { .. }) => {
                tracing::info!(instance = %self.config.instance, "{}", outcome.summary());
            }
            Ok(outcome @ SyncOutcome::SucceededWithUpgradeWarning { .. }) => {
                tracing::warn!(instance = %self.config.instance, "{}", outcome.summary());
            }
            Ok(outcome @ SyncOutcome::AbortedAt { .. }) => {
                tracing::error!(instance = %self.config.instance, "{}", outcome.summary());
            }
            Err(err) => {
                tracing::error!(
                    instance = %self.config.instance,
                    error = %err,
                    "sync job failed before the pipeline started",
                );
            }
        }
    }

    fn last_synced(&self) -> Result<Option<DateTime<Utc>>, SyncError> {
        stamp::read_at(&self.config.nfsroot)
    }
}
