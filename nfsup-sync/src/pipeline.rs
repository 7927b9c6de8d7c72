//! Synchronization pipeline shared by the CLI and the daemon.
//!
//! Stages run strictly in order, each depending on the previous one:
//!
//! 1. index refresh
//! 2. feed sync
//! 3. inventory + install diff
//! 4. install (skipped when the diff is empty)
//! 5. upgrade, under the deploy-dir lock (best effort)
//! 6. completion stamp
//!
//! [`run`] never returns an error. Every failure is logged and folded into
//! the returned [`SyncOutcome`].

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};

use nfsup_core::PackageId;

use crate::diff::install_diff;
use crate::package_manager::PackageManager;
use crate::{stamp, SyncError};

/// A pipeline stage that can abort a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    IndexRefresh,
    FeedSync,
    Inventory,
    Install,
    Stamp,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::IndexRefresh => "index refresh",
            Stage::FeedSync => "feed sync",
            Stage::Inventory => "inventory query",
            Stage::Install => "install",
            Stage::Stamp => "stamp",
        };
        f.write_str(name)
    }
}

/// What the install stage did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallStep {
    /// The diff was non-empty; the full desired list was handed to the manager.
    Installed { missing: Vec<PackageId> },
    /// Every desired package was already present.
    NothingToInstall,
}

/// Structured result of one pipeline run.
#[derive(Debug)]
pub enum SyncOutcome {
    FullySucceeded {
        install: InstallStep,
        stamped_at: DateTime<Utc>,
    },
    /// Stamped, but the upgrade stage failed and was not rolled back.
    SucceededWithUpgradeWarning {
        install: InstallStep,
        stamped_at: DateTime<Utc>,
        cause: SyncError,
    },
    AbortedAt { stage: Stage, cause: SyncError },
}

impl SyncOutcome {
    pub fn is_stamped(&self) -> bool {
        !matches!(self, SyncOutcome::AbortedAt { .. })
    }

    pub fn install_step(&self) -> Option<&InstallStep> {
        match self {
            SyncOutcome::FullySucceeded { install, .. }
            | SyncOutcome::SucceededWithUpgradeWarning { install, .. } => Some(install),
            SyncOutcome::AbortedAt { .. } => None,
        }
    }

    /// Short one-line description for logs and CLI output.
    pub fn summary(&self) -> String {
        match self {
            SyncOutcome::FullySucceeded { stamped_at, .. } => {
                format!("synchronized at {}", stamped_at.format("%Y-%m-%dT%H:%M:%SZ"))
            }
            SyncOutcome::SucceededWithUpgradeWarning {
                stamped_at, cause, ..
            } => format!(
                "synchronized at {} but upgrade failed: {cause}",
                stamped_at.format("%Y-%m-%dT%H:%M:%SZ")
            ),
            SyncOutcome::AbortedAt { stage, cause } => format!("aborted at {stage}: {cause}"),
        }
    }
}

/// Synchronize `nfsroot` with the feed behind `pkgmgr`.
pub fn run(desired: &[PackageId], nfsroot: &Path, pkgmgr: &dyn PackageManager) -> SyncOutcome {
    run_with_clock(desired, nfsroot, pkgmgr, Utc::now)
}

/// [`run`] with an injectable clock for the stamp timestamp.
pub fn run_with_clock(
    desired: &[PackageId],
    nfsroot: &Path,
    pkgmgr: &dyn PackageManager,
    now: impl Fn() -> DateTime<Utc>,
) -> SyncOutcome {
    tracing::info!("updating nfsroot {}", nfsroot.display());

    tracing::info!("refreshing package index");
    if let Err(cause) = pkgmgr.refresh_index() {
        return abort(Stage::IndexRefresh, cause);
    }

    tracing::info!("updating from package feeds");
    if let Err(cause) = pkgmgr.sync_feed() {
        return abort(Stage::FeedSync, cause);
    }

    let installed = match pkgmgr.list_installed() {
        Ok(installed) => installed,
        Err(cause) => return abort(Stage::Inventory, cause),
    };
    let missing = install_diff(desired, &installed);

    let install = if missing.is_empty() {
        tracing::info!("no packages to install");
        InstallStep::NothingToInstall
    } else {
        tracing::info!("packages to install: {}", join(&missing));
        if let Err(cause) = pkgmgr.install(desired) {
            return abort(Stage::Install, cause);
        }
        InstallStep::Installed { missing }
    };

    tracing::info!("upgrading packages");
    let upgrade = upgrade_locked(pkgmgr);
    if let Err(cause) = &upgrade {
        tracing::warn!("upgrade failed, continuing to stamp: {cause}");
    }

    let stamped_at = now();
    tracing::info!(
        "writing update timestamp {} to {}",
        stamped_at.format("%Y-%m-%dT%H:%M:%SZ"),
        stamp::stamp_path(nfsroot).display()
    );
    if let Err(cause) = stamp::write_at(nfsroot, stamped_at) {
        return abort(Stage::Stamp, cause);
    }

    match upgrade {
        Ok(()) => {
            tracing::info!("updating nfsroot done");
            SyncOutcome::FullySucceeded {
                install,
                stamped_at,
            }
        }
        Err(cause) => SyncOutcome::SucceededWithUpgradeWarning {
            install,
            stamped_at,
            cause,
        },
    }
}

/// Upgrade while holding the deploy-dir lock; the guard drops on every path.
fn upgrade_locked(pkgmgr: &dyn PackageManager) -> Result<(), SyncError> {
    let _lock = pkgmgr.lock_deploy_dir()?;
    pkgmgr.upgrade()
}

fn abort(stage: Stage, cause: SyncError) -> SyncOutcome {
    tracing::error!("nfsroot update aborted at {stage}: {cause}");
    SyncOutcome::AbortedAt { stage, cause }
}

fn join(packages: &[PackageId]) -> String {
    packages
        .iter()
        .map(PackageId::as_ref)
        .collect::<Vec<_>>()
        .join(" ")
}
