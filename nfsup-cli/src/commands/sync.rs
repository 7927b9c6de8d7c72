//! `nfsup sync <instance>`: one foreground synchronization.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;

use nfsup_core::{config, BuildSystem, ManifestBuildSystem, Signal};
use nfsup_daemon::{
    init_tracing, paths::socket_path, provision_toolchain, send_signal, DaemonError,
    NfsrootSyncJob,
};
use nfsup_sync::{InstallStep, SyncOutcome};

use super::home_dir;

/// Arguments for `nfsup sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Instance whose nfsroot is synchronized.
    pub instance: String,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        init_tracing();
        let home = home_dir()?;
        let config = config::load_at(&home, &self.instance)
            .with_context(|| format!("failed to load instance '{}'", self.instance))?;

        ensure_listener_idle(&config.instance)?;

        let build: Arc<dyn BuildSystem> = Arc::new(ManifestBuildSystem::new(&config.manifest));
        let toolchain = provision_toolchain(build.as_ref(), &config.rootfs_recipe)
            .context("tool provisioning failed")?;

        let instance = config.instance.clone();
        let job = NfsrootSyncJob::new(config, build, toolchain);
        let outcome = job
            .run_once()
            .with_context(|| format!("sync failed for '{instance}'"))?;

        match &outcome {
            SyncOutcome::FullySucceeded { install, .. } => {
                println!("✓ '{instance}' {}", outcome.summary());
                print_install(install);
            }
            SyncOutcome::SucceededWithUpgradeWarning { install, .. } => {
                println!("! '{instance}' {}", outcome.summary());
                print_install(install);
            }
            SyncOutcome::AbortedAt { .. } => {
                bail!("'{instance}' {}", outcome.summary());
            }
        }
        Ok(())
    }
}

/// A listener owns the instance's admission gate; syncing beside it would run
/// two pipelines against the same root.
fn ensure_listener_idle(instance: &str) -> Result<()> {
    let socket = match socket_path(instance) {
        Ok(socket) => socket,
        // Without a user name no listener could have bound a socket either.
        Err(DaemonError::UnknownUser) => return Ok(()),
        Err(err) => return Err(err).context("cannot locate the listener socket"),
    };
    match send_signal(&socket, Signal::Status) {
        Err(DaemonError::DaemonNotRunning { .. }) => Ok(()),
        Ok(_) => bail!(
            "listener for '{instance}' is running; use `nfsup notify {instance}` to request a sync"
        ),
        Err(err) => Err(err).with_context(|| {
            format!("cannot tell whether the listener for '{instance}' is running")
        }),
    }
}

fn print_install(install: &InstallStep) {
    match install {
        InstallStep::NothingToInstall => println!("  ·  nothing to install"),
        InstallStep::Installed { missing } => {
            for package in missing {
                println!("  +  {package}");
            }
        }
    }
}
