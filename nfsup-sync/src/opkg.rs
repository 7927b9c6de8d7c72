//! `opkg` backend for ipk feeds.
//!
//! Every invocation runs against the offline root with a generated config:
//!
//! ```text
//! opkg -f <IPKGCONF_TARGET> -o <nfsroot> --volatile-cache --force_postinstall <cmd> …
//! ```
//!
//! with the toolchain `PATH` and the offline-root variables maintainer
//! scripts expect (`D`, `OFFLINE_ROOT`, `OPKG_OFFLINE_ROOT`, …).

use std::ffi::OsString;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Command;

use nfsup_core::{InstalledSet, PackageId};

use crate::error::{io_err, SyncError};
use crate::package_manager::{DeployDirLock, PackageManager};
use crate::plan::{FeedSource, SyncPlan};
use crate::toolchain::Toolchain;

const OPKG: &str = "opkg";
const OPKG_MAKE_INDEX: &str = "opkg-make-index";

#[derive(Debug)]
pub struct OpkgPackageManager {
    nfsroot: PathBuf,
    deploy_dir: PathBuf,
    feeds: Vec<FeedSource>,
    config_file: PathBuf,
    env: Vec<(&'static str, OsString)>,
}

impl OpkgPackageManager {
    /// Write the opkg config for `plan` and build the backend.
    pub fn new(plan: &SyncPlan, toolchain: &Toolchain) -> Result<Self, SyncError> {
        if let Some(dir) = plan.config_file.parent() {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        std::fs::write(&plan.config_file, render_config(&plan.feeds))
            .map_err(|e| io_err(&plan.config_file, e))?;

        let root = plan.nfsroot.as_os_str().to_os_string();
        let mut env = vec![
            ("PATH", toolchain.path_env()?),
            ("D", root.clone()),
            ("OFFLINE_ROOT", root.clone()),
            ("IPKG_OFFLINE_ROOT", root.clone()),
            ("OPKG_OFFLINE_ROOT", root),
        ];
        if let Some(dir) = &plan.intercepts_dir {
            env.push(("INTERCEPT_DIR", dir.as_os_str().to_os_string()));
        }
        if let Some(dir) = &plan.native_root {
            env.push(("NATIVE_ROOT", dir.as_os_str().to_os_string()));
        }

        Ok(Self {
            nfsroot: plan.nfsroot.clone(),
            deploy_dir: plan.deploy_dir.clone(),
            feeds: plan.feeds.clone(),
            config_file: plan.config_file.clone(),
            env,
        })
    }

    /// Path of the generated opkg config.
    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    fn opkg(&self, args: &[&str]) -> Result<String, SyncError> {
        let mut cmd = Command::new(OPKG);
        cmd.arg("-f")
            .arg(&self.config_file)
            .arg("-o")
            .arg(&self.nfsroot)
            .args(["--volatile-cache", "--force_postinstall"])
            .args(args);
        self.run(cmd)
    }

    fn run(&self, mut cmd: Command) -> Result<String, SyncError> {
        cmd.envs(self.env.iter().map(|(k, v)| (*k, v)));
        let rendered = render_command(&cmd);
        tracing::debug!("running: {rendered}");

        let output = cmd.output().map_err(|e| SyncError::Command {
            command: rendered.clone(),
            status: "not started".to_string(),
            output: e.to_string(),
        })?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            return Err(SyncError::Command {
                command: rendered,
                status: output.status.to_string(),
                output: format!("{stdout}{}", String::from_utf8_lossy(&output.stderr)),
            });
        }
        Ok(stdout)
    }
}

impl PackageManager for OpkgPackageManager {
    fn refresh_index(&self) -> Result<(), SyncError> {
        if self.feeds.is_empty() {
            tracing::warn!("no feed directories under {}", self.deploy_dir.display());
        }
        for feed in &self.feeds {
            let dir = self.deploy_dir.join(&feed.arch);
            let packages = dir.join("Packages");
            // `-r` reads the previous index, so a never-indexed dir needs an empty one.
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&packages)
                .map_err(|e| io_err(&packages, e))?;
            let mut cmd = Command::new(OPKG_MAKE_INDEX);
            cmd.args(["--checksum", "md5", "--checksum", "sha256", "-r"])
                .arg(&packages)
                .arg("-p")
                .arg(&packages)
                .arg("-m")
                .arg(&dir);
            self.run(cmd)?;
        }
        tracing::info!("package index updated");
        Ok(())
    }

    fn sync_feed(&self) -> Result<(), SyncError> {
        self.opkg(&["update"]).map(|_| ())
    }

    fn list_installed(&self) -> Result<InstalledSet, SyncError> {
        self.opkg(&["list-installed"])
            .map(|output| parse_list_installed(&output))
    }

    fn install(&self, packages: &[PackageId]) -> Result<(), SyncError> {
        if packages.is_empty() {
            return Ok(());
        }
        let mut args = vec!["install"];
        args.extend(packages.iter().map(|p| p.0.as_str()));
        self.opkg(&args).map(|_| ())
    }

    fn upgrade(&self) -> Result<(), SyncError> {
        let output = self.opkg(&["upgrade"])?;
        tracing::debug!("upgrade output:\n{output}");
        for line in output.lines() {
            let mut words = line.split(' ');
            match (words.next(), words.next()) {
                (Some("Installing"), Some(pkg)) => tracing::info!("installing: {pkg}"),
                (Some("Upgrading"), Some(pkg)) => tracing::info!("upgrading: {pkg}"),
                _ => {}
            }
        }
        Ok(())
    }

    fn lock_deploy_dir(&self) -> Result<DeployDirLock, SyncError> {
        DeployDirLock::acquire(&self.deploy_dir)
    }
}

/// opkg configuration listing the local feeds, later arches preferred.
pub fn render_config(feeds: &[FeedSource]) -> String {
    let mut out = String::from("# generated by nfsup; overwritten on every run\n");
    for (idx, feed) in feeds.iter().enumerate() {
        out.push_str(&format!("arch {} {}\n", feed.arch, 1 + idx * 5));
    }
    for feed in feeds {
        out.push_str(&format!("src {} {}\n", feed.arch, feed.uri));
    }
    out
}

/// Package names from `opkg list-installed` lines (`name - version`).
pub fn parse_list_installed(output: &str) -> InstalledSet {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(PackageId::from)
        .collect()
}

fn render_command(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|part| part.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}
