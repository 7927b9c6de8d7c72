//! `nfsup init <instance> --recipe <name> --nfsroot <dir> [--manifest <file>]`

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use nfsup_core::config;

use super::home_dir;

/// Create or replace an instance configuration.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Instance name; part of the listener socket path.
    pub instance: String,

    /// Image recipe whose IMAGE_INSTALL lists the packages to keep installed.
    #[arg(long, short = 'r')]
    pub recipe: String,

    /// Root filesystem directory exported over NFS. Must exist.
    #[arg(long)]
    pub nfsroot: PathBuf,

    /// Build manifest with recipe variables (default: ~/.nfsup/build.yaml).
    #[arg(long, short = 'm')]
    pub manifest: Option<PathBuf>,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let nfsroot = self
            .nfsroot
            .canonicalize()
            .with_context(|| format!("cannot resolve nfsroot '{}'", self.nfsroot.display()))?;
        let manifest = self.manifest.as_deref().map(absolute).transpose()?;

        let config = config::init_at(&home, &self.instance, &self.recipe, nfsroot, manifest)
            .with_context(|| format!("failed to init instance '{}'", self.instance))?;

        println!("✓ Configured instance '{}'", config.instance);
        println!("  nfsroot:  {}", config.nfsroot.display());
        println!("  manifest: {}", config.manifest.display());
        println!(
            "  Saved to: {}",
            config::config_path_at(&home, &config.instance).display()
        );
        Ok(())
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("cannot determine current directory")?;
    Ok(cwd.join(path))
}
