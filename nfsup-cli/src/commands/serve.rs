//! `nfsup serve <instance>`: run the listener in the foreground.

use anyhow::{Context, Result};
use clap::Args;

use nfsup_daemon::start_blocking;

use super::home_dir;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Instance to serve.
    pub instance: String,
}

impl ServeArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        start_blocking(&home, &self.instance)
            .with_context(|| format!("listener for '{}' exited with error", self.instance))
    }
}
