//! `nfsup notify <instance>`: what the build runs when it finishes.

use anyhow::{Context, Result};
use clap::Args;

use nfsup_core::Signal;
use nfsup_daemon::{paths::socket_path, send_signal};

use crate::SignalArg;

#[derive(Args, Debug)]
pub struct NotifyArgs {
    /// Instance whose listener receives the signal.
    pub instance: String,

    /// Signal to send.
    #[arg(long, short = 's', default_value = Signal::BUILD_DONE)]
    pub signal: SignalArg,
}

impl NotifyArgs {
    pub fn run(self) -> Result<()> {
        let socket = socket_path(&self.instance)?;
        let reply = send_signal(&socket, self.signal.0)
            .with_context(|| format!("failed to send '{}' to '{}'", self.signal, self.instance))?;
        println!("{reply}");
        Ok(())
    }
}
