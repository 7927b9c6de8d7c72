//! nfsup: keeps an NFS-exported root filesystem in sync with the build.
//!
//! # Usage
//!
//! ```text
//! nfsup init <instance> --recipe <rootfs-recipe> --nfsroot <dir> [--manifest <file>]
//! nfsup serve <instance>
//! nfsup notify <instance> [--signal bitbake_done|status|stop]
//! nfsup status [<instance>] [--json]
//! nfsup sync <instance>
//! ```

mod commands;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    init::InitArgs, notify::NotifyArgs, serve::ServeArgs, status::StatusArgs, sync::SyncArgs,
};
use nfsup_core::Signal;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "nfsup",
    version,
    about = "Keep an nfsroot in sync with freshly built package feeds",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or replace an instance configuration.
    Init(InitArgs),

    /// Run the updater listener for an instance in the foreground.
    Serve(ServeArgs),

    /// Send a signal to a running listener (default: bitbake_done).
    Notify(NotifyArgs),

    /// Show last synchronization and listener state.
    Status(StatusArgs),

    /// Synchronize an nfsroot once, without a listener.
    Sync(SyncArgs),
}

// ---------------------------------------------------------------------------
// Shared Signal argument
// ---------------------------------------------------------------------------

/// Thin wrapper so clap can parse a [`Signal`] token.
#[derive(Debug, Clone, Copy)]
pub struct SignalArg(pub Signal);

impl FromStr for SignalArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Signal::parse(s).map(Self).ok_or_else(|| {
            format!(
                "unknown signal '{s}'; expected: {}, {}, {}",
                Signal::BUILD_DONE,
                Signal::STATUS,
                Signal::STOP
            )
        })
    }
}

impl fmt::Display for SignalArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Serve(args) => args.run(),
        Commands::Notify(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Sync(args) => args.run(),
    }
}
