//! `nfsup status`: last synchronization and listener state per instance.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use nfsup_core::{config, InstanceConfig, Signal};
use nfsup_daemon::{paths::socket_path, send_signal, session::reply_note, DaemonError};
use nfsup_sync::stamp;

use super::home_dir;

/// Arguments for `nfsup status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Instance to report on (default: every configured instance).
    pub instance: Option<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;

        let names = match &self.instance {
            Some(instance) => vec![instance.clone()],
            None => config::list_instances_at(&home)
                .context("failed to list configured instances")?,
        };

        let mut report = Vec::with_capacity(names.len());
        for name in &names {
            let config = config::load_at(&home, name)
                .with_context(|| format!("failed to load instance '{name}'"))?;
            report.push(instance_status(&config)?);
        }

        if self.json {
            let rendered = match (self.instance.is_some(), report.first()) {
                (true, Some(single)) => serde_json::to_string_pretty(single),
                _ => serde_json::to_string_pretty(&report),
            };
            println!("{}", rendered.context("failed to serialize status JSON")?);
            return Ok(());
        }

        print_table(report);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum ListenerState {
    NotRunning,
    Idle,
    Running,
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
struct InstanceStatus {
    instance: String,
    rootfs_recipe: String,
    nfsroot: PathBuf,
    socket: Option<PathBuf>,
    listener: ListenerState,
    last_sync_at: Option<DateTime<Utc>>,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "instance")]
    instance: String,
    #[tabled(rename = "listener")]
    listener: String,
    #[tabled(rename = "last sync")]
    last_sync: String,
    #[tabled(rename = "nfsroot")]
    nfsroot: String,
}

fn instance_status(config: &InstanceConfig) -> Result<InstanceStatus> {
    let last_sync_at = stamp::read_at(&config.nfsroot)
        .with_context(|| format!("failed to read completion stamp of '{}'", config.instance))?;
    let socket = socket_path(&config.instance).ok();
    let listener = match &socket {
        Some(socket) => query_listener(socket),
        None => ListenerState::Unknown,
    };

    Ok(InstanceStatus {
        instance: config.instance.clone(),
        rootfs_recipe: config.rootfs_recipe.clone(),
        nfsroot: config.nfsroot.clone(),
        socket,
        listener,
        last_sync_at,
    })
}

fn query_listener(socket: &Path) -> ListenerState {
    match send_signal(socket, Signal::Status) {
        Ok(reply) => listener_state_from_reply(&reply),
        Err(DaemonError::DaemonNotRunning { .. }) => ListenerState::NotRunning,
        Err(err) => {
            eprintln!("warning: cannot query {}: {err}", socket.display());
            ListenerState::Unknown
        }
    }
}

fn listener_state_from_reply(reply: &str) -> ListenerState {
    let state = reply_note(reply).and_then(|note| note.split(',').next());
    match state {
        Some("idle") => ListenerState::Idle,
        Some("running") => ListenerState::Running,
        _ => ListenerState::Unknown,
    }
}

fn print_table(report: Vec<InstanceStatus>) {
    let listening = report
        .iter()
        .filter(|s| matches!(s.listener, ListenerState::Idle | ListenerState::Running))
        .count();
    println!(
        "nfsup v{} | {} instances | {} listening",
        env!("CARGO_PKG_VERSION"),
        report.len(),
        listening,
    );

    if report.is_empty() {
        println!("No instances configured. Run `nfsup init` first.");
        return;
    }

    println!(
        "Indicators: {} IDLE  {} SYNCING  {} NOT RUNNING  {} UNKNOWN",
        listener_indicator(ListenerState::Idle),
        listener_indicator(ListenerState::Running),
        listener_indicator(ListenerState::NotRunning),
        listener_indicator(ListenerState::Unknown),
    );

    let now = Utc::now();
    let rows: Vec<StatusTableRow> = report
        .into_iter()
        .map(|status| StatusTableRow {
            instance: status.instance,
            listener: listener_label(status.listener).to_string(),
            last_sync: status
                .last_sync_at
                .map(|at| format_age(at, now))
                .unwrap_or_else(|| "never".to_string()),
            nfsroot: status.nfsroot.display().to_string(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn listener_label(state: ListenerState) -> &'static str {
    match state {
        ListenerState::NotRunning => "NOT RUNNING",
        ListenerState::Idle => "IDLE",
        ListenerState::Running => "SYNCING",
        ListenerState::Unknown => "UNKNOWN",
    }
}

fn listener_indicator(state: ListenerState) -> String {
    match state {
        ListenerState::Idle => "■".green().bold().to_string(),
        ListenerState::Running => "■".yellow().bold().to_string(),
        ListenerState::NotRunning => "■".bright_black().bold().to_string(),
        ListenerState::Unknown => "■".red().bold().to_string(),
    }
}

/// Coarse "N units ago" rendering of `at` relative to `now`.
fn format_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - at).num_seconds();
    if secs < 0 {
        return "in the future".to_string();
    }
    match secs {
        0..=59 => "just now".to_string(),
        60..=3_599 => format!("{}m ago", secs / 60),
        3_600..=86_399 => format!("{}h ago", secs / 3_600),
        _ => format!("{}d ago", secs / 86_400),
    }
}
