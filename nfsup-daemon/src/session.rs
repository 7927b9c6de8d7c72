//! One-shot session handling for a single accepted connection.
//!
//! ```text
//! AwaitingSignal --read n>0--> Responding(reply) --write--> Closed
//!        \--read 0 bytes-----------------------------------> Closed
//! ```
//!
//! Exactly one read and at most one reply per connection. A job launched by
//! the session keeps running after the connection is gone.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;

use nfsup_core::Signal;

use crate::admission::{Admission, AdmissionGate};
use crate::error::{io_err, DaemonError};
use crate::job::SyncJob;

/// Largest signal frame read from a client.
pub const MAX_FRAME: usize = 1024;

pub const NOTE_STARTED: &str = "sync started";
pub const NOTE_ALREADY_RUNNING: &str = "sync already running";
pub const NOTE_STOPPING: &str = "stopping";
pub const NOTE_UNEXPECTED: &str = "unexpected message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    AwaitingSignal,
    Responding(String),
    Closed,
}

/// Shared by every session of one listener.
pub struct SessionContext {
    pub gate: Arc<AdmissionGate>,
    pub job: Arc<dyn SyncJob>,
    pub shutdown: broadcast::Sender<()>,
}

/// Drive one connection from its first read to close.
pub async fn handle<S>(mut stream: S, ctx: &SessionContext) -> Result<(), DaemonError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut state = SessionState::AwaitingSignal;
    loop {
        state = match state {
            SessionState::AwaitingSignal => {
                let mut buf = [0u8; MAX_FRAME];
                let n = stream
                    .read(&mut buf)
                    .await
                    .map_err(|e| io_err("daemon socket read", e))?;
                if n == 0 {
                    tracing::debug!("client closed without sending a signal");
                    SessionState::Closed
                } else {
                    let payload = String::from_utf8_lossy(&buf[..n]);
                    SessionState::Responding(respond(&payload, ctx))
                }
            }
            SessionState::Responding(reply) => {
                stream
                    .write_all(reply.as_bytes())
                    .await
                    .map_err(|e| io_err("daemon socket write", e))?;
                stream
                    .flush()
                    .await
                    .map_err(|e| io_err("daemon socket flush", e))?;
                SessionState::Closed
            }
            SessionState::Closed => {
                let _ = stream.shutdown().await;
                return Ok(());
            }
        };
    }
}

/// Act on `payload` and build the reply line.
fn respond(payload: &str, ctx: &SessionContext) -> String {
    let echo = payload.trim_end();
    let note = match Signal::parse(payload) {
        Some(Signal::BuildDone) => {
            let job = ctx.job.clone();
            match ctx.gate.try_start(move || job.run()) {
                Admission::Admitted(_) => {
                    tracing::info!("build finished, starting nfsroot sync");
                    NOTE_STARTED.to_string()
                }
                Admission::Rejected => {
                    tracing::info!("build finished, but a sync is already running");
                    NOTE_ALREADY_RUNNING.to_string()
                }
            }
        }
        Some(Signal::Status) => status_note(ctx),
        Some(Signal::Stop) => {
            tracing::info!("stop requested over socket");
            let _ = ctx.shutdown.send(());
            NOTE_STOPPING.to_string()
        }
        None => {
            tracing::warn!(message = %echo, "unexpected message");
            NOTE_UNEXPECTED.to_string()
        }
    };
    format_reply(echo, &note)
}

fn status_note(ctx: &SessionContext) -> String {
    let last = match ctx.job.last_synced() {
        Ok(Some(at)) => at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        Ok(None) => "never".to_string(),
        Err(err) => {
            tracing::warn!(error = %err, "cannot read completion stamp");
            "unknown".to_string()
        }
    };
    format!("{}, last sync {last}", ctx.gate.state())
}

/// `Server received: <echo> (<note>)`
pub fn format_reply(echo: &str, note: &str) -> String {
    format!("Server received: {echo} ({note})")
}

/// The parenthesized note at the end of a reply, if well-formed.
pub fn reply_note(reply: &str) -> Option<&str> {
    let body = reply.strip_prefix("Server received: ")?.trim_end();
    let open = body.rfind(" (")?;
    body[open + 2..].strip_suffix(')')
}
