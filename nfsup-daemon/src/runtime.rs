use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::Path;
use std::sync::Arc;

use tokio::net::UnixListener;
use tokio::sync::broadcast;

use nfsup_core::{config, BuildSystem, InstanceConfig, ManifestBuildSystem};
use nfsup_sync::Toolchain;

use crate::admission::AdmissionGate;
use crate::error::{io_err, DaemonError};
use crate::job::{provision_toolchain, NfsrootSyncJob, SyncJob};
use crate::paths::socket_path;
use crate::session::{self, SessionContext};

/// Load `instance`, start the listener, and block until it exits.
pub fn start_blocking(home: &Path, instance: &str) -> Result<(), DaemonError> {
    init_tracing();
    let config = config::load_at(home, instance)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(config))
}

/// Provision tools, then serve the instance socket until stopped.
pub async fn run(config: InstanceConfig) -> Result<(), DaemonError> {
    let build: Arc<dyn BuildSystem> = Arc::new(ManifestBuildSystem::new(&config.manifest));
    let socket = socket_path(&config.instance)?;
    run_on(config, build, &socket).await
}

/// [`run`] against an explicit socket path and build system.
///
/// A live listener on `socket` is detected before any tool is provisioned.
pub async fn run_on(
    config: InstanceConfig,
    build: Arc<dyn BuildSystem>,
    socket: &Path,
) -> Result<(), DaemonError> {
    prepare_socket_for_bind(socket)?;
    let toolchain = provision_tools(build.clone(), config.rootfs_recipe.clone()).await?;

    tracing::info!(
        instance = %config.instance,
        nfsroot = %config.nfsroot.display(),
        "nfsroot updater ready",
    );
    let job = Arc::new(NfsrootSyncJob::new(config, build, toolchain));
    serve(socket, job).await
}

/// Make every tool the rootfs recipe's package backend needs available.
/// Any failure here is fatal for the listener.
pub async fn provision_tools(
    build: Arc<dyn BuildSystem>,
    rootfs_recipe: String,
) -> Result<Toolchain, DaemonError> {
    tokio::task::spawn_blocking(move || provision_toolchain(build.as_ref(), &rootfs_recipe))
        .await
        .map_err(|err| DaemonError::Protocol(format!("provisioning task join failure: {err}")))?
        .map_err(DaemonError::Provisioning)
}

/// Accept connections on `socket` until a `stop` signal or Ctrl-C.
///
/// A sync still running at shutdown is left to finish on the blocking pool.
pub async fn serve(socket: &Path, job: Arc<dyn SyncJob>) -> Result<(), DaemonError> {
    prepare_socket_for_bind(socket)?;
    let listener = bind_private(socket)?;
    tracing::info!(socket = %socket.display(), "listening for build notifications");

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(4);
    let ctx = Arc::new(SessionContext {
        gate: Arc::new(AdmissionGate::new()),
        job,
        shutdown: shutdown_tx.clone(),
    });

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => {}
                signal = tokio::signal::ctrl_c() => match signal {
                    Ok(()) => {
                        tracing::info!("received ctrl-c, shutting down");
                        let _ = shutdown.send(());
                    }
                    Err(err) => tracing::warn!(error = %err, "ctrl-c handler failed"),
                },
            }
        })
    };

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let stream = match accepted {
                    Ok((stream, _)) => stream,
                    Err(err) => {
                        tracing::warn!(error = %err, "accept failed");
                        continue;
                    }
                };
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(err) = session::handle(stream, &ctx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    signal_handle.abort();
    if ctx.gate.is_running() {
        tracing::info!("waiting for the running sync to finish");
    }
    match fs::remove_file(socket) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => tracing::warn!(error = %err, "cannot remove daemon socket"),
    }
    tracing::info!("listener stopped");
    Ok(())
}

/// Remove a socket file left behind by a dead listener; refuse a live one.
pub fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if fs::symlink_metadata(socket).is_err() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::SocketInUse {
                socket: socket.to_path_buf(),
            });
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

/// Install the `RUST_LOG`-filtered subscriber; `log` records are bridged.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

/// Bind `socket` so that it is never reachable with a mode wider than 0600.
///
/// The socket is created inside a fresh 0700 directory next to `socket`,
/// restricted there, then renamed into place.
fn bind_private(socket: &Path) -> Result<UnixListener, DaemonError> {
    let parent = match socket.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let staging = tempfile::Builder::new()
        .prefix(".nfsup-bind-")
        .tempdir_in(parent)
        .map_err(|e| io_err(parent, e))?;
    let staged = staging.path().join("sock");

    let listener = UnixListener::bind(&staged).map_err(|e| io_err(&staged, e))?;
    set_socket_permissions(&staged)?;
    fs::rename(&staged, socket).map_err(|e| io_err(socket, e))?;
    Ok(listener)
}

fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}
