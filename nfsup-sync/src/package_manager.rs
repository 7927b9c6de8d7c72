//! Package-manager capability consumed by the pipeline.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use nfsup_core::{InstalledSet, PackageId};

use crate::error::{io_err, SyncError};

/// Operations against one target root and one package feed.
///
/// Implementations shell out to the real tools; tests provide fakes.
pub trait PackageManager: Send + Sync {
    /// Regenerate the feed's index metadata from the built packages.
    fn refresh_index(&self) -> Result<(), SyncError>;

    /// Pull the feed metadata into the manager's local view.
    fn sync_feed(&self) -> Result<(), SyncError>;

    /// Packages currently installed on the target root.
    fn list_installed(&self) -> Result<InstalledSet, SyncError>;

    /// Install `packages`; already-installed entries are a no-op for the tool.
    fn install(&self, packages: &[PackageId]) -> Result<(), SyncError>;

    /// Upgrade installed packages to the versions present in the feed.
    ///
    /// Callers hold the guard from [`PackageManager::lock_deploy_dir`] for the
    /// duration of this call.
    fn upgrade(&self) -> Result<(), SyncError>;

    /// Take the deployment-directory lock shared with the build.
    fn lock_deploy_dir(&self) -> Result<DeployDirLock, SyncError>;
}

/// Exclusive advisory lock on `<deploy-dir>/deploy.lock`.
///
/// The lock is released when the guard is dropped, on every exit path. The
/// lock file itself is left in place, same as the build does.
#[derive(Debug)]
pub struct DeployDirLock {
    path: PathBuf,
    file: File,
}

impl DeployDirLock {
    pub const FILE_NAME: &'static str = "deploy.lock";

    /// Block until the lock in `deploy_dir` is held.
    pub fn acquire(deploy_dir: &Path) -> Result<Self, SyncError> {
        std::fs::create_dir_all(deploy_dir).map_err(|e| io_err(deploy_dir, e))?;
        let path = deploy_dir.join(Self::FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;
        file.lock_exclusive().map_err(|e| io_err(&path, e))?;
        tracing::debug!("acquired deploy lock {}", path.display());
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DeployDirLock {
    fn drop(&mut self) {
        match self.file.unlock() {
            Ok(()) => tracing::debug!("released deploy lock {}", self.path.display()),
            // Closing the descriptor below still drops the lock.
            Err(err) => tracing::warn!("unlock {} failed: {err}", self.path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn acquire_creates_lock_file() {
        let dir = TempDir::new().unwrap();
        let deploy = dir.path().join("deploy").join("ipk");
        let lock = DeployDirLock::acquire(&deploy).expect("lock");
        assert!(lock.path().exists());
        assert_eq!(lock.path(), deploy.join("deploy.lock"));
    }

    #[test]
    fn second_holder_waits_until_first_drops() {
        let dir = TempDir::new().unwrap();
        let deploy = dir.path().to_path_buf();
        let first = DeployDirLock::acquire(&deploy).expect("first lock");

        let (tx, rx) = mpsc::channel();
        let waiter = std::thread::spawn(move || {
            let _second = DeployDirLock::acquire(&deploy).expect("second lock");
            tx.send(()).expect("signal acquired");
        });

        assert!(
            rx.recv_timeout(Duration::from_millis(200)).is_err(),
            "second lock must block while the first is held"
        );
        drop(first);
        rx.recv_timeout(Duration::from_secs(5))
            .expect("second lock acquired after release");
        waiter.join().unwrap();
    }

    #[test]
    fn lock_is_visible_to_other_handles_until_dropped() {
        let dir = TempDir::new().unwrap();
        let lock = DeployDirLock::acquire(dir.path()).expect("lock");
        let other = File::open(lock.path()).unwrap();

        assert!(
            other.try_lock_exclusive().is_err(),
            "a held deploy lock must exclude other handles"
        );
        drop(lock);
        other
            .try_lock_exclusive()
            .expect("lock free once the guard is dropped");
    }
}
