//! End-to-end pipeline runs against a scripted in-memory package manager.

use std::path::{Path, PathBuf};
use std::sync::{mpsc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use nfsup_core::{InstalledSet, PackageId};
use nfsup_sync::{
    pipeline::{self, InstallStep, Stage, SyncOutcome},
    stamp, DeployDirLock, PackageManager, SyncError,
};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    RefreshIndex,
    SyncFeed,
    ListInstalled,
    Install(Vec<String>),
    Lock,
    Upgrade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailAt {
    Nowhere,
    RefreshIndex,
    SyncFeed,
    ListInstalled,
    Install,
    Upgrade,
}

struct FakePackageManager {
    installed: Vec<&'static str>,
    fail_at: FailAt,
    deploy_dir: PathBuf,
    calls: Mutex<Vec<Call>>,
}

impl FakePackageManager {
    fn new(installed: &[&'static str], fail_at: FailAt, deploy_dir: &Path) -> Self {
        Self {
            installed: installed.to_vec(),
            fail_at,
            deploy_dir: deploy_dir.to_path_buf(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, call: Call, fail_here: FailAt) -> Result<(), SyncError> {
        self.calls.lock().unwrap().push(call);
        if self.fail_at == fail_here {
            return Err(SyncError::Command {
                command: format!("{fail_here:?}"),
                status: "exit status: 1".to_string(),
                output: "scripted failure".to_string(),
            });
        }
        Ok(())
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }
}

impl PackageManager for FakePackageManager {
    fn refresh_index(&self) -> Result<(), SyncError> {
        self.record(Call::RefreshIndex, FailAt::RefreshIndex)
    }

    fn sync_feed(&self) -> Result<(), SyncError> {
        self.record(Call::SyncFeed, FailAt::SyncFeed)
    }

    fn list_installed(&self) -> Result<InstalledSet, SyncError> {
        self.record(Call::ListInstalled, FailAt::ListInstalled)?;
        Ok(self.installed.iter().copied().map(PackageId::from).collect())
    }

    fn install(&self, packages: &[PackageId]) -> Result<(), SyncError> {
        let names = packages.iter().map(|p| p.0.clone()).collect();
        self.record(Call::Install(names), FailAt::Install)
    }

    fn upgrade(&self) -> Result<(), SyncError> {
        self.record(Call::Upgrade, FailAt::Upgrade)
    }

    fn lock_deploy_dir(&self) -> Result<DeployDirLock, SyncError> {
        self.calls.lock().unwrap().push(Call::Lock);
        DeployDirLock::acquire(&self.deploy_dir)
    }
}

fn desired(names: &[&str]) -> Vec<PackageId> {
    names.iter().copied().map(PackageId::from).collect()
}

struct Fixture {
    root: TempDir,
    deploy: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            root: TempDir::new().expect("nfsroot"),
            deploy: TempDir::new().expect("deploy"),
        }
    }

    fn manager(&self, installed: &[&'static str], fail_at: FailAt) -> FakePackageManager {
        FakePackageManager::new(installed, fail_at, self.deploy.path())
    }
}

#[test]
fn missing_packages_installed_then_upgraded_and_stamped() {
    let fx = Fixture::new();
    let pm = fx.manager(&["a"], FailAt::Nowhere);

    let outcome = pipeline::run(&desired(&["a", "b", "c"]), fx.root.path(), &pm);

    match &outcome {
        SyncOutcome::FullySucceeded { install, .. } => {
            assert_eq!(
                install,
                &InstallStep::Installed {
                    missing: desired(&["b", "c"])
                }
            );
        }
        other => panic!("expected full success, got {other:?}"),
    }
    assert_eq!(
        pm.calls(),
        vec![
            Call::RefreshIndex,
            Call::SyncFeed,
            Call::ListInstalled,
            Call::Install(vec!["a".into(), "b".into(), "c".into()]),
            Call::Lock,
            Call::Upgrade,
        ]
    );
    assert!(stamp::read_at(fx.root.path()).unwrap().is_some());
}

#[test]
fn nothing_to_install_still_upgrades_and_stamps() {
    let fx = Fixture::new();
    let pm = fx.manager(&["a"], FailAt::Nowhere);

    let outcome = pipeline::run(&desired(&["a"]), fx.root.path(), &pm);

    assert_eq!(outcome.install_step(), Some(&InstallStep::NothingToInstall));
    assert!(matches!(outcome, SyncOutcome::FullySucceeded { .. }));
    assert_eq!(pm.count(|c| matches!(c, Call::Install(_))), 0);
    assert_eq!(pm.count(|c| *c == Call::Upgrade), 1);
    assert!(stamp::read_at(fx.root.path()).unwrap().is_some());
}

#[test]
fn index_refresh_failure_aborts_before_touching_root() {
    let fx = Fixture::new();
    let pm = fx.manager(&[], FailAt::RefreshIndex);

    let outcome = pipeline::run(&desired(&["a"]), fx.root.path(), &pm);

    assert!(matches!(
        outcome,
        SyncOutcome::AbortedAt {
            stage: Stage::IndexRefresh,
            ..
        }
    ));
    assert_eq!(pm.calls(), vec![Call::RefreshIndex]);
    assert_eq!(stamp::read_at(fx.root.path()).unwrap(), None);
}

#[test]
fn each_early_failure_aborts_at_its_own_stage() {
    for (fail_at, stage) in [
        (FailAt::SyncFeed, Stage::FeedSync),
        (FailAt::ListInstalled, Stage::Inventory),
        (FailAt::Install, Stage::Install),
    ] {
        let fx = Fixture::new();
        let pm = fx.manager(&[], fail_at);

        let outcome = pipeline::run(&desired(&["a"]), fx.root.path(), &pm);

        match outcome {
            SyncOutcome::AbortedAt { stage: got, .. } => assert_eq!(got, stage),
            other => panic!("{fail_at:?}: expected abort, got {other:?}"),
        }
        assert_eq!(pm.count(|c| *c == Call::Upgrade), 0, "{fail_at:?}");
        assert_eq!(stamp::read_at(fx.root.path()).unwrap(), None, "{fail_at:?}");
    }
}

#[test]
fn upgrade_failure_is_a_warning_and_still_stamps() {
    let fx = Fixture::new();
    let pm = fx.manager(&["a"], FailAt::Upgrade);

    let outcome = pipeline::run(&desired(&["a", "b"]), fx.root.path(), &pm);

    match &outcome {
        SyncOutcome::SucceededWithUpgradeWarning { install, cause, .. } => {
            assert!(matches!(install, InstallStep::Installed { .. }));
            assert!(cause.to_string().contains("scripted failure"));
        }
        other => panic!("expected upgrade warning, got {other:?}"),
    }
    assert!(outcome.is_stamped());
    assert!(stamp::read_at(fx.root.path()).unwrap().is_some());
}

#[test]
fn deploy_lock_is_released_after_failed_upgrade() {
    let fx = Fixture::new();
    let pm = fx.manager(&[], FailAt::Upgrade);
    pipeline::run(&desired(&["a"]), fx.root.path(), &pm);

    let deploy = fx.deploy.path().to_path_buf();
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _lock = DeployDirLock::acquire(&deploy).expect("reacquire");
        let _ = tx.send(());
    });
    rx.recv_timeout(Duration::from_secs(5))
        .expect("deploy lock must be free after the run");
}

#[test]
fn stamp_moves_forward_on_every_successful_run() {
    let fx = Fixture::new();
    let before = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    stamp::write_at(fx.root.path(), before).unwrap();

    let pm = fx.manager(&["a"], FailAt::Upgrade);
    pipeline::run(&desired(&["a"]), fx.root.path(), &pm);

    let after = stamp::read_at(fx.root.path()).unwrap().expect("stamp");
    assert!(after > before, "{after} should be later than {before}");
}

#[test]
fn stamp_uses_injected_clock() {
    let fx = Fixture::new();
    let at = Utc.with_ymd_and_hms(2031, 5, 6, 7, 8, 9).unwrap();
    let pm = fx.manager(&[], FailAt::Nowhere);

    let outcome = pipeline::run_with_clock(&desired(&["a"]), fx.root.path(), &pm, || at);

    assert!(matches!(outcome, SyncOutcome::FullySucceeded { stamped_at, .. } if stamped_at == at));
    assert_eq!(
        std::fs::read_to_string(stamp::stamp_path(fx.root.path())).unwrap(),
        "2031-05-06T07:08:09Z\n"
    );
}

#[test]
fn unwritable_stamp_aborts_at_stamp() {
    let fx = Fixture::new();
    // A regular file where the etc directory should be.
    std::fs::write(fx.root.path().join("etc"), "not a directory").unwrap();
    let pm = fx.manager(&[], FailAt::Nowhere);

    let outcome = pipeline::run(&desired(&["a"]), fx.root.path(), &pm);

    assert!(matches!(
        outcome,
        SyncOutcome::AbortedAt {
            stage: Stage::Stamp,
            ..
        }
    ));
    assert!(!outcome.is_stamped());
}
