//! Single-flight admission of sync jobs.
//!
//! The gate owns the process-wide [`JobState`]. A trigger either flips it
//! Idle → Running in one atomic step and launches the job on the blocking
//! pool, or is rejected outright. Rejected triggers are never queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;

use nfsup_core::JobState;

/// Result of [`AdmissionGate::try_start`].
#[derive(Debug)]
pub enum Admission {
    /// The job was launched; the handle resolves when it finishes.
    Admitted(JoinHandle<()>),
    /// Another job holds the slot. Nothing was launched.
    Rejected,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted(_))
    }
}

#[derive(Debug, Default)]
pub struct AdmissionGate {
    running: Arc<AtomicBool>,
}

impl AdmissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> JobState {
        if self.running.load(Ordering::Acquire) {
            JobState::Running
        } else {
            JobState::Idle
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == JobState::Running
    }

    /// Launch `job` on the blocking pool unless one is already running.
    ///
    /// Never blocks; must be called from within a tokio runtime.
    pub fn try_start<F>(&self, job: F) -> Admission
    where
        F: FnOnce() + Send + 'static,
    {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Admission::Rejected;
        }

        let slot = Slot(self.running.clone());
        let handle = tokio::task::spawn_blocking(move || {
            let _slot = slot;
            job();
        });
        Admission::Admitted(handle)
    }
}

/// Holds the Running state; dropping it (normally or while unwinding)
/// returns the gate to Idle.
struct Slot(Arc<AtomicBool>);

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
