//! nfsup core library: domain types, instance configuration, build-system
//! capability, errors.
//!
//! - [`types`]: package ids, job state, signals
//! - [`error`]: [`CoreError`], [`BuildError`]
//! - [`config`]: per-instance YAML load / save / init
//! - [`build`]: [`BuildSystem`] trait and the manifest-backed implementation

pub mod build;
pub mod config;
pub mod error;
pub mod types;

pub use build::{BuildManifest, BuildSystem, ManifestBuildSystem};
pub use config::InstanceConfig;
pub use error::{BuildError, CoreError};
pub use types::{
    parse_package_list, DesiredSet, InstalledSet, JobState, PackageBackend, PackageId, Signal,
};
