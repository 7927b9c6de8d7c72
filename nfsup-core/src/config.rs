//! Per-instance YAML configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.nfsup/
//!   build.yaml                (default build manifest)
//!   instances/
//!     <instance>.yaml         (one file per instance, mode 0600)
//! ```
//!
//! # API pattern
//!
//! Every function touching the filesystem has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Manifest file name used when an instance does not name one.
pub const DEFAULT_MANIFEST: &str = "build.yaml";

/// Everything a listener instance needs to know to serve one nfsroot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Instance identifier; part of the socket path.
    pub instance: String,
    /// Image recipe whose `IMAGE_INSTALL` defines the desired packages.
    pub rootfs_recipe: String,
    /// Target root filesystem kept in sync.
    pub nfsroot: PathBuf,
    /// Build manifest consulted for recipe variables.
    pub manifest: PathBuf,
}

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.nfsup/`
pub fn nfsup_root(home: &Path) -> PathBuf {
    home.join(".nfsup")
}

/// `<home>/.nfsup/instances/<instance>.yaml` (pure, no I/O).
pub fn config_path_at(home: &Path, instance: &str) -> PathBuf {
    nfsup_root(home)
        .join("instances")
        .join(format!("{instance}.yaml"))
}

/// `<home>/.nfsup/build.yaml` (pure, no I/O).
pub fn default_manifest_path_at(home: &Path) -> PathBuf {
    nfsup_root(home).join(DEFAULT_MANIFEST)
}

/// Reject instance names that would escape the instances directory or the
/// socket file name.
pub fn validate_instance(instance: &str) -> Result<(), CoreError> {
    let valid = !instance.is_empty()
        && instance != "."
        && instance != ".."
        && instance
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidInstance(instance.to_string()))
    }
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load the configuration of `instance`.
///
/// Returns `CoreError::ConfigNotFound` if absent,
/// `CoreError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(home: &Path, instance: &str) -> Result<InstanceConfig, CoreError> {
    validate_instance(instance)?;
    let path = config_path_at(home, instance);
    if !path.exists() {
        return Err(CoreError::ConfigNotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| CoreError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load(instance: &str) -> Result<InstanceConfig, CoreError> {
    load_at(&home()?, instance)
}

/// List configured instance names, sorted.
pub fn list_instances_at(home: &Path) -> Result<Vec<String>, CoreError> {
    let dir = nfsup_root(home).join("instances");
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut names: Vec<String> = std::fs::read_dir(&dir)?
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            name.strip_suffix(".yaml").map(str::to_owned)
        })
        .collect();
    names.sort();
    Ok(names)
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save `config` to `<home>/.nfsup/instances/<instance>.yaml`.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &InstanceConfig) -> Result<(), CoreError> {
    validate_instance(&config.instance)?;
    let path = config_path_at(home, &config.instance);
    if let Some(dir) = path.parent() {
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
            set_dir_permissions(dir)?;
        }
    }
    let tmp_path = path.with_file_name(format!("{}.yaml.tmp", config.instance));

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(config: &InstanceConfig) -> Result<(), CoreError> {
    save_at(&home()?, config)
}

// ---------------------------------------------------------------------------
// 4. Init
// ---------------------------------------------------------------------------

/// Create or replace the configuration of `instance`.
///
/// When `manifest` is `None` the instance points at `~/.nfsup/build.yaml`.
pub fn init_at(
    home: &Path,
    instance: &str,
    rootfs_recipe: &str,
    nfsroot: PathBuf,
    manifest: Option<PathBuf>,
) -> Result<InstanceConfig, CoreError> {
    let config = InstanceConfig {
        instance: instance.to_string(),
        rootfs_recipe: rootfs_recipe.to_string(),
        nfsroot,
        manifest: manifest.unwrap_or_else(|| default_manifest_path_at(home)),
    };
    save_at(home, &config)?;
    Ok(config)
}

/// `init_at` convenience wrapper.
pub fn init(
    instance: &str,
    rootfs_recipe: &str,
    nfsroot: PathBuf,
    manifest: Option<PathBuf>,
) -> Result<InstanceConfig, CoreError> {
    init_at(&home()?, instance, rootfs_recipe, nfsroot, manifest)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Current user's home directory.
pub fn home() -> Result<PathBuf, CoreError> {
    dirs::home_dir().ok_or(CoreError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), CoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), CoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
