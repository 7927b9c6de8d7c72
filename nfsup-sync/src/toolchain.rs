//! Native tool provisioning.
//!
//! The package-manager backend runs tools built by the build system
//! (`opkg`, `opkg-make-index`, `depmod`, …). Before serving, each required
//! tool is located in its recipe sysroot, provisioned through the
//! [`BuildSystem`] if absent, and its directory is recorded in a
//! [`Toolchain`]. Subprocesses get the toolchain's `PATH`; the daemon's own
//! environment is left alone.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use nfsup_core::{BuildSystem, PackageBackend};

use crate::error::{io_err, SyncError};

/// Where a tool's recipe installs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// `<STAGING_DIR_NATIVE><bindir>`
    Native,
    /// `<COMPONENTS_DIR>/<MACHINE_ARCH>/<recipe><bindir>`
    Cross,
}

/// One tool the backend needs on `PATH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRequirement {
    pub recipe: &'static str,
    pub tool: &'static str,
    pub bindir: &'static str,
    pub kind: ToolKind,
    /// Run the tool under `pseudo` through a generated wrapper script.
    pub pseudo_wrapper: bool,
}

impl ToolRequirement {
    const fn native(recipe: &'static str, tool: &'static str, bindir: &'static str) -> Self {
        Self {
            recipe,
            tool,
            bindir,
            kind: ToolKind::Native,
            pseudo_wrapper: false,
        }
    }
}

/// Tools needed for `backend`, in the order they are provisioned.
pub fn requirements(backend: PackageBackend) -> Vec<ToolRequirement> {
    let mut reqs = vec![
        ToolRequirement::native(
            "virtual/update-alternatives-native",
            "update-alternatives",
            "/usr/bin",
        ),
        ToolRequirement::native("shadow-native", "pwconv", "/usr/sbin"),
        ToolRequirement::native("pseudo-native", "pseudo", "/usr/bin"),
        ToolRequirement::native("kmod-native", "depmod", "/sbin"),
        ToolRequirement {
            recipe: "depmodwrapper-cross",
            tool: "depmodwrapper",
            bindir: "/usr/bin/crossscripts",
            kind: ToolKind::Cross,
            pseudo_wrapper: false,
        },
    ];

    match backend {
        PackageBackend::Ipk => {
            reqs.push(ToolRequirement {
                pseudo_wrapper: true,
                ..ToolRequirement::native("opkg-native", "opkg", "/usr/bin")
            });
            reqs.push(ToolRequirement::native(
                "opkg-utils-native",
                "opkg-make-index",
                "/usr/bin",
            ));
        }
        PackageBackend::Rpm => {
            reqs.push(ToolRequirement::native("dnf-native", "dnf", "/usr/bin"));
            reqs.push(ToolRequirement::native(
                "createrepo-c-native",
                "createrepo_c",
                "/usr/bin",
            ));
        }
        PackageBackend::Deb => {
            tracing::warn!("package type 'deb' is not supported, yet");
        }
    }
    reqs
}

/// Directories prepended to `PATH` for package-manager subprocesses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Toolchain {
    /// Highest priority first.
    bin_dirs: Vec<PathBuf>,
}

impl Toolchain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bin_dirs(&self) -> &[PathBuf] {
        &self.bin_dirs
    }

    /// Give `dir` priority over everything added so far.
    pub fn prepend(&mut self, dir: PathBuf) {
        self.bin_dirs.retain(|existing| existing != &dir);
        self.bin_dirs.insert(0, dir);
    }

    /// `PATH` value: toolchain dirs followed by the inherited `PATH`.
    pub fn path_env(&self) -> Result<OsString, SyncError> {
        let inherited = std::env::var_os("PATH").unwrap_or_default();
        let dirs = self
            .bin_dirs
            .iter()
            .cloned()
            .chain(std::env::split_paths(&inherited));
        std::env::join_paths(dirs).map_err(|e| io_err("PATH", std::io::Error::other(e)))
    }
}

/// Provision every tool `backend` needs and return the resulting toolchain.
pub fn provision(build: &dyn BuildSystem, backend: PackageBackend) -> Result<Toolchain, SyncError> {
    tracing::info!("adding required tools to their recipe sysroot...");
    let mut toolchain = Toolchain::new();
    for req in requirements(backend) {
        provision_tool(build, &req, &mut toolchain)?;
    }
    tracing::debug!("toolchain PATH prefix: {:?}", toolchain.bin_dirs());
    Ok(toolchain)
}

/// Make sure `req.tool` exists, provisioning it if needed, and add its
/// directory (or its pseudo wrapper's) to `toolchain`.
pub fn provision_tool(
    build: &dyn BuildSystem,
    req: &ToolRequirement,
    toolchain: &mut Toolchain,
) -> Result<(), SyncError> {
    let bin_dir = tool_dir(build, req)?;
    let tool_path = bin_dir.join(req.tool);

    tracing::debug!("testing tool: {}", tool_path.display());
    if tool_path.exists() {
        tracing::info!("'{}' already existing in '{}' recipe sysroot", req.tool, req.recipe);
    } else {
        tracing::info!("adding '{}' to '{}' recipe sysroot", req.tool, req.recipe);
        build.provision(req.recipe, req.tool)?;
        if !tool_path.exists() {
            return Err(SyncError::ToolMissing {
                recipe: req.recipe.to_string(),
                tool: req.tool.to_string(),
                path: tool_path,
            });
        }
    }

    if req.pseudo_wrapper {
        let wrapper_dir = write_pseudo_wrapper(build, req.tool, &tool_path)?;
        toolchain.prepend(wrapper_dir);
    } else {
        toolchain.prepend(bin_dir);
    }
    Ok(())
}

fn tool_dir(build: &dyn BuildSystem, req: &ToolRequirement) -> Result<PathBuf, SyncError> {
    let recipe = Some(req.recipe);
    let dir = match req.kind {
        // bindir is absolute, so concatenate instead of Path::join.
        ToolKind::Native => format!(
            "{}{}",
            build.require_variable(recipe, "STAGING_DIR_NATIVE")?,
            req.bindir
        ),
        ToolKind::Cross => format!(
            "{}/{}/{}{}",
            build.require_variable(recipe, "COMPONENTS_DIR")?,
            build.require_variable(recipe, "MACHINE_ARCH")?,
            req.recipe,
            req.bindir
        ),
    };
    Ok(PathBuf::from(dir))
}

/// Write `<TMPDIR>/pseudo-wrapper/bin/<tool>` running `tool_path` under
/// pseudo, and return the wrapper directory.
fn write_pseudo_wrapper(
    build: &dyn BuildSystem,
    tool: &str,
    tool_path: &Path,
) -> Result<PathBuf, SyncError> {
    let recipe = Some("pseudo-native");
    let prefix = format!("{}/usr", build.require_variable(recipe, "STAGING_DIR_NATIVE")?);
    let wrapper_dir = PathBuf::from(build.require_variable(recipe, "TMPDIR")?)
        .join("pseudo-wrapper")
        .join("bin");
    std::fs::create_dir_all(&wrapper_dir).map_err(|e| io_err(&wrapper_dir, e))?;

    let wrapper = wrapper_dir.join(tool);
    let script = format!(
        "#!/bin/sh\n{prefix}/bin/pseudo -P {prefix} {} \"$@\"\n",
        tool_path.display()
    );
    std::fs::write(&wrapper, script).map_err(|e| io_err(&wrapper, e))?;
    set_executable(&wrapper)?;
    Ok(wrapper_dir)
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<(), SyncError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<(), SyncError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use nfsup_core::BuildError;
    use tempfile::TempDir;

    use super::*;

    /// Variables per recipe; `provision` creates the tool file when allowed.
    struct FakeBuild {
        vars: HashMap<(&'static str, &'static str), String>,
        can_provision: bool,
        provisioned: Mutex<Vec<String>>,
    }

    impl FakeBuild {
        fn new(root: &Path, can_provision: bool) -> Self {
            let mut vars = HashMap::new();
            for recipe in [
                "virtual/update-alternatives-native",
                "shadow-native",
                "pseudo-native",
                "kmod-native",
                "opkg-native",
                "opkg-utils-native",
            ] {
                vars.insert(
                    (recipe, "STAGING_DIR_NATIVE"),
                    root.join("sysroots").join(recipe.replace('/', "_")).display().to_string(),
                );
            }
            vars.insert(
                ("pseudo-native", "TMPDIR"),
                root.join("tmp").display().to_string(),
            );
            vars.insert(
                ("depmodwrapper-cross", "COMPONENTS_DIR"),
                root.join("components").display().to_string(),
            );
            vars.insert(("depmodwrapper-cross", "MACHINE_ARCH"), "qemuarm".to_string());
            Self {
                vars,
                can_provision,
                provisioned: Mutex::new(Vec::new()),
            }
        }

        fn tool_path(&self, req: &ToolRequirement) -> PathBuf {
            tool_dir(self, req).unwrap().join(req.tool)
        }
    }

    impl BuildSystem for FakeBuild {
        fn resolve_variable(
            &self,
            recipe: Option<&str>,
            name: &str,
        ) -> Result<Option<String>, BuildError> {
            Ok(self
                .vars
                .iter()
                .find(|((r, n), _)| Some(*r) == recipe && *n == name)
                .map(|(_, v)| v.clone()))
        }

        fn provision(&self, recipe: &str, tool: &str) -> Result<(), BuildError> {
            self.provisioned.lock().unwrap().push(tool.to_string());
            if !self.can_provision {
                return Ok(());
            }
            let req = requirements(PackageBackend::Ipk)
                .into_iter()
                .find(|r| r.recipe == recipe && r.tool == tool)
                .expect("known requirement");
            let path = self.tool_path(&req);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, "#!/bin/sh\n").unwrap();
            Ok(())
        }
    }

    #[test]
    fn ipk_requires_opkg_under_pseudo() {
        let reqs = requirements(PackageBackend::Ipk);
        let opkg = reqs.iter().find(|r| r.tool == "opkg").expect("opkg");
        assert!(opkg.pseudo_wrapper);
        assert!(reqs.iter().any(|r| r.tool == "opkg-make-index"));
        assert!(!reqs.iter().any(|r| r.tool == "dnf"));
    }

    #[test]
    fn existing_tool_is_not_provisioned_again() {
        let root = TempDir::new().unwrap();
        let build = FakeBuild::new(root.path(), false);
        let req = ToolRequirement::native("kmod-native", "depmod", "/sbin");
        let path = build.tool_path(&req);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "").unwrap();

        let mut toolchain = Toolchain::new();
        provision_tool(&build, &req, &mut toolchain).expect("provision");
        assert!(build.provisioned.lock().unwrap().is_empty());
        assert_eq!(toolchain.bin_dirs(), &[path.parent().unwrap().to_path_buf()]);
    }

    #[test]
    fn missing_tool_after_provision_is_an_error() {
        let root = TempDir::new().unwrap();
        let build = FakeBuild::new(root.path(), false);
        let req = ToolRequirement::native("kmod-native", "depmod", "/sbin");

        let err = provision_tool(&build, &req, &mut Toolchain::new()).unwrap_err();
        assert!(matches!(err, SyncError::ToolMissing { .. }), "got: {err}");
        assert_eq!(*build.provisioned.lock().unwrap(), vec!["depmod".to_string()]);
    }

    #[test]
    fn full_ipk_toolchain_puts_last_tool_first() {
        let root = TempDir::new().unwrap();
        let build = FakeBuild::new(root.path(), true);

        let toolchain = provision(&build, PackageBackend::Ipk).expect("provision");
        let first = &toolchain.bin_dirs()[0];
        assert!(first.ends_with("opkg-utils-native/usr/bin"), "got: {first:?}");

        let cross = root
            .path()
            .join("components/qemuarm/depmodwrapper-cross/usr/bin/crossscripts");
        assert!(toolchain.bin_dirs().contains(&cross));
    }

    #[cfg(unix)]
    #[test]
    fn opkg_gets_an_executable_pseudo_wrapper() {
        use std::os::unix::fs::PermissionsExt;

        let root = TempDir::new().unwrap();
        let build = FakeBuild::new(root.path(), true);
        let toolchain = provision(&build, PackageBackend::Ipk).expect("provision");

        let wrapper_dir = root.path().join("tmp/pseudo-wrapper/bin");
        assert!(toolchain.bin_dirs().contains(&wrapper_dir));
        let wrapper = wrapper_dir.join("opkg");
        let script = std::fs::read_to_string(&wrapper).unwrap();
        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains("/bin/pseudo -P "));
        assert!(script.contains("opkg-native/usr/bin/opkg \"$@\""));
        let mode = std::fs::metadata(&wrapper).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
    }

    #[test]
    fn path_env_puts_toolchain_before_inherited_path() {
        let mut toolchain = Toolchain::new();
        toolchain.prepend(PathBuf::from("/opt/b"));
        toolchain.prepend(PathBuf::from("/opt/a"));
        toolchain.prepend(PathBuf::from("/opt/b"));

        let path = toolchain.path_env().unwrap();
        let dirs: Vec<PathBuf> = std::env::split_paths(&path).collect();
        assert_eq!(dirs[0], PathBuf::from("/opt/b"));
        assert_eq!(dirs[1], PathBuf::from("/opt/a"));
    }
}
