//! Resolution of one synchronization run's inputs from the build system.
//!
//! A [`SyncPlan`] is resolved at the start of every run so the desired
//! package list and feed layout always reflect the latest build.

use std::path::{Path, PathBuf};

use nfsup_core::{parse_package_list, BuildSystem, DesiredSet, PackageBackend};

use crate::SyncError;

/// One `<arch>##file://<dir>` feed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSource {
    pub arch: String,
    pub uri: String,
}

/// Everything the pipeline and backend need for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    pub rootfs_recipe: String,
    pub nfsroot: PathBuf,
    pub desired: DesiredSet,
    pub backend: PackageBackend,
    /// `DEPLOY_DIR_IPK`: built packages, one sub-directory per arch.
    pub deploy_dir: PathBuf,
    /// Arch directories that actually exist, in `ALL_MULTILIB_PACKAGE_ARCHS` order.
    pub feeds: Vec<FeedSource>,
    /// `IPKGCONF_TARGET`: where the package-manager config is written.
    pub config_file: PathBuf,
    /// `STAGING_DIR_NATIVE`, exported as `NATIVE_ROOT` to maintainer scripts.
    pub native_root: Option<PathBuf>,
    /// Postinstall intercept scripts directory under the recipe's `WORKDIR`.
    pub intercepts_dir: Option<PathBuf>,
}

impl SyncPlan {
    /// Resolve the plan for `rootfs_recipe` targeting `nfsroot`.
    pub fn resolve(
        build: &dyn BuildSystem,
        rootfs_recipe: &str,
        nfsroot: &Path,
    ) -> Result<Self, SyncError> {
        let recipe = Some(rootfs_recipe);
        let desired = parse_package_list(&build.require_variable(recipe, "IMAGE_INSTALL")?);
        tracing::info!(
            "package list: {}",
            desired
                .iter()
                .map(|p| p.0.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let backend =
            PackageBackend::from_package_classes(&build.require_variable(recipe, "PACKAGE_CLASSES")?)?;
        if backend != PackageBackend::Ipk {
            tracing::warn!("package type {backend} not supported");
            return Err(SyncError::Unsupported(backend));
        }
        let deploy_dir = PathBuf::from(build.require_variable(recipe, "DEPLOY_DIR_IPK")?);
        let archs = build.require_variable(recipe, "ALL_MULTILIB_PACKAGE_ARCHS")?;
        let feeds = feed_sources(&deploy_dir, &archs);
        let config_file = PathBuf::from(build.require_variable(recipe, "IPKGCONF_TARGET")?);
        let native_root = build
            .resolve_variable(recipe, "STAGING_DIR_NATIVE")?
            .map(PathBuf::from);
        let intercepts_dir = build
            .resolve_variable(recipe, "WORKDIR")?
            .map(|workdir| PathBuf::from(workdir).join("intercept_scripts"));

        Ok(Self {
            rootfs_recipe: rootfs_recipe.to_string(),
            nfsroot: nfsroot.to_path_buf(),
            desired,
            backend,
            deploy_dir,
            feeds,
            config_file,
            native_root,
            intercepts_dir,
        })
    }
}

/// Feed entries for every arch in `archs` whose directory exists under
/// `deploy_dir`. Missing arch directories would make the feed update fail.
pub fn feed_sources(deploy_dir: &Path, archs: &str) -> Vec<FeedSource> {
    archs
        .split_whitespace()
        .filter_map(|arch| {
            let dir = deploy_dir.join(arch);
            if dir.is_dir() {
                Some(FeedSource {
                    arch: arch.to_string(),
                    uri: format!("file://{}", dir.display()),
                })
            } else {
                tracing::debug!("skipping missing feed directory {}", dir.display());
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use nfsup_core::{BuildError, PackageId};
    use tempfile::TempDir;

    use super::*;

    #[derive(Default)]
    struct FakeBuild {
        vars: HashMap<&'static str, String>,
    }

    impl BuildSystem for FakeBuild {
        fn resolve_variable(
            &self,
            _recipe: Option<&str>,
            name: &str,
        ) -> Result<Option<String>, BuildError> {
            Ok(self.vars.get(name).cloned())
        }

        fn provision(&self, _recipe: &str, _tool: &str) -> Result<(), BuildError> {
            Ok(())
        }
    }

    fn build_with(deploy: &Path) -> FakeBuild {
        let mut vars = HashMap::new();
        vars.insert("IMAGE_INSTALL", "busybox dropbear".to_string());
        vars.insert("PACKAGE_CLASSES", "package_ipk".to_string());
        vars.insert("DEPLOY_DIR_IPK", deploy.display().to_string());
        vars.insert("ALL_MULTILIB_PACKAGE_ARCHS", "all any cortexa9hf-neon".to_string());
        vars.insert("IPKGCONF_TARGET", "/build/work/opkg.conf".to_string());
        vars.insert("WORKDIR", "/build/work".to_string());
        FakeBuild { vars }
    }

    #[test]
    fn feed_sources_skip_missing_arch_dirs() {
        let deploy = TempDir::new().unwrap();
        std::fs::create_dir(deploy.path().join("all")).unwrap();
        std::fs::create_dir(deploy.path().join("cortexa9hf-neon")).unwrap();

        let feeds = feed_sources(deploy.path(), "all any cortexa9hf-neon");
        let archs: Vec<_> = feeds.iter().map(|f| f.arch.as_str()).collect();
        assert_eq!(archs, vec!["all", "cortexa9hf-neon"]);
        assert_eq!(
            feeds[0].uri,
            format!("file://{}", deploy.path().join("all").display())
        );
    }

    #[test]
    fn resolve_reads_recipe_variables() {
        let deploy = TempDir::new().unwrap();
        std::fs::create_dir(deploy.path().join("all")).unwrap();
        let build = build_with(deploy.path());

        let plan = SyncPlan::resolve(&build, "core-image-minimal", Path::new("/srv/nfs"))
            .expect("resolve");
        assert_eq!(
            plan.desired,
            vec![PackageId::from("busybox"), PackageId::from("dropbear")]
        );
        assert_eq!(plan.backend, PackageBackend::Ipk);
        assert_eq!(plan.feeds.len(), 1);
        assert_eq!(plan.native_root, None);
        assert_eq!(
            plan.intercepts_dir,
            Some(PathBuf::from("/build/work/intercept_scripts"))
        );
    }

    #[test]
    fn resolve_rejects_rpm_feeds() {
        let deploy = TempDir::new().unwrap();
        let mut build = build_with(deploy.path());
        build
            .vars
            .insert("PACKAGE_CLASSES", "package_rpm package_ipk".to_string());

        let err = SyncPlan::resolve(&build, "core-image-minimal", Path::new("/srv/nfs"))
            .unwrap_err();
        assert!(matches!(err, SyncError::Unsupported(PackageBackend::Rpm)));
    }

    #[test]
    fn resolve_fails_without_image_install() {
        let deploy = TempDir::new().unwrap();
        let mut build = build_with(deploy.path());
        build.vars.remove("IMAGE_INSTALL");

        let err = SyncPlan::resolve(&build, "core-image-minimal", Path::new("/srv/nfs"))
            .unwrap_err();
        assert!(err.to_string().contains("IMAGE_INSTALL"), "got: {err}");
    }
}
