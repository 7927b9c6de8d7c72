//! Build-system introspection capability.
//!
//! The updater never talks to the build tool directly. It asks a
//! [`BuildSystem`] for recipe variables (`IMAGE_INSTALL`, `DEPLOY_DIR_IPK`, …)
//! and to provision native tools into a recipe sysroot.
//!
//! [`ManifestBuildSystem`] answers those questions from a YAML manifest that
//! the build exports:
//!
//! ```yaml
//! global:
//!   PACKAGE_CLASSES: package_ipk
//!   DEPLOY_DIR_IPK: /build/tmp/deploy/ipk
//! recipes:
//!   core-image-minimal:
//!     IMAGE_INSTALL: packagegroup-core-boot dropbear
//! provision_command: [bitbake, -c, addto_recipe_sysroot, "{recipe}"]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::error::{build_io_err, BuildError};

/// Variables and tool provisioning offered by the build system.
pub trait BuildSystem: Send + Sync {
    /// Look up `name` for `recipe`, or in the global configuration when
    /// `recipe` is `None`. Unset variables are `Ok(None)`.
    fn resolve_variable(&self, recipe: Option<&str>, name: &str)
        -> Result<Option<String>, BuildError>;

    /// Build whatever is needed so that `tool` lands in `recipe`'s sysroot.
    fn provision(&self, recipe: &str, tool: &str) -> Result<(), BuildError>;

    /// Like [`BuildSystem::resolve_variable`] but unset is an error.
    fn require_variable(&self, recipe: Option<&str>, name: &str) -> Result<String, BuildError> {
        self.resolve_variable(recipe, name)?
            .ok_or_else(|| BuildError::MissingVariable {
                recipe: recipe.unwrap_or("<global>").to_string(),
                name: name.to_string(),
            })
    }
}

/// On-disk manifest document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildManifest {
    /// Global configuration variables; also the fallback for recipes.
    #[serde(default)]
    pub global: BTreeMap<String, String>,
    /// Per-recipe variable overrides.
    #[serde(default)]
    pub recipes: BTreeMap<String, BTreeMap<String, String>>,
    /// argv run to provision a tool; `{recipe}` and `{tool}` are substituted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provision_command: Option<Vec<String>>,
}

impl BuildManifest {
    pub fn variable(&self, recipe: Option<&str>, name: &str) -> Option<&str> {
        recipe
            .and_then(|r| self.recipes.get(r))
            .and_then(|vars| vars.get(name))
            .or_else(|| self.global.get(name))
            .map(String::as_str)
    }
}

/// [`BuildSystem`] backed by a YAML manifest file.
///
/// The file is re-read on every call so a manifest refreshed by the build is
/// picked up by the next synchronization run without restarting the daemon.
#[derive(Debug, Clone)]
pub struct ManifestBuildSystem {
    path: PathBuf,
}

impl ManifestBuildSystem {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the manifest as it is on disk right now.
    pub fn load(&self) -> Result<BuildManifest, BuildError> {
        let contents =
            std::fs::read_to_string(&self.path).map_err(|e| build_io_err(&self.path, e))?;
        serde_yaml::from_str(&contents).map_err(|source| BuildError::Parse {
            path: self.path.clone(),
            source,
        })
    }
}

impl BuildSystem for ManifestBuildSystem {
    fn resolve_variable(
        &self,
        recipe: Option<&str>,
        name: &str,
    ) -> Result<Option<String>, BuildError> {
        Ok(self.load()?.variable(recipe, name).map(str::to_owned))
    }

    fn provision(&self, recipe: &str, tool: &str) -> Result<(), BuildError> {
        let manifest = self.load()?;
        let provision_err = |message: String| BuildError::Provision {
            recipe: recipe.to_string(),
            tool: tool.to_string(),
            message,
        };

        let Some(template) = manifest.provision_command.filter(|argv| !argv.is_empty()) else {
            return Err(provision_err(format!(
                "no provision_command configured in {}",
                self.path.display()
            )));
        };

        let argv: Vec<String> = template
            .iter()
            .map(|arg| arg.replace("{recipe}", recipe).replace("{tool}", tool))
            .collect();
        let output = Command::new(&argv[0])
            .args(&argv[1..])
            .output()
            .map_err(|e| provision_err(format!("cannot run {}: {e}", argv[0])))?;
        if !output.status.success() {
            return Err(provision_err(format!(
                "`{}` exited with {}: {}",
                argv.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}
