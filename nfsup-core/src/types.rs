//! Domain types for the nfsroot updater.
//!
//! Package identifiers are opaque strings; the desired list keeps the order
//! declared by the image recipe, the installed set is whatever the package
//! manager reports right now.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A single installable unit within a package feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(pub String);

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for PackageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PackageId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl AsRef<str> for PackageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Packages currently present on the target root, as reported live.
pub type InstalledSet = HashSet<PackageId>;

/// Packages the image recipe declares, in declaration order.
pub type DesiredSet = Vec<PackageId>;

/// Split a whitespace-separated variable value (e.g. `IMAGE_INSTALL`) into
/// package ids, keeping order and dropping duplicates after the first.
pub fn parse_package_list(value: &str) -> DesiredSet {
    let mut seen = HashSet::new();
    value
        .split_whitespace()
        .filter(|word| seen.insert(*word))
        .map(PackageId::from)
        .collect()
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Whether a synchronization job currently holds the single job slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    #[default]
    Idle,
    Running,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Idle => write!(f, "idle"),
            JobState::Running => write!(f, "running"),
        }
    }
}

/// Package format the build produces, taken from `PACKAGE_CLASSES`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageBackend {
    Ipk,
    Rpm,
    Deb,
}

impl PackageBackend {
    /// Parse the first class of a `PACKAGE_CLASSES` value, e.g.
    /// `"package_ipk package_rpm"` → [`PackageBackend::Ipk`].
    pub fn from_package_classes(classes: &str) -> Result<Self, CoreError> {
        let first = classes
            .split_whitespace()
            .next()
            .ok_or_else(|| CoreError::InvalidBackend(classes.to_string()))?;
        first.trim_start_matches("package_").parse()
    }
}

impl FromStr for PackageBackend {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ipk" => Ok(Self::Ipk),
            "rpm" => Ok(Self::Rpm),
            "deb" => Ok(Self::Deb),
            other => Err(CoreError::InvalidBackend(other.to_string())),
        }
    }
}

impl fmt::Display for PackageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageBackend::Ipk => write!(f, "ipk"),
            PackageBackend::Rpm => write!(f, "rpm"),
            PackageBackend::Deb => write!(f, "deb"),
        }
    }
}

/// A recognized token received over a daemon session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// A build finished; the nfsroot should be synchronized.
    BuildDone,
    /// Report job state and last completion time.
    Status,
    /// Ask the listener to shut down.
    Stop,
}

impl Signal {
    pub const BUILD_DONE: &'static str = "bitbake_done";
    pub const STATUS: &'static str = "status";
    pub const STOP: &'static str = "stop";

    /// Match a received payload against the closed token set.
    ///
    /// Trailing whitespace is ignored so `echo bitbake_done | nc -U` works.
    pub fn parse(payload: &str) -> Option<Self> {
        match payload.trim_end() {
            Self::BUILD_DONE => Some(Self::BuildDone),
            Self::STATUS => Some(Self::Status),
            Self::STOP => Some(Self::Stop),
            _ => None,
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            Signal::BuildDone => Self::BUILD_DONE,
            Signal::Status => Self::STATUS,
            Signal::Stop => Self::STOP,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
