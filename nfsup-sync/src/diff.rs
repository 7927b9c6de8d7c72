//! Install-diff computation.

use nfsup_core::{InstalledSet, PackageId};

/// Desired packages that are not installed yet, in desired order.
///
/// Pure: the caller queries the live installed set right before calling.
pub fn install_diff(desired: &[PackageId], installed: &InstalledSet) -> Vec<PackageId> {
    desired
        .iter()
        .filter(|pkg| !installed.contains(*pkg))
        .cloned()
        .collect()
}
