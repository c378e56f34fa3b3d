// src/plan.rs

//! Change planning between desired package lists and current inventory.
//!
//! Given what a manager reports as installed and upgradable, and the names
//! the policy wants installed, removed or kept up to date, compute the
//! smallest set of actions that converges the host.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use crate::packages::PkgInfo;

/// Actions for one package manager in one run
///
/// The three sets are pairwise disjoint and iterate in lexical order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changes {
    pub to_install: BTreeSet<String>,
    pub to_upgrade: BTreeSet<String>,
    pub to_remove: BTreeSet<String>,
}

impl Changes {
    pub fn is_empty(&self) -> bool {
        self.to_install.is_empty() && self.to_upgrade.is_empty() && self.to_remove.is_empty()
    }

    pub fn install_list(&self) -> Vec<String> {
        self.to_install.iter().cloned().collect()
    }

    pub fn upgrade_list(&self) -> Vec<String> {
        self.to_upgrade.iter().cloned().collect()
    }

    pub fn remove_list(&self) -> Vec<String> {
        self.to_remove.iter().cloned().collect()
    }
}

impl fmt::Display for Changes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "no changes");
        }
        let mut parts = Vec::new();
        for (label, set) in [
            ("install", &self.to_install),
            ("upgrade", &self.to_upgrade),
            ("remove", &self.to_remove),
        ] {
            if !set.is_empty() {
                let names: Vec<&str> = set.iter().map(String::as_str).collect();
                parts.push(format!("{}: {}", label, names.join(", ")));
            }
        }
        write!(f, "{}", parts.join("; "))
    }
}

/// Compute the actions needed to reach the desired state
///
/// - Wanted-installed packages that are missing get installed
/// - Wanted-removed packages get removed only if actually installed
/// - Wanted-updated packages are upgraded when an upgrade is available,
///   installed when missing, and left alone otherwise
///
/// A name that ends up scheduled for removal is dropped from the install and
/// upgrade sets so the result stays disjoint.
pub fn plan<S: AsRef<str>>(
    installed: &[PkgInfo],
    upgradable: &[PkgInfo],
    want_install: &[S],
    want_remove: &[S],
    want_update: &[S],
) -> Changes {
    let installed_set: HashSet<&str> = installed.iter().map(|p| p.name.as_str()).collect();
    let upgradable_set: HashSet<&str> = upgradable.iter().map(|p| p.name.as_str()).collect();

    let mut changes = Changes::default();

    for name in want_install.iter().map(AsRef::as_ref) {
        if !installed_set.contains(name) {
            changes.to_install.insert(name.to_string());
        }
    }

    for name in want_remove.iter().map(AsRef::as_ref) {
        if installed_set.contains(name) {
            changes.to_remove.insert(name.to_string());
        }
    }

    for name in want_update.iter().map(AsRef::as_ref) {
        if upgradable_set.contains(name) {
            changes.to_upgrade.insert(name.to_string());
        } else if !installed_set.contains(name) {
            changes.to_install.insert(name.to_string());
        }
    }

    for name in &changes.to_remove {
        changes.to_install.remove(name);
        changes.to_upgrade.remove(name);
    }
    // Upgrading implies it is installed, never both
    for name in &changes.to_upgrade {
        changes.to_install.remove(name);
    }

    changes
}
