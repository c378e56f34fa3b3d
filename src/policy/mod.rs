// src/policy/mod.rs

//! Desired-state policy
//!
//! A policy describes what the host should look like: which repositories
//! the package managers trust, which packages are installed, removed or kept
//! updated, and which software recipes have been run.
//!
//! Two sources feed the agent:
//!
//! - A local declaration ([`PolicyDocument`]) read from disk
//! - A remote effective policy ([`EffectivePolicy`]) looked up over HTTP
//!
//! [`merge`] combines them into the single [`EffectivePolicy`] the executors
//! work from.
//!
//! # Example local policy
//!
//! ```json
//! {
//!   "packages": [
//!     {"name": "nginx", "desiredState": "INSTALLED", "manager": "APT"},
//!     {"name": "telnet", "desiredState": "REMOVED"}
//!   ],
//!   "packageRepositories": [
//!     {"yum": {"id": "epel", "baseUrl": "https://example.com/epel", "gpgKeys": []}}
//!   ],
//!   "softwareRecipes": []
//! }
//! ```

mod merge;
pub mod source;

pub use merge::merge;
pub use source::{LocalPolicySource, PolicySource, RemotePolicySource};

use crate::recipe::SoftwareRecipe;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Source label attached to entries that came from the local declaration
pub const LOCAL_SOURCE: &str = "local";

/// Package manager a resource targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Manager {
    /// Every manager present on the host
    #[default]
    #[serde(alias = "MANAGER_UNSPECIFIED")]
    Any,
    Apt,
    Yum,
    Zypper,
    Goo,
}

impl Manager {
    /// Concrete managers, in the order the executor visits them
    pub const CONCRETE: [Manager; 4] = [Manager::Apt, Manager::Yum, Manager::Zypper, Manager::Goo];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Apt => "apt",
            Self::Yum => "yum",
            Self::Zypper => "zypper",
            Self::Goo => "googet",
        }
    }

    /// Whether a resource targeting `self` applies to `manager`
    pub fn targets(&self, manager: Manager) -> bool {
        *self == Manager::Any || *self == manager
    }
}

impl fmt::Display for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Desired state of a package or recipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DesiredState {
    /// Unspecified is treated as installed
    #[default]
    #[serde(alias = "UNSPECIFIED", alias = "DESIRED_STATE_UNSPECIFIED")]
    Installed,
    Removed,
    Updated,
}

impl fmt::Display for DesiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Installed => write!(f, "installed"),
            Self::Removed => write!(f, "removed"),
            Self::Updated => write!(f, "updated"),
        }
    }
}

/// A package and the state it should be in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageResource {
    pub name: String,

    #[serde(default)]
    pub desired_state: DesiredState,

    #[serde(default)]
    pub manager: Manager,
}

impl PackageResource {
    pub fn new(name: impl Into<String>, desired_state: DesiredState, manager: Manager) -> Self {
        Self {
            name: name.into(),
            desired_state,
            manager,
        }
    }
}

/// Apt source kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArchiveType {
    #[default]
    Deb,
    DebSrc,
}

impl ArchiveType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deb => "deb",
            Self::DebSrc => "deb-src",
        }
    }
}

/// An apt source line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AptRepository {
    #[serde(default)]
    pub archive_type: ArchiveType,
    pub uri: String,
    pub distribution: String,
    #[serde(default)]
    pub components: Vec<String>,
    /// URL of the signing key to trust
    #[serde(default)]
    pub gpg_key: Option<String>,
}

/// A yum or zypper repository section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpmRepository {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub base_url: String,
    #[serde(default)]
    pub gpg_keys: Vec<String>,
}

/// A googet repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GooRepository {
    pub name: String,
    pub url: String,
}

/// A repository the host's package managers should trust
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryResource {
    Apt(AptRepository),
    Yum(RpmRepository),
    Zypper(RpmRepository),
    Goo(GooRepository),
}

impl RepositoryResource {
    pub fn manager(&self) -> Manager {
        match self {
            Self::Apt(_) => Manager::Apt,
            Self::Yum(_) => Manager::Yum,
            Self::Zypper(_) => Manager::Zypper,
            Self::Goo(_) => Manager::Goo,
        }
    }

    /// Key used to let one source override another's definition
    ///
    /// Only yum and zypper repositories carry a stable id; apt and googet
    /// entries are never deduplicated.
    pub fn identity(&self) -> Option<String> {
        match self {
            Self::Yum(repo) if !repo.id.is_empty() => Some(format!("yum-{}", repo.id)),
            Self::Zypper(repo) if !repo.id.is_empty() => Some(format!("zypper-{}", repo.id)),
            _ => None,
        }
    }
}

/// A policy entry together with the source that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sourced<T> {
    pub source: String,
    pub resource: T,
}

impl<T> Sourced<T> {
    pub fn new(source: impl Into<String>, resource: T) -> Self {
        Self {
            source: source.into(),
            resource,
        }
    }
}

/// Local policy declaration as read from disk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDocument {
    #[serde(default)]
    pub packages: Vec<PackageResource>,

    #[serde(default, rename = "packageRepositories")]
    pub repositories: Vec<RepositoryResource>,

    #[serde(default, rename = "softwareRecipes")]
    pub recipes: Vec<SoftwareRecipe>,
}

/// Fully merged desired state for this host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectivePolicy {
    pub packages: Vec<Sourced<PackageResource>>,
    pub repositories: Vec<Sourced<RepositoryResource>>,
    pub recipes: Vec<Sourced<SoftwareRecipe>>,
}

/// Desired package names for one manager, split by desired state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredPackages {
    pub install: Vec<String>,
    pub remove: Vec<String>,
    pub update: Vec<String>,
}

impl DesiredPackages {
    pub fn is_empty(&self) -> bool {
        self.install.is_empty() && self.remove.is_empty() && self.update.is_empty()
    }
}

impl EffectivePolicy {
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty() && self.repositories.is_empty() && self.recipes.is_empty()
    }

    /// Packages that apply to `manager`, with `ANY` entries fanned out
    pub fn packages_for(&self, manager: Manager) -> DesiredPackages {
        let mut desired = DesiredPackages::default();
        for pkg in self.packages.iter().map(|p| &p.resource) {
            if !pkg.manager.targets(manager) {
                continue;
            }
            let list = match pkg.desired_state {
                DesiredState::Installed => &mut desired.install,
                DesiredState::Removed => &mut desired.remove,
                DesiredState::Updated => &mut desired.update,
            };
            list.push(pkg.name.clone());
        }
        desired
    }

    /// Repositories that belong to `manager`, in policy order
    pub fn repositories_for(&self, manager: Manager) -> Vec<&RepositoryResource> {
        self.repositories
            .iter()
            .map(|r| &r.resource)
            .filter(|r| r.manager() == manager)
            .collect()
    }
}
