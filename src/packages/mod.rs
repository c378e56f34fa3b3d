// src/packages/mod.rs

//! Package manager adapters
//!
//! Each supported manager implements [`PackageManager`], a thin layer over
//! the manager's command-line tools:
//!
//! - [`apt::Apt`]: apt-get / dpkg-query (Debian, Ubuntu)
//! - [`yum::Yum`]: yum / rpm (RHEL, CentOS)
//! - [`zypper::Zypper`]: zypper / rpm (SUSE)
//! - [`googet::GooGet`]: googet
//!
//! Which adapters are active is decided once at startup from
//! [`HostCapabilities`].

pub mod apt;
pub mod googet;
pub mod yum;
pub mod zypper;

use crate::error::{Error, Result};
use crate::exec::{CancelToken, CommandRunner};
use crate::policy::Manager;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Normalized record of an installed or upgradable package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkgInfo {
    pub name: String,
    pub arch: String,
    pub version: String,
}

impl PkgInfo {
    pub fn new(name: impl Into<String>, arch: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arch: arch.into(),
            version: version.into(),
        }
    }
}

/// Flags that adjust an install or remove invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionOptions {
    /// Permit installing an older version than the one present
    pub allow_downgrades: bool,
}

/// Known transient failure a manager can recover from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remedy {
    /// dpkg was interrupted; finish pending configuration first
    ConfigurePending,
    /// apt refused to downgrade; retry allowing it
    AllowDowngrades,
    /// yum left an unfinished transaction behind
    CompleteTransaction,
}

impl Remedy {
    /// Options for the retry that follows this remedy
    pub fn adjust(&self, options: ActionOptions) -> ActionOptions {
        match self {
            Self::AllowDowngrades => ActionOptions {
                allow_downgrades: true,
                ..options
            },
            Self::ConfigurePending | Self::CompleteTransaction => options,
        }
    }
}

impl fmt::Display for Remedy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigurePending => write!(f, "configure pending packages"),
            Self::AllowDowngrades => write!(f, "allow downgrades"),
            Self::CompleteTransaction => write!(f, "complete unfinished transaction"),
        }
    }
}

/// Operations the executor needs from a package manager
pub trait PackageManager: Send + Sync {
    fn manager(&self) -> Manager;

    fn list_installed(&self, cancel: &CancelToken) -> Result<Vec<PkgInfo>>;

    fn list_upgradable(&self, cancel: &CancelToken) -> Result<Vec<PkgInfo>>;

    fn install(&self, cancel: &CancelToken, names: &[String], options: ActionOptions) -> Result<()>;

    fn remove(&self, cancel: &CancelToken, names: &[String], options: ActionOptions) -> Result<()>;

    /// Recognize a failure this manager knows how to recover from
    fn diagnose(&self, _error: &Error) -> Option<Remedy> {
        None
    }

    /// Perform the in-place repair a remedy calls for
    fn repair(&self, _cancel: &CancelToken, _remedy: Remedy) -> Result<()> {
        Ok(())
    }
}

/// Package tooling found on this host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostCapabilities {
    pub apt: bool,
    pub dpkg: bool,
    pub yum: bool,
    pub zypper: bool,
    pub rpm: bool,
    pub googet: bool,
}

impl HostCapabilities {
    /// Look up each tool on `PATH`
    pub fn detect() -> Self {
        let found = |tool: &str| which::which(tool).is_ok();
        let caps = Self {
            apt: found("apt-get"),
            dpkg: found("dpkg-query"),
            yum: found("yum"),
            zypper: found("zypper"),
            rpm: found("rpm"),
            googet: found("googet"),
        };
        debug!("Detected host capabilities: {:?}", caps);
        caps
    }

    /// Whether the adapter for `manager` can run here
    pub fn has(&self, manager: Manager) -> bool {
        match manager {
            Manager::Any => false,
            Manager::Apt => self.apt && self.dpkg,
            Manager::Yum => self.yum && self.rpm,
            Manager::Zypper => self.zypper && self.rpm,
            Manager::Goo => self.googet,
        }
    }

    /// Concrete managers present, in executor order
    pub fn managers(&self) -> Vec<Manager> {
        Manager::CONCRETE
            .into_iter()
            .filter(|m| self.has(*m))
            .collect()
    }
}

/// Build the adapters for every manager present on this host
pub fn adapters_for(
    capabilities: &HostCapabilities,
    runner: Arc<dyn CommandRunner>,
    timeout: Option<Duration>,
) -> Vec<Box<dyn PackageManager>> {
    capabilities
        .managers()
        .into_iter()
        .map(|manager| -> Box<dyn PackageManager> {
            match manager {
                Manager::Apt => Box::new(apt::Apt::new(runner.clone(), timeout)),
                Manager::Yum => Box::new(yum::Yum::new(runner.clone(), timeout)),
                Manager::Zypper => Box::new(zypper::Zypper::new(runner.clone(), timeout)),
                Manager::Goo | Manager::Any => Box::new(googet::GooGet::new(runner.clone(), timeout)),
            }
        })
        .collect()
}

/// Installed packages as reported by `rpm -qa`, shared by yum and zypper
pub(crate) fn rpm_installed(
    runner: &dyn CommandRunner,
    cancel: &CancelToken,
    timeout: Option<Duration>,
) -> Result<Vec<PkgInfo>> {
    let spec = crate::exec::CommandSpec::new("rpm")
        .args(["--query", "--all", "--queryformat", "%{NAME} %{ARCH} %{VERSION}-%{RELEASE}\\n"])
        .timeout(timeout);
    let output = runner.run_checked(&spec, cancel)?;
    Ok(parse_rpm_query(&output.stdout))
}

/// Parse `NAME ARCH VERSION-RELEASE` lines
pub(crate) fn parse_rpm_query(stdout: &str) -> Vec<PkgInfo> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next(), fields.next()) {
                (Some(name), Some(arch), Some(version)) => Some(PkgInfo::new(name, arch, version)),
                _ => None,
            }
        })
        .collect()
}
