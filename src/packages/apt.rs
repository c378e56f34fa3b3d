// src/packages/apt.rs

//! apt adapter
//!
//! Inventory comes from `dpkg-query`; upgrades from a simulated
//! `apt-get upgrade`. Installs and removals run `apt-get` non-interactively.

use crate::error::{Error, Result};
use crate::exec::{CancelToken, CommandRunner, CommandSpec};
use crate::policy::Manager;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, info};

use super::{ActionOptions, PackageManager, PkgInfo, Remedy};

static INTERRUPTED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"dpkg was interrupted, you must manually run '(?:sudo )?dpkg --configure -a'").unwrap()
});

static DOWNGRADE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Packages were downgraded and -y was used without --allow-downgrades").unwrap()
});

pub struct Apt {
    runner: Arc<dyn CommandRunner>,
    timeout: Option<Duration>,
}

impl Apt {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Option<Duration>) -> Self {
        Self { runner, timeout }
    }

    fn apt_get(&self) -> CommandSpec {
        CommandSpec::new("apt-get")
            .env("DEBIAN_FRONTEND", "noninteractive")
            .timeout(self.timeout)
    }
}

impl PackageManager for Apt {
    fn manager(&self) -> Manager {
        Manager::Apt
    }

    fn list_installed(&self, cancel: &CancelToken) -> Result<Vec<PkgInfo>> {
        let spec = CommandSpec::new("dpkg-query")
            .args([
                "-W",
                "-f",
                "${Package} ${Architecture} ${Version} ${db:Status-Status}\n",
            ])
            .timeout(self.timeout);
        let output = self.runner.run_checked(&spec, cancel)?;
        let pkgs = parse_dpkg_query(&output.stdout);
        debug!("apt: {} installed packages", pkgs.len());
        Ok(pkgs)
    }

    fn list_upgradable(&self, cancel: &CancelToken) -> Result<Vec<PkgInfo>> {
        self.runner.run_checked(&self.apt_get().arg("update"), cancel)?;
        let spec = self.apt_get().args(["upgrade", "--just-print", "-qq"]);
        let output = self.runner.run_checked(&spec, cancel)?;
        let pkgs = parse_upgrade_simulation(&output.stdout);
        debug!("apt: {} upgradable packages", pkgs.len());
        Ok(pkgs)
    }

    fn install(&self, cancel: &CancelToken, names: &[String], options: ActionOptions) -> Result<()> {
        let mut spec = self.apt_get().args(["install", "-y"]);
        if options.allow_downgrades {
            spec = spec.arg("--allow-downgrades");
        }
        info!("apt: installing {}", names.join(", "));
        self.runner.run_checked(&spec.args(names.iter().cloned()), cancel)?;
        Ok(())
    }

    fn remove(&self, cancel: &CancelToken, names: &[String], _options: ActionOptions) -> Result<()> {
        let spec = self.apt_get().args(["remove", "-y"]).args(names.iter().cloned());
        info!("apt: removing {}", names.join(", "));
        self.runner.run_checked(&spec, cancel)?;
        Ok(())
    }

    fn diagnose(&self, error: &Error) -> Option<Remedy> {
        let output = error.command_output()?;
        if INTERRUPTED_RE.is_match(output) {
            Some(Remedy::ConfigurePending)
        } else if DOWNGRADE_RE.is_match(output) {
            Some(Remedy::AllowDowngrades)
        } else {
            None
        }
    }

    fn repair(&self, cancel: &CancelToken, remedy: Remedy) -> Result<()> {
        match remedy {
            Remedy::ConfigurePending => {
                let spec = CommandSpec::new("dpkg")
                    .args(["--configure", "-a"])
                    .env("DEBIAN_FRONTEND", "noninteractive")
                    .timeout(self.timeout);
                self.runner.run_checked(&spec, cancel)?;
                Ok(())
            }
            Remedy::AllowDowngrades | Remedy::CompleteTransaction => Ok(()),
        }
    }
}

/// Parse `Package Architecture Version Status` lines, keeping installed ones
fn parse_dpkg_query(stdout: &str) -> Vec<PkgInfo> {
    stdout
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            match fields.as_slice() {
                [name, arch, version, status] if *status == "installed" => {
                    Some(PkgInfo::new(*name, *arch, *version))
                }
                // Older dpkg without db:Status-Status support
                [name, arch, version] => Some(PkgInfo::new(*name, *arch, *version)),
                _ => None,
            }
        })
        .collect()
}

/// Parse `Inst` lines of `apt-get upgrade --just-print`
///
/// `Inst bash [5.1-2] (5.1-2+deb11u1 Debian-Security:11/stable-security [amd64])`
///
/// Lines without a bracketed current version are new dependencies, not
/// upgrades, and are skipped.
fn parse_upgrade_simulation(stdout: &str) -> Vec<PkgInfo> {
    stdout
        .lines()
        .filter_map(|line| {
            let rest = line.strip_prefix("Inst ")?;
            let (name, rest) = rest.split_once(' ')?;
            if !rest.starts_with('[') {
                return None;
            }
            let open = rest.find('(')?;
            let inner = rest[open + 1..].trim_end().strip_suffix(')')?;
            let version = inner.split_whitespace().next()?;
            let arch = inner
                .rsplit_once('[')
                .and_then(|(_, a)| a.strip_suffix(']'))
                .unwrap_or("all");
            Some(PkgInfo::new(name, arch, version))
        })
        .collect()
}
