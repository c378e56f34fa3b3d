// src/packages/yum.rs

//! yum adapter

use crate::error::{Error, Result};
use crate::exec::{CancelToken, CommandRunner, CommandSpec};
use crate::policy::Manager;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{ActionOptions, PackageManager, PkgInfo, Remedy, rpm_installed};

/// Exit code of `yum check-update` when updates are available
const UPDATES_AVAILABLE: i32 = 100;

pub struct Yum {
    runner: Arc<dyn CommandRunner>,
    timeout: Option<Duration>,
}

impl Yum {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Option<Duration>) -> Self {
        Self { runner, timeout }
    }

    fn yum(&self) -> CommandSpec {
        CommandSpec::new("yum").timeout(self.timeout)
    }
}

impl PackageManager for Yum {
    fn manager(&self) -> Manager {
        Manager::Yum
    }

    fn list_installed(&self, cancel: &CancelToken) -> Result<Vec<PkgInfo>> {
        rpm_installed(self.runner.as_ref(), cancel, self.timeout)
    }

    fn list_upgradable(&self, cancel: &CancelToken) -> Result<Vec<PkgInfo>> {
        let spec = self.yum().args(["check-update", "--assumeyes", "--quiet"]);
        let output = self.runner.run(&spec, cancel)?;
        let code = output.code;
        match code {
            Some(0) => Ok(Vec::new()),
            Some(UPDATES_AVAILABLE) => {
                let pkgs = parse_check_update(&output.stdout);
                debug!("yum: {} upgradable packages", pkgs.len());
                Ok(pkgs)
            }
            _ => output.check(&spec).map(|_| Vec::new()),
        }
    }

    fn install(&self, cancel: &CancelToken, names: &[String], _options: ActionOptions) -> Result<()> {
        info!("yum: installing {}", names.join(", "));
        let spec = self.yum().args(["install", "--assumeyes"]).args(names.iter().cloned());
        self.runner.run_checked(&spec, cancel)?;
        Ok(())
    }

    fn remove(&self, cancel: &CancelToken, names: &[String], _options: ActionOptions) -> Result<()> {
        info!("yum: removing {}", names.join(", "));
        let spec = self.yum().args(["remove", "--assumeyes"]).args(names.iter().cloned());
        self.runner.run_checked(&spec, cancel)?;
        Ok(())
    }

    fn diagnose(&self, error: &Error) -> Option<Remedy> {
        let output = error.command_output()?;
        output
            .contains("yum-complete-transaction")
            .then_some(Remedy::CompleteTransaction)
    }

    fn repair(&self, cancel: &CancelToken, remedy: Remedy) -> Result<()> {
        if remedy == Remedy::CompleteTransaction {
            let spec = CommandSpec::new("yum-complete-transaction")
                .args(["--cleanup-only", "--assumeyes"])
                .timeout(self.timeout);
            self.runner.run_checked(&spec, cancel)?;
        }
        Ok(())
    }
}

/// Parse `name.arch  version  repo` lines of `yum check-update`
///
/// Parsing stops at the "Obsoleting Packages" section.
fn parse_check_update(stdout: &str) -> Vec<PkgInfo> {
    let mut pkgs = Vec::new();
    for line in stdout.lines() {
        if line.starts_with("Obsoleting") {
            break;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [name_arch, version, _repo] = fields.as_slice() else {
            continue;
        };
        let Some((name, arch)) = name_arch.rsplit_once('.') else {
            continue;
        };
        pkgs.push(PkgInfo::new(name, arch, *version));
    }
    pkgs
}
