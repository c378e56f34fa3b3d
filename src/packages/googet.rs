// src/packages/googet.rs

//! googet adapter

use crate::error::Result;
use crate::exec::{CancelToken, CommandRunner, CommandSpec};
use crate::policy::Manager;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{ActionOptions, PackageManager, PkgInfo};

pub struct GooGet {
    runner: Arc<dyn CommandRunner>,
    timeout: Option<Duration>,
}

impl GooGet {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Option<Duration>) -> Self {
        Self { runner, timeout }
    }

    fn googet(&self) -> CommandSpec {
        CommandSpec::new("googet").timeout(self.timeout)
    }
}

impl PackageManager for GooGet {
    fn manager(&self) -> Manager {
        Manager::Goo
    }

    fn list_installed(&self, cancel: &CancelToken) -> Result<Vec<PkgInfo>> {
        let output = self.runner.run_checked(&self.googet().arg("installed"), cancel)?;
        Ok(parse_installed(&output.stdout))
    }

    fn list_upgradable(&self, cancel: &CancelToken) -> Result<Vec<PkgInfo>> {
        // Without -noconfirm and with stdin closed, googet lists the
        // candidate updates and then declines the prompt.
        let output = self.runner.run(&self.googet().arg("update"), cancel)?;
        let pkgs = parse_update_listing(&output.stdout);
        debug!("googet: {} upgradable packages", pkgs.len());
        Ok(pkgs)
    }

    fn install(&self, cancel: &CancelToken, names: &[String], _options: ActionOptions) -> Result<()> {
        info!("googet: installing {}", names.join(", "));
        let spec = self.googet().args(["-noconfirm", "install"]).args(names.iter().cloned());
        self.runner.run_checked(&spec, cancel)?;
        Ok(())
    }

    fn remove(&self, cancel: &CancelToken, names: &[String], _options: ActionOptions) -> Result<()> {
        info!("googet: removing {}", names.join(", "));
        let spec = self.googet().args(["-noconfirm", "remove"]).args(names.iter().cloned());
        self.runner.run_checked(&spec, cancel)?;
        Ok(())
    }
}

fn split_name_arch(name_arch: &str) -> (&str, &str) {
    name_arch.rsplit_once('.').unwrap_or((name_arch, "noarch"))
}

/// Parse the indented `name.arch version` lines of `googet installed`
fn parse_installed(stdout: &str) -> Vec<PkgInfo> {
    stdout
        .lines()
        .filter(|line| line.starts_with(' ') || line.starts_with('\t'))
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let (name, arch) = split_name_arch(fields.next()?);
            let version = fields.next()?;
            Some(PkgInfo::new(name, arch, version))
        })
        .collect()
}

/// Parse `name.arch, old --> new from repo` lines of `googet update`
fn parse_update_listing(stdout: &str) -> Vec<PkgInfo> {
    stdout
        .lines()
        .filter_map(|line| {
            let (left, right) = line.split_once("-->")?;
            let (name_arch, _current) = left.trim().split_once(',')?;
            let (name, arch) = split_name_arch(name_arch.trim());
            let version = right.split_whitespace().next()?;
            Some(PkgInfo::new(name, arch, version))
        })
        .collect()
}
