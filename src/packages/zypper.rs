// src/packages/zypper.rs

//! zypper adapter

use crate::error::Result;
use crate::exec::{CancelToken, CommandRunner, CommandSpec};
use crate::policy::Manager;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{ActionOptions, PackageManager, PkgInfo, rpm_installed};

pub struct Zypper {
    runner: Arc<dyn CommandRunner>,
    timeout: Option<Duration>,
}

impl Zypper {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Option<Duration>) -> Self {
        Self { runner, timeout }
    }

    fn zypper(&self) -> CommandSpec {
        CommandSpec::new("zypper")
            .args(["--gpg-auto-import-keys", "--non-interactive"])
            .timeout(self.timeout)
    }
}

impl PackageManager for Zypper {
    fn manager(&self) -> Manager {
        Manager::Zypper
    }

    fn list_installed(&self, cancel: &CancelToken) -> Result<Vec<PkgInfo>> {
        rpm_installed(self.runner.as_ref(), cancel, self.timeout)
    }

    fn list_upgradable(&self, cancel: &CancelToken) -> Result<Vec<PkgInfo>> {
        let spec = self.zypper().args(["--quiet", "list-updates"]);
        let output = self.runner.run_checked(&spec, cancel)?;
        let pkgs = parse_list_updates(&output.stdout);
        debug!("zypper: {} upgradable packages", pkgs.len());
        Ok(pkgs)
    }

    fn install(&self, cancel: &CancelToken, names: &[String], _options: ActionOptions) -> Result<()> {
        info!("zypper: installing {}", names.join(", "));
        let spec = self
            .zypper()
            .args(["install", "--auto-agree-with-licenses"])
            .args(names.iter().cloned());
        self.runner.run_checked(&spec, cancel)?;
        Ok(())
    }

    fn remove(&self, cancel: &CancelToken, names: &[String], _options: ActionOptions) -> Result<()> {
        info!("zypper: removing {}", names.join(", "));
        let spec = self.zypper().arg("remove").args(names.iter().cloned());
        self.runner.run_checked(&spec, cancel)?;
        Ok(())
    }
}

/// Parse the table printed by `zypper list-updates`
///
/// `S | Repository | Name | Current Version | Available Version | Arch`
fn parse_list_updates(stdout: &str) -> Vec<PkgInfo> {
    stdout
        .lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split('|').map(str::trim).collect();
            match cols.as_slice() {
                [status, _repo, name, _current, available, arch] if *status == "v" => {
                    Some(PkgInfo::new(*name, *arch, *available))
                }
                _ => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::fake::ScriptedRunner;

    #[test]
    fn test_parse_list_updates() {
        let stdout = "\
S | Repository         | Name      | Current Version | Available Version | Arch
--+--------------------+-----------+-----------------+-------------------+-------
v | SLES15-SP5-Updates | curl      | 8.0.1-150400.5  | 8.0.1-150400.9    | x86_64
v | SLES15-SP5-Updates | timezone  | 2023c-150000.75 | 2024a-150000.75   | noarch
";
        let pkgs = parse_list_updates(stdout);
        assert_eq!(
            pkgs,
            vec![
                PkgInfo::new("curl", "x86_64", "8.0.1-150400.9"),
                PkgInfo::new("timezone", "noarch", "2024a-150000.75"),
            ]
        );
    }

    #[test]
    fn test_install_command() {
        let runner = Arc::new(ScriptedRunner::new());
        let zypper = Zypper::new(runner.clone(), None);
        zypper
            .install(&CancelToken::new(), &["vim".to_string()], ActionOptions::default())
            .unwrap();
        assert_eq!(
            runner.calls(),
            vec!["zypper --gpg-auto-import-keys --non-interactive install --auto-agree-with-licenses vim"]
        );
    }
}
