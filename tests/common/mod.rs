// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use converge::config::RepoFileConfig;
use converge::exec::{CancelToken, CommandOutput, CommandRunner, CommandSpec};
use converge::policy::PolicySource;
use converge::recipe::Downloader;
use converge::repository::KeyFetcher;
use converge::{Error, Result};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

/// Stands in for dpkg and apt-get, keeping the installed set in memory
///
/// Installing a name listed in `missing` fails the way apt-get does for an
/// unknown package.
#[derive(Default)]
pub struct FakeDpkg {
    installed: Mutex<BTreeSet<String>>,
    missing: BTreeSet<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeDpkg {
    pub fn with_installed(names: &[&str]) -> Self {
        Self {
            installed: Mutex::new(names.iter().map(|n| n.to_string()).collect()),
            ..Default::default()
        }
    }

    pub fn missing(mut self, name: &str) -> Self {
        self.missing.insert(name.to_string());
        self
    }

    pub fn installed(&self) -> Vec<String> {
        self.installed.lock().unwrap().iter().cloned().collect()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls whose command line starts with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

impl CommandRunner for FakeDpkg {
    fn run(&self, spec: &CommandSpec, _cancel: &CancelToken) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(spec.display());

        let args: Vec<&str> = spec.args.iter().map(String::as_str).collect();
        let names = |rest: &[&str]| -> Vec<String> {
            rest.iter()
                .filter(|a| !a.starts_with('-'))
                .map(|a| a.to_string())
                .collect()
        };
        let ok = |stdout: String| CommandOutput {
            code: Some(0),
            stdout,
            stderr: String::new(),
        };

        let output = match (spec.program.as_str(), args.as_slice()) {
            ("dpkg-query", _) => {
                let mut listing = String::new();
                for name in self.installed.lock().unwrap().iter() {
                    listing.push_str(&format!("{name} amd64 1.0-1 installed\n"));
                }
                ok(listing)
            }
            ("apt-get", ["install", "-y", rest @ ..]) => {
                let names = names(rest);
                if let Some(bad) = names.iter().find(|n| self.missing.contains(*n)) {
                    return Ok(CommandOutput {
                        code: Some(100),
                        stdout: String::new(),
                        stderr: format!("E: Unable to locate package {bad}\n"),
                    });
                }
                self.installed.lock().unwrap().extend(names);
                ok(String::new())
            }
            ("apt-get", ["remove", "-y", rest @ ..]) => {
                let mut installed = self.installed.lock().unwrap();
                for name in names(rest) {
                    installed.remove(&name);
                }
                ok(String::new())
            }
            _ => ok(String::new()),
        };
        Ok(output)
    }
}

/// Key fetcher and downloader with no network
pub struct Offline;

impl KeyFetcher for Offline {
    fn fetch_key(&self, url: &str, _cancel: &CancelToken) -> Result<Vec<u8>> {
        Err(Error::DownloadError(format!("offline: {url}")))
    }
}

impl Downloader for Offline {
    fn download(&self, url: &str, _dest: &Path, _cancel: &CancelToken) -> Result<String> {
        Err(Error::DownloadError(format!("offline: {url}")))
    }
}

/// Policy source that always returns the same answer
pub struct Fixed<T>(pub Option<T>);

impl<T: Clone + Send> PolicySource for Fixed<T> {
    type Output = T;

    fn name(&self) -> &str {
        "fixed"
    }

    fn fetch(&self, _cancel: &CancelToken) -> Result<Option<T>> {
        Ok(self.0.clone())
    }
}

/// Managed repository files under `root`
pub fn repo_paths(root: &Path) -> RepoFileConfig {
    RepoFileConfig {
        apt: root.join("apt/converge_managed.list"),
        apt_keyring: root.join("apt/converge_managed.gpg"),
        yum: root.join("yum/converge_managed.repo"),
        zypper: root.join("zypp/converge_managed.repo"),
        googet: root.join("googet/converge_managed.repo"),
    }
}
