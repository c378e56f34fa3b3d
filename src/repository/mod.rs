// src/repository/mod.rs

//! Managed repository files
//!
//! Each package manager gets one repository file owned by the agent, plus a
//! keyring for apt. Files are replaced atomically and only when their content
//! changes, so a steady-state run leaves the filesystem untouched.

pub mod format;
pub mod gpg;

pub use gpg::{KeyFetcher, MAX_KEY_SIZE, sync_keyring};

use crate::atomic::write_atomic;
use crate::config::RepoFileConfig;
use crate::error::Result;
use crate::exec::CancelToken;
use crate::hash::{sha256, sha256_file};
use crate::policy::{Manager, RepositoryResource};
use std::path::Path;
use tracing::{debug, info, warn};

/// Replace `path` with `content` unless it already holds exactly that
///
/// Returns whether the file was written.
pub fn write_if_changed(path: &Path, content: &[u8]) -> Result<bool> {
    let wanted = sha256(content);
    if sha256_file(path)?.as_deref() == Some(wanted.as_str()) {
        debug!("{} is up to date", path.display());
        return Ok(false);
    }
    write_atomic(path, content, 0o644)?;
    info!("Updated {}", path.display());
    Ok(true)
}

/// Writes the managed repository files at configured locations
#[derive(Debug, Clone)]
pub struct RepoFiles {
    paths: RepoFileConfig,
}

impl RepoFiles {
    pub fn new(paths: RepoFileConfig) -> Self {
        Self { paths }
    }

    /// Location of the managed repository file for `manager`
    pub fn path_for(&self, manager: Manager) -> Option<&Path> {
        match manager {
            Manager::Apt => Some(&self.paths.apt),
            Manager::Yum => Some(&self.paths.yum),
            Manager::Zypper => Some(&self.paths.zypper),
            Manager::Goo => Some(&self.paths.googet),
            Manager::Any => None,
        }
    }

    pub fn keyring_path(&self) -> &Path {
        &self.paths.apt_keyring
    }

    /// Bring the repository file (and for apt, the keyring) for `manager` in
    /// line with `repos`
    ///
    /// The repository file is written even when the keyring cannot be
    /// updated; the keyring error is returned afterwards.
    pub fn sync(
        &self,
        manager: Manager,
        repos: &[&RepositoryResource],
        keys: &dyn KeyFetcher,
        cancel: &CancelToken,
    ) -> Result<bool> {
        let Some(path) = self.path_for(manager) else {
            return Ok(false);
        };

        let keyring = if manager == Manager::Apt {
            let urls = apt_key_urls(repos);
            Some(sync_keyring(self.keyring_path(), &urls, keys, cancel))
        } else {
            None
        };

        let content = format::render(manager, repos);
        let mut changed = write_if_changed(path, content.as_bytes())?;

        match keyring {
            Some(Ok(keyring_changed)) => changed |= keyring_changed,
            Some(Err(e)) => {
                warn!("Failed to update apt keyring: {}", e);
                return Err(e);
            }
            None => {}
        }
        Ok(changed)
    }
}

/// Key URLs referenced by apt repositories, first occurrence kept
fn apt_key_urls(repos: &[&RepositoryResource]) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for repo in repos {
        if let RepositoryResource::Apt(apt) = repo {
            if let Some(key) = apt.gpg_key.as_deref().filter(|k| !k.is_empty()) {
                if !urls.iter().any(|u| u == key) {
                    urls.push(key.to_string());
                }
            }
        }
    }
    urls
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::policy::{AptRepository, ArchiveType, RpmRepository};
    use std::fs;
    use std::os::unix::fs::MetadataExt;
    use std::path::PathBuf;

    struct NoKeys;

    impl KeyFetcher for NoKeys {
        fn fetch_key(&self, url: &str, _cancel: &CancelToken) -> Result<Vec<u8>> {
            Err(Error::DownloadError(format!("HTTP 404 from {url}")))
        }
    }

    fn paths(root: &Path) -> RepoFileConfig {
        RepoFileConfig {
            apt: root.join("apt/managed.list"),
            apt_keyring: root.join("apt/managed.gpg"),
            yum: root.join("yum/managed.repo"),
            zypper: root.join("zypp/managed.repo"),
            googet: root.join("googet/managed.repo"),
        }
    }

    #[test]
    fn test_write_if_changed_skips_identical_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repos/managed.repo");

        assert!(write_if_changed(&path, b"content\n").unwrap());
        let inode = fs::metadata(&path).unwrap().ino();

        assert!(!write_if_changed(&path, b"content\n").unwrap());
        assert_eq!(fs::metadata(&path).unwrap().ino(), inode);

        assert!(write_if_changed(&path, b"changed\n").unwrap());
        assert_eq!(fs::read(&path).unwrap(), b"changed\n");
    }

    #[test]
    fn test_sync_yum_then_empty_leaves_header() {
        let dir = tempfile::tempdir().unwrap();
        let files = RepoFiles::new(paths(dir.path()));
        let repo = RepositoryResource::Yum(RpmRepository {
            id: "epel".to_string(),
            display_name: None,
            base_url: "https://example.com/epel".to_string(),
            gpg_keys: vec![],
        });

        assert!(files.sync(Manager::Yum, &[&repo], &NoKeys, &CancelToken::new()).unwrap());
        assert!(!files.sync(Manager::Yum, &[&repo], &NoKeys, &CancelToken::new()).unwrap());
        let path = PathBuf::from(files.path_for(Manager::Yum).unwrap());
        assert!(fs::read_to_string(&path).unwrap().contains("[epel]"));

        assert!(files.sync(Manager::Yum, &[], &NoKeys, &CancelToken::new()).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), format!("{}\n", format::HEADER));
    }

    #[test]
    fn test_sync_apt_writes_list_despite_key_failure() {
        let dir = tempfile::tempdir().unwrap();
        let files = RepoFiles::new(paths(dir.path()));
        let repo = RepositoryResource::Apt(AptRepository {
            archive_type: ArchiveType::Deb,
            uri: "http://deb.example.com".to_string(),
            distribution: "stable".to_string(),
            components: vec!["main".to_string()],
            gpg_key: Some("https://deb.example.com/key.gpg".to_string()),
        });

        let err = files.sync(Manager::Apt, &[&repo], &NoKeys, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, Error::DownloadError(_)));
        let list = fs::read_to_string(files.path_for(Manager::Apt).unwrap()).unwrap();
        assert!(list.contains("deb http://deb.example.com stable main"));
        assert!(!files.keyring_path().exists());
    }

    #[test]
    fn test_apt_key_urls_deduplicated() {
        let make = |key: Option<&str>| {
            RepositoryResource::Apt(AptRepository {
                archive_type: ArchiveType::Deb,
                uri: "http://a".to_string(),
                distribution: "d".to_string(),
                components: vec![],
                gpg_key: key.map(str::to_string),
            })
        };
        let a = make(Some("https://k1"));
        let b = make(Some("https://k1"));
        let c = make(None);
        let d = make(Some("https://k2"));
        assert_eq!(apt_key_urls(&[&a, &b, &c, &d]), vec!["https://k1", "https://k2"]);
    }
}
