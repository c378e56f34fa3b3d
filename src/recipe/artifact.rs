// src/recipe/artifact.rs

//! Artifact retrieval
//!
//! Every artifact of a recipe is materialized under
//! `<run_dir>/artifacts/<id>/` before the first step runs.

use crate::client::HttpClient;
use crate::error::{Error, Result};
use crate::exec::CancelToken;
use crate::hash::verify_sha256;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use url::Url;

use super::format::{Artifact, ArtifactLocation, check_identifier};

/// Fetches remote artifacts
pub trait Downloader {
    /// Download `url` to `dest`, returning the SHA-256 of the content
    fn download(&self, url: &str, dest: &Path, cancel: &CancelToken) -> Result<String>;
}

impl Downloader for HttpClient {
    fn download(&self, url: &str, dest: &Path, cancel: &CancelToken) -> Result<String> {
        self.download_file(url, dest, cancel)
    }
}

/// Local paths of fetched artifacts, by artifact id
pub type ArtifactPaths = HashMap<String, PathBuf>;

/// Fetch every artifact into `dir`, stopping at the first failure
pub fn fetch_artifacts(
    artifacts: &[Artifact],
    dir: &Path,
    downloader: &dyn Downloader,
    cancel: &CancelToken,
) -> Result<ArtifactPaths> {
    let mut seen = HashSet::new();
    for artifact in artifacts {
        check_identifier("artifact id", &artifact.id)?;
        if !seen.insert(artifact.id.as_str()) {
            return Err(Error::ParseError(format!("duplicate artifact id '{}'", artifact.id)));
        }
    }

    let mut paths = ArtifactPaths::new();
    for artifact in artifacts {
        cancel.check()?;
        let path = fetch_artifact(artifact, &dir.join(&artifact.id), downloader, cancel)?;
        paths.insert(artifact.id.clone(), path);
    }
    Ok(paths)
}

fn fetch_artifact(
    artifact: &Artifact,
    dir: &Path,
    downloader: &dyn Downloader,
    cancel: &CancelToken,
) -> Result<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| {
        Error::IoError(format!("Failed to create {}: {}", dir.display(), e))
    })?;

    match artifact.location()? {
        ArtifactLocation::Remote(remote) => {
            let url = Url::parse(&remote.uri).map_err(|e| {
                Error::ParseError(format!("artifact '{}' has invalid URI {}: {}", artifact.id, remote.uri, e))
            })?;
            let checksum = remote.checksum.as_deref().filter(|c| !c.is_empty());
            match url.scheme() {
                "https" => {}
                "http" if checksum.is_some() || artifact.allow_insecure => {}
                "http" => {
                    return Err(Error::DownloadError(format!(
                        "artifact '{}' uses plain http without a checksum; set allowInsecure to permit it",
                        artifact.id
                    )));
                }
                other => {
                    return Err(Error::DownloadError(format!(
                        "artifact '{}' has unsupported scheme '{}'",
                        artifact.id, other
                    )));
                }
            }

            let dest = dir.join(file_name_from_url(&url));
            info!("Fetching artifact {} from {}", artifact.id, remote.uri);
            let digest = downloader.download(remote.uri.as_str(), &dest, cancel)?;
            if let Some(expected) = checksum {
                verify_sha256(&artifact.id, &digest, expected)?;
            }
            Ok(dest)
        }
        ArtifactLocation::Local(local) => {
            let src = Path::new(&local.path);
            let name = src
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "artifact".into());
            let dest = dir.join(name);
            debug!("Copying artifact {} from {}", artifact.id, src.display());
            fs::copy(src, &dest).map_err(|e| {
                Error::IoError(format!(
                    "Failed to copy artifact '{}' from {}: {}",
                    artifact.id,
                    src.display(),
                    e
                ))
            })?;
            Ok(dest)
        }
    }
}

/// Last non-empty path segment of `url`, or `artifact`
fn file_name_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .filter(|s| *s != "." && *s != "..")
        .map(str::to_string)
        .unwrap_or_else(|| "artifact".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::sha256;
    use crate::recipe::format::{LocalArtifact, RemoteArtifact};
    use std::sync::Mutex;

    /// Serves fixed bytes for any URL
    struct StaticDownloader {
        body: Vec<u8>,
        urls: Mutex<Vec<String>>,
    }

    impl StaticDownloader {
        fn new(body: &[u8]) -> Self {
            Self {
                body: body.to_vec(),
                urls: Mutex::new(Vec::new()),
            }
        }
    }

    impl Downloader for StaticDownloader {
        fn download(&self, url: &str, dest: &Path, _cancel: &CancelToken) -> Result<String> {
            self.urls.lock().unwrap().push(url.to_string());
            fs::write(dest, &self.body)?;
            Ok(sha256(&self.body))
        }
    }

    fn remote(id: &str, uri: &str, checksum: Option<&str>, allow_insecure: bool) -> Artifact {
        Artifact {
            id: id.to_string(),
            allow_insecure,
            remote: Some(RemoteArtifact {
                uri: uri.to_string(),
                checksum: checksum.map(str::to_string),
            }),
            local: None,
        }
    }

    #[test]
    fn test_fetch_remote_and_local() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("conf.ini");
        fs::write(&source, b"[conf]").unwrap();
        let local = Artifact {
            id: "conf".to_string(),
            local: Some(LocalArtifact {
                path: source.display().to_string(),
            }),
            ..Default::default()
        };
        let downloader = StaticDownloader::new(b"payload");
        let checksum = sha256(b"payload");
        let artifacts = [
            remote("bundle", "https://example.com/dl/tools.tar.gz?x=1", Some(&checksum), false),
            local,
        ];

        let out = dir.path().join("run/artifacts");
        let paths = fetch_artifacts(&artifacts, &out, &downloader, &CancelToken::new()).unwrap();
        assert_eq!(paths["bundle"], out.join("bundle/tools.tar.gz"));
        assert_eq!(fs::read(&paths["bundle"]).unwrap(), b"payload");
        assert_eq!(paths["conf"], out.join("conf/conf.ini"));
        assert_eq!(fs::read(&paths["conf"]).unwrap(), b"[conf]");
    }

    #[test]
    fn test_checksum_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = StaticDownloader::new(b"tampered");
        let artifacts = [remote("a", "https://example.com/a", Some(&sha256(b"original")), false)];
        let err = fetch_artifacts(&artifacts, dir.path(), &downloader, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_plain_http_rules() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = StaticDownloader::new(b"x");
        let cancel = CancelToken::new();

        let refused = [remote("a", "http://example.com/a", None, false)];
        assert!(fetch_artifacts(&refused, dir.path(), &downloader, &cancel).is_err());
        assert!(downloader.urls.lock().unwrap().is_empty());

        let insecure = [remote("a", "http://example.com/a", None, true)];
        assert!(fetch_artifacts(&insecure, dir.path(), &downloader, &cancel).is_ok());

        let pinned = [remote("b", "http://example.com/b", Some(&sha256(b"x")), false)];
        assert!(fetch_artifacts(&pinned, dir.path(), &downloader, &cancel).is_ok());

        let ftp = [remote("c", "ftp://example.com/c", None, true)];
        assert!(fetch_artifacts(&ftp, dir.path(), &downloader, &cancel).is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = StaticDownloader::new(b"x");
        let artifacts = [
            remote("a", "https://example.com/1", None, false),
            remote("a", "https://example.com/2", None, false),
        ];
        assert!(fetch_artifacts(&artifacts, dir.path(), &downloader, &CancelToken::new()).is_err());
    }

    #[test]
    fn test_escaping_ids_rejected_before_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("run/artifacts");
        let downloader = StaticDownloader::new(b"x");
        let escape = dir.path().join("escape");

        for id in [escape.display().to_string(), "../x".to_string(), "..".to_string()] {
            let artifacts = [
                remote("ok", "https://example.com/ok", None, false),
                remote(&id, "https://example.com/bad", None, false),
            ];
            let err = fetch_artifacts(&artifacts, &out, &downloader, &CancelToken::new()).unwrap_err();
            assert!(matches!(err, Error::ParseError(_)), "{id}: {err}");
        }

        assert!(downloader.urls.lock().unwrap().is_empty());
        assert!(!out.exists());
        assert!(!escape.exists());
        assert!(!dir.path().join("run/x").exists());
    }

    #[test]
    fn test_file_name_from_url() {
        let name = |u: &str| file_name_from_url(&Url::parse(u).unwrap());
        assert_eq!(name("https://h/a/b.deb"), "b.deb");
        assert_eq!(name("https://h/a/"), "a");
        assert_eq!(name("https://h"), "artifact");
    }
}
