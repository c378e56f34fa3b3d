// src/policy/source.rs

//! Policy source readers
//!
//! - [`LocalPolicySource`]: JSON declaration on disk; a missing file means
//!   "no local policy"
//! - [`RemotePolicySource`]: effective-policy lookup over HTTP with retry
//!
//! Readers only fetch and decode. Deciding what to do with a failure is the
//! caller's job (the agent logs it and treats the source as absent).

use crate::error::{Error, Result};
use crate::exec::CancelToken;
use crate::recipe::SoftwareRecipe;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{EffectivePolicy, PackageResource, PolicyDocument, RepositoryResource, Sourced};

/// Maximum attempts for the remote lookup
const MAX_RETRIES: u32 = 3;

/// Base delay between lookup attempts
const RETRY_DELAY_MS: u64 = 1000;

/// Something that can produce one side of the policy merge
pub trait PolicySource: Send {
    type Output;

    /// Short name for logs
    fn name(&self) -> &str;

    /// `Ok(None)` when the source has nothing to say
    fn fetch(&self, cancel: &CancelToken) -> Result<Option<Self::Output>>;
}

/// Reads the local policy declaration from a JSON file
#[derive(Debug, Clone)]
pub struct LocalPolicySource {
    path: PathBuf,
}

impl LocalPolicySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PolicySource for LocalPolicySource {
    type Output = PolicyDocument;

    fn name(&self) -> &str {
        "local"
    }

    fn fetch(&self, _cancel: &CancelToken) -> Result<Option<PolicyDocument>> {
        if !self.path.exists() {
            debug!("No local policy at {}", self.path.display());
            return Ok(None);
        }

        let text = std::fs::read_to_string(&self.path).map_err(|e| {
            Error::IoError(format!("Failed to read {}: {}", self.path.display(), e))
        })?;
        if text.trim().is_empty() {
            return Ok(None);
        }

        let doc: PolicyDocument = serde_json::from_str(&text).map_err(|e| {
            Error::ParseError(format!("Invalid local policy {}: {}", self.path.display(), e))
        })?;
        debug!(
            "Local policy: {} packages, {} repositories, {} recipes",
            doc.packages.len(),
            doc.repositories.len(),
            doc.recipes.len()
        );
        Ok(Some(doc))
    }
}

/// Wire request for the effective-policy lookup
#[derive(Debug, Serialize)]
struct LookupRequest<'a> {
    instance: &'a str,
}

/// Wire response of the effective-policy lookup
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupResponse {
    #[serde(default)]
    pub packages: Vec<RemotePackage>,
    #[serde(default)]
    pub package_repositories: Vec<RemoteRepository>,
    #[serde(default)]
    pub software_recipes: Vec<RemoteRecipe>,
}

#[derive(Debug, Deserialize)]
pub struct RemotePackage {
    #[serde(default)]
    pub source: String,
    pub package: PackageResource,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRepository {
    #[serde(default)]
    pub source: String,
    pub package_repository: RepositoryResource,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecipe {
    #[serde(default)]
    pub source: String,
    pub software_recipe: SoftwareRecipe,
}

impl From<LookupResponse> for EffectivePolicy {
    fn from(resp: LookupResponse) -> Self {
        Self {
            packages: resp
                .packages
                .into_iter()
                .map(|p| Sourced::new(p.source, p.package))
                .collect(),
            repositories: resp
                .package_repositories
                .into_iter()
                .map(|r| Sourced::new(r.source, r.package_repository))
                .collect(),
            recipes: resp
                .software_recipes
                .into_iter()
                .map(|r| Sourced::new(r.source, r.software_recipe))
                .collect(),
        }
    }
}

/// Looks up this host's effective policy from the policy service
pub struct RemotePolicySource {
    client: Client,
    endpoint: String,
    instance_id: String,
    max_retries: u32,
}

impl RemotePolicySource {
    pub fn new(endpoint: &str, instance_id: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            instance_id: instance_id.to_string(),
            max_retries: MAX_RETRIES,
        })
    }

    fn lookup_once(&self) -> Result<LookupResponse> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&LookupRequest {
                instance: &self.instance_id,
            })
            .send()
            .map_err(|e| Error::DownloadError(format!("Policy lookup failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::DownloadError(format!(
                "HTTP {} from {}",
                response.status(),
                self.endpoint
            )));
        }

        response
            .json()
            .map_err(|e| Error::ParseError(format!("Failed to parse policy response: {e}")))
    }
}

impl PolicySource for RemotePolicySource {
    type Output = EffectivePolicy;

    fn name(&self) -> &str {
        "remote"
    }

    fn fetch(&self, cancel: &CancelToken) -> Result<Option<EffectivePolicy>> {
        info!("Looking up effective policy from {}", self.endpoint);

        let mut attempt = 0;
        loop {
            cancel.check()?;
            attempt += 1;
            match self.lookup_once() {
                Ok(resp) => {
                    let policy = EffectivePolicy::from(resp);
                    info!(
                        "Remote policy: {} packages, {} repositories, {} recipes",
                        policy.packages.len(),
                        policy.repositories.len(),
                        policy.recipes.len()
                    );
                    return Ok(Some(policy));
                }
                // A malformed body will not improve by asking again
                Err(e @ Error::ParseError(_)) => return Err(e),
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(e);
                    }
                    warn!("Policy lookup attempt {} failed: {}, retrying...", attempt, e);
                    cancel.sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64))?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{DesiredState, Manager};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_missing_local_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let source = LocalPolicySource::new(dir.path().join("policy.json"));
        assert!(source.fetch(&CancelToken::new()).unwrap().is_none());
    }

    #[test]
    fn test_local_document_is_read() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"packages": [{{"name": "vim", "desiredState": "UPDATED", "manager": "YUM"}}]}}"#
        )
        .unwrap();

        let doc = LocalPolicySource::new(file.path()).fetch(&CancelToken::new()).unwrap().unwrap();
        assert_eq!(doc.packages.len(), 1);
        assert_eq!(doc.packages[0].desired_state, DesiredState::Updated);
        assert_eq!(doc.packages[0].manager, Manager::Yum);
    }

    #[test]
    fn test_malformed_local_is_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{{ not json").unwrap();
        let err = LocalPolicySource::new(file.path()).fetch(&CancelToken::new()).unwrap_err();
        assert!(matches!(err, Error::ParseError(_)));
    }

    #[test]
    fn test_lookup_response_conversion() {
        let resp: LookupResponse = serde_json::from_str(
            r#"{
              "packages": [{"source": "policies/base", "package": {"name": "nginx", "manager": "APT"}}],
              "packageRepositories": [
                {"source": "policies/base", "packageRepository": {"zypper": {"id": "oss", "baseUrl": "https://x"}}}
              ],
              "softwareRecipes": [
                {"source": "policies/tools", "softwareRecipe": {"name": "tool", "version": "1.2"}}
              ]
            }"#,
        )
        .unwrap();

        let policy = EffectivePolicy::from(resp);
        assert_eq!(policy.packages[0].source, "policies/base");
        assert_eq!(policy.packages[0].resource.name, "nginx");
        assert_eq!(policy.repositories[0].resource.identity().as_deref(), Some("zypper-oss"));
        assert_eq!(policy.recipes[0].resource.version, "1.2");
    }

    #[test]
    fn test_cancelled_remote_lookup_is_not_sent() {
        let source =
            RemotePolicySource::new("http://127.0.0.1:9/lookup", "host-1", Duration::from_secs(5)).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(source.fetch(&cancel).unwrap_err(), Error::Cancelled));
    }
}
