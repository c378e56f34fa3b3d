// src/recipe/format.rs

//! Software recipe definitions
//!
//! Recipes arrive inside policy documents as camelCase JSON. Each step is an
//! object with exactly one key naming its kind:
//!
//! ```json
//! {
//!   "name": "agent-tools",
//!   "version": "1.2.0",
//!   "desiredState": "UPDATED",
//!   "artifacts": [
//!     {"id": "bundle", "remote": {"uri": "https://example.com/tools.tar.gz", "checksum": "ab12..."}}
//!   ],
//!   "installSteps": [
//!     {"archiveExtraction": {"artifactId": "bundle", "destination": "/opt/tools", "type": "TAR_GZIP"}},
//!     {"scriptRun": {"script": "/opt/tools/setup.sh"}}
//!   ]
//! }
//! ```

use crate::error::{Error, Result};
use crate::policy::DesiredState;
use serde::{Deserialize, Serialize};

/// A named, versioned custom installer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoftwareRecipe {
    pub name: String,

    /// Dot-separated integers; empty means `0`
    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub desired_state: DesiredState,

    #[serde(default)]
    pub artifacts: Vec<Artifact>,

    #[serde(default)]
    pub install_steps: Vec<Step>,

    #[serde(default)]
    pub update_steps: Vec<Step>,
}

/// A file a recipe's steps need, fetched before any step runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub id: String,

    /// Permit plain `http` without a checksum
    #[serde(default)]
    pub allow_insecure: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteArtifact>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalArtifact>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteArtifact {
    pub uri: String,
    /// SHA-256 hex digest
    #[serde(default)]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalArtifact {
    pub path: String,
}

/// Where an artifact comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactLocation<'a> {
    Remote(&'a RemoteArtifact),
    Local(&'a LocalArtifact),
}

impl Artifact {
    /// The artifact's single location
    pub fn location(&self) -> Result<ArtifactLocation<'_>> {
        match (&self.remote, &self.local) {
            (Some(remote), None) => Ok(ArtifactLocation::Remote(remote)),
            (None, Some(local)) => Ok(ArtifactLocation::Local(local)),
            (Some(_), Some(_)) => Err(Error::ParseError(format!(
                "artifact '{}' has both a remote and a local location",
                self.id
            ))),
            (None, None) => Err(Error::ParseError(format!(
                "artifact '{}' has no location",
                self.id
            ))),
        }
    }
}

/// How a script step is run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Interpreter {
    /// `/bin/sh <script>`
    #[default]
    #[serde(alias = "INTERPRETER_UNSPECIFIED")]
    Shell,
    /// The script is made executable and run directly (it needs a shebang)
    None,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArchiveFormat {
    #[default]
    Tar,
    TarGzip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptRun {
    pub script: String,
    #[serde(default)]
    pub interpreter: Interpreter,
    #[serde(default)]
    pub allowed_exit_codes: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileExec {
    #[serde(default)]
    pub artifact_id: Option<String>,
    #[serde(default)]
    pub local_path: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub allowed_exit_codes: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCopy {
    pub artifact_id: String,
    pub destination: String,
    #[serde(default)]
    pub overwrite: bool,
    /// Octal mode such as `"755"`
    #[serde(default)]
    pub permissions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveExtraction {
    pub artifact_id: String,
    pub destination: String,
    #[serde(default, rename = "type")]
    pub format: ArchiveFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageInstallation {
    pub artifact_id: String,
}

/// One recipe step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Step {
    ScriptRun(ScriptRun),
    FileExec(FileExec),
    FileCopy(FileCopy),
    ArchiveExtraction(ArchiveExtraction),
    DpkgInstallation(PackageInstallation),
    RpmInstallation(PackageInstallation),
}

impl Step {
    /// Step kind as it appears in recipe documents
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ScriptRun(_) => "scriptRun",
            Self::FileExec(_) => "fileExec",
            Self::FileCopy(_) => "fileCopy",
            Self::ArchiveExtraction(_) => "archiveExtraction",
            Self::DpkgInstallation(_) => "dpkgInstallation",
            Self::RpmInstallation(_) => "rpmInstallation",
        }
    }
}

/// Exit codes a step accepts, `[0]` when none are listed
pub fn allowed_exit_codes(codes: &[i32]) -> Vec<i32> {
    if codes.is_empty() { vec![0] } else { codes.to_vec() }
}

/// Require `value` to be a single plain path component
///
/// Recipe names and artifact ids become directory names under the run
/// directory, and artifact ids also name step environment variables.
pub fn check_identifier(kind: &str, value: &str) -> Result<()> {
    let plain = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if value.is_empty() || value == "." || value == ".." || !plain {
        return Err(Error::ParseError(format!(
            "invalid {kind} '{value}': use letters, digits, '_', '.' or '-'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_identifier() {
        for ok in ["tools", "agent-tools", "v1.2_x", "..a"] {
            assert!(check_identifier("recipe name", ok).is_ok(), "{ok}");
        }
        for bad in ["", ".", "..", "../x", "/abs", "a/b", "a b", "x=y"] {
            let err = check_identifier("recipe name", bad).unwrap_err();
            assert!(matches!(err, Error::ParseError(_)), "{bad}");
        }
    }

    #[test]
    fn test_parse_recipe() {
        let json = r#"{
            "name": "tools",
            "version": "1.2",
            "desiredState": "UPDATED",
            "artifacts": [
                {"id": "bundle", "remote": {"uri": "https://example.com/b.tgz", "checksum": "abc"}},
                {"id": "conf", "local": {"path": "/srv/conf"}}
            ],
            "installSteps": [
                {"archiveExtraction": {"artifactId": "bundle", "destination": "/opt/t", "type": "TAR_GZIP"}},
                {"fileCopy": {"artifactId": "conf", "destination": "/etc/t.conf", "permissions": "644"}},
                {"scriptRun": {"script": "echo hi", "allowedExitCodes": [0, 3]}},
                {"fileExec": {"localPath": "/bin/true"}},
                {"dpkgInstallation": {"artifactId": "bundle"}}
            ]
        }"#;

        let recipe: SoftwareRecipe = serde_json::from_str(json).unwrap();
        assert_eq!(recipe.name, "tools");
        assert_eq!(recipe.desired_state, DesiredState::Updated);
        assert!(recipe.update_steps.is_empty());

        let kinds: Vec<_> = recipe.install_steps.iter().map(Step::kind).collect();
        assert_eq!(
            kinds,
            vec!["archiveExtraction", "fileCopy", "scriptRun", "fileExec", "dpkgInstallation"]
        );
        match &recipe.install_steps[0] {
            Step::ArchiveExtraction(x) => assert_eq!(x.format, ArchiveFormat::TarGzip),
            other => panic!("unexpected step {other:?}"),
        }
        match &recipe.install_steps[2] {
            Step::ScriptRun(s) => {
                assert_eq!(s.interpreter, Interpreter::Shell);
                assert_eq!(allowed_exit_codes(&s.allowed_exit_codes), vec![0, 3]);
            }
            other => panic!("unexpected step {other:?}"),
        }

        assert!(matches!(recipe.artifacts[0].location(), Ok(ArtifactLocation::Remote(_))));
        assert!(matches!(recipe.artifacts[1].location(), Ok(ArtifactLocation::Local(_))));
    }

    #[test]
    fn test_artifact_needs_exactly_one_location() {
        let none = Artifact {
            id: "a".to_string(),
            ..Default::default()
        };
        assert!(none.location().is_err());

        let both = Artifact {
            id: "a".to_string(),
            remote: Some(RemoteArtifact {
                uri: "https://x".to_string(),
                checksum: None,
            }),
            local: Some(LocalArtifact {
                path: "/x".to_string(),
            }),
            ..Default::default()
        };
        assert!(both.location().is_err());
    }

    #[test]
    fn test_default_exit_codes() {
        assert_eq!(allowed_exit_codes(&[]), vec![0]);
    }
}
