// src/config.rs

//! Agent configuration
//!
//! Loaded from a TOML file (default `/etc/converge/agent.toml`). Every field
//! has a default, so a missing file or an empty one yields a working agent.
//!
//! # Example agent.toml
//!
//! ```toml
//! state_dir = "/var/lib/converge"
//! local_policy_path = "/etc/converge/policy.json"
//! poll_interval = "10m"
//! command_timeout = "30m"
//!
//! [remote]
//! endpoint = "https://policy.example.com/v1/lookup"
//! instance_id = "web-01"
//!
//! [retry]
//! interval = "1m"
//! attempts = 3
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default path for the agent configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/converge/agent.toml";

/// Top-level agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Root for agent-owned state
    pub state_dir: PathBuf,

    /// Recipe ledger file (defaults to `<state_dir>/recipedb`)
    pub ledger_path: Option<PathBuf>,

    /// Root for recipe run directories (defaults to `<state_dir>/recipes`)
    pub work_dir: Option<PathBuf>,

    /// Local policy declaration; absent file means no local policy
    pub local_policy_path: PathBuf,

    /// Time between scheduled runs in daemon mode
    pub poll_interval: String,

    /// Limit for a single package manager invocation
    pub command_timeout: String,

    /// Limit for a single recipe step
    pub step_timeout: String,

    /// Keep recipe run directories after the run finishes
    pub keep_run_dirs: bool,

    pub remote: RemoteConfig,
    pub retry: RetryConfig,
    pub repo_files: RepoFileConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("/var/lib/converge"),
            ledger_path: None,
            work_dir: None,
            local_policy_path: PathBuf::from("/etc/converge/policy.json"),
            poll_interval: "10m".to_string(),
            command_timeout: "30m".to_string(),
            step_timeout: "1h".to_string(),
            keep_run_dirs: false,
            remote: RemoteConfig::default(),
            retry: RetryConfig::default(),
            repo_files: RepoFileConfig::default(),
        }
    }
}

/// Remote effective-policy lookup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Lookup URL; no remote source when unset
    pub endpoint: Option<String>,

    /// Identity presented to the policy service
    pub instance_id: Option<String>,

    pub timeout: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            instance_id: None,
            timeout: "30s".to_string(),
        }
    }
}

/// Bounded retry for package changes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub interval: String,
    /// Total attempts including the first
    pub attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval: "1m".to_string(),
            attempts: 3,
        }
    }
}

/// Locations of the managed repository files
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoFileConfig {
    pub apt: PathBuf,
    pub apt_keyring: PathBuf,
    pub yum: PathBuf,
    pub zypper: PathBuf,
    pub googet: PathBuf,
}

impl Default for RepoFileConfig {
    fn default() -> Self {
        Self {
            apt: PathBuf::from("/etc/apt/sources.list.d/converge_managed.list"),
            apt_keyring: PathBuf::from("/etc/apt/trusted.gpg.d/converge_managed.gpg"),
            yum: PathBuf::from("/etc/yum.repos.d/converge_managed.repo"),
            zypper: PathBuf::from("/etc/zypp/repos.d/converge_managed.repo"),
            googet: PathBuf::from("/etc/googet/repos/converge_managed.repo"),
        }
    }
}

impl AgentConfig {
    /// Load configuration, falling back to defaults when the file is missing
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::IoError(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::parse(&text)
    }

    /// Parse and validate a TOML document
    pub fn parse(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| Error::Config(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every duration parses and the retry budget is usable
    pub fn validate(&self) -> Result<()> {
        self.poll_interval()?;
        self.command_timeout()?;
        self.step_timeout()?;
        self.remote_timeout()?;
        self.retry_interval()?;
        if self.retry.attempts == 0 {
            return Err(Error::Config("retry.attempts must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.ledger_path
            .clone()
            .unwrap_or_else(|| self.state_dir.join("recipedb"))
    }

    pub fn work_dir(&self) -> PathBuf {
        self.work_dir
            .clone()
            .unwrap_or_else(|| self.state_dir.join("recipes"))
    }

    pub fn poll_interval(&self) -> Result<Duration> {
        parse_duration(&self.poll_interval)
    }

    pub fn command_timeout(&self) -> Result<Duration> {
        parse_duration(&self.command_timeout)
    }

    pub fn step_timeout(&self) -> Result<Duration> {
        parse_duration(&self.step_timeout)
    }

    pub fn remote_timeout(&self) -> Result<Duration> {
        parse_duration(&self.remote.timeout)
    }

    pub fn retry_interval(&self) -> Result<Duration> {
        parse_duration(&self.retry.interval)
    }
}

/// Parse a duration string like "30s", "5m", "2h", "1d"
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(Duration::from_secs(0));
    }
    if !s.is_char_boundary(s.len() - 1) {
        return Err(Error::Config(format!("Invalid duration: {}", s)));
    }

    let (num_str, unit) = s.split_at(s.len() - 1);
    let num: u64 = num_str
        .parse()
        .map_err(|_| Error::Config(format!("Invalid duration number: {}", num_str)))?;

    let seconds = match unit {
        "s" => num,
        "m" => num * 60,
        "h" => num * 3600,
        "d" => num * 86400,
        _ => {
            return Err(Error::Config(format!("Invalid duration unit: {}", unit)));
        }
    };

    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_duration("").unwrap(), Duration::from_secs(0));
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("m").is_err());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AgentConfig::parse("").unwrap();
        assert_eq!(config.retry.attempts, 3);
        assert_eq!(config.ledger_path(), PathBuf::from("/var/lib/converge/recipedb"));
        assert_eq!(config.work_dir(), PathBuf::from("/var/lib/converge/recipes"));
        assert!(config.remote.endpoint.is_none());
    }

    #[test]
    fn test_partial_config() {
        let config = AgentConfig::parse(
            r#"
state_dir = "/tmp/agent"
poll_interval = "30s"

[retry]
interval = "10s"
attempts = 5

[repo_files]
apt = "/tmp/apt.list"
"#,
        )
        .unwrap();
        assert_eq!(config.poll_interval().unwrap(), Duration::from_secs(30));
        assert_eq!(config.retry_interval().unwrap(), Duration::from_secs(10));
        assert_eq!(config.retry.attempts, 5);
        assert_eq!(config.repo_files.apt, PathBuf::from("/tmp/apt.list"));
        assert_eq!(
            config.repo_files.yum,
            PathBuf::from("/etc/yum.repos.d/converge_managed.repo")
        );
        assert_eq!(config.ledger_path(), PathBuf::from("/tmp/agent/recipedb"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(AgentConfig::parse("poll_interval = \"soon\"").is_err());
        assert!(AgentConfig::parse("[retry]\nattempts = 0").is_err());
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.poll_interval, "10m");
    }
}
