// src/recipe/store.rs

//! Recipe ledger
//!
//! Records the last version of each recipe that was installed on this host.
//! The ledger is a JSON array with one object per line:
//!
//! ```json
//! [
//! {"Name":"tools","Version":[1,2,0],"InstallTime":1700000000,"Success":true}
//! ]
//! ```
//!
//! Every change is flushed by atomic replace; a crash during a write leaves
//! the previous ledger intact.

use crate::atomic::{StagedFile, stage};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::version::parse_version;

/// One ledger row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Recipe {
    pub name: String,
    pub version: Vec<u32>,
    /// Unix seconds
    pub install_time: i64,
    pub success: bool,
}

/// File-backed recipe ledger kept in memory
#[derive(Debug)]
pub struct RecipeDb {
    path: PathBuf,
    recipes: BTreeMap<String, Recipe>,
}

impl RecipeDb {
    /// Load the ledger at `path`; a missing or empty file is an empty ledger
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No recipe ledger at {}", path.display());
                String::new()
            }
            Err(e) => {
                return Err(Error::IoError(format!(
                    "Failed to read recipe ledger {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        let rows: Vec<Recipe> = if text.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(&text).map_err(|e| Error::LedgerCorrupt {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?
        };

        let recipes = rows.into_iter().map(|r| (r.name.clone(), r)).collect();
        Ok(Self { path, recipes })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, name: &str) -> Option<&Recipe> {
        self.recipes.get(name)
    }

    /// All rows ordered by name
    pub fn list(&self) -> Vec<&Recipe> {
        self.recipes.values().collect()
    }

    /// Record `name` at `version`, replacing any earlier row
    ///
    /// The version is validated before anything changes. If the ledger cannot
    /// be written the in-memory state is left as it was.
    pub fn add(&mut self, name: &str, version: &str, success: bool) -> Result<()> {
        let version = parse_version(version)?;
        let row = Recipe {
            name: name.to_string(),
            version,
            install_time: chrono::Utc::now().timestamp(),
            success,
        };

        let previous = self.recipes.insert(name.to_string(), row);
        if let Err(e) = self.flush() {
            match previous {
                Some(prev) => self.recipes.insert(name.to_string(), prev),
                None => self.recipes.remove(name),
            };
            return Err(e);
        }
        info!("Recorded recipe {} in {}", name, self.path.display());
        Ok(())
    }

    fn render(&self) -> Result<String> {
        let mut lines = Vec::with_capacity(self.recipes.len());
        for recipe in self.recipes.values() {
            lines.push(serde_json::to_string(recipe)?);
        }
        if lines.is_empty() {
            return Ok("[]\n".to_string());
        }
        Ok(format!("[\n{}\n]\n", lines.join(",\n")))
    }

    /// Write the current table next to the ledger without replacing it
    fn stage(&self) -> Result<StagedFile> {
        stage(&self.path, self.render()?.as_bytes(), 0o600)
    }

    fn flush(&self) -> Result<()> {
        self.stage()?.commit()
    }
}
