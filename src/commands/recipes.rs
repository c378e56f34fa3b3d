// src/commands/recipes.rs

//! Recipe ledger listing

use anyhow::Result;
use chrono::DateTime;
use converge::config::AgentConfig;
use converge::recipe::{RecipeDb, format_version};

pub fn cmd_recipes(config: &AgentConfig, json: bool) -> Result<()> {
    let db = RecipeDb::load(config.ledger_path())?;
    let recipes = db.list();

    if json {
        println!("{}", serde_json::to_string_pretty(&recipes)?);
        return Ok(());
    }

    if recipes.is_empty() {
        println!("No recipes recorded in {}.", db.path().display());
        return Ok(());
    }

    println!("{:<32} {:<16} INSTALLED", "NAME", "VERSION");
    for recipe in recipes {
        let installed = DateTime::from_timestamp(recipe.install_time, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| recipe.install_time.to_string());
        println!(
            "{:<32} {:<16} {}",
            recipe.name,
            format_version(&recipe.version),
            installed
        );
    }
    Ok(())
}
