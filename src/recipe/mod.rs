// src/recipe/mod.rs

//! Software recipes
//!
//! A recipe is a named, versioned custom installer that sits outside the
//! native package managers: a list of artifacts to fetch and steps to run
//! (scripts, executables, file copies, archive extraction, local dpkg/rpm
//! installs). The ledger in [`store`] remembers which version of each recipe
//! was last installed so a recipe runs once per version.

mod artifact;
mod format;
mod runner;
mod step;
pub mod store;
mod version;

pub use artifact::{ArtifactPaths, Downloader, fetch_artifacts};
pub use format::{
    ArchiveExtraction, ArchiveFormat, Artifact, ArtifactLocation, FileCopy, FileExec, Interpreter,
    LocalArtifact, PackageInstallation, RemoteArtifact, ScriptRun, SoftwareRecipe, Step,
    allowed_exit_codes,
};
pub use runner::{RecipeAction, RecipeOutcome, RecipeRunner, decide};
pub use step::{StepContext, run_step};
pub use store::{Recipe, RecipeDb};
pub use version::{format_version, parse_version};
