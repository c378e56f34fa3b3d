// src/recipe/step.rs

//! Recipe step execution
//!
//! Subprocess steps run in their own step directory with the recipe
//! environment: `RECIPE_NAME`, `RECIPE_VERSION`, `RUNID`, `PWD`, and one
//! variable per artifact (named by the artifact id) holding its local path.

use crate::error::{Error, Result};
use crate::exec::{CancelToken, CommandRunner, CommandSpec};
use flate2::read::GzDecoder;
use std::fs::{self, File, Permissions};
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::artifact::ArtifactPaths;
use super::format::{
    ArchiveExtraction, ArchiveFormat, FileCopy, FileExec, Interpreter, PackageInstallation,
    ScriptRun, SoftwareRecipe, Step, allowed_exit_codes,
};

/// File name a script step's source is written to inside its step directory
const SCRIPT_FILE: &str = "recipe_script";

/// Everything a step needs from the run it belongs to
pub struct StepContext<'a> {
    pub recipe: &'a SoftwareRecipe,
    pub run_id: &'a str,
    pub step_dir: PathBuf,
    pub artifacts: &'a ArtifactPaths,
    pub runner: &'a dyn CommandRunner,
    pub cancel: &'a CancelToken,
    pub timeout: Option<Duration>,
}

impl StepContext<'_> {
    /// A command carrying the recipe environment, run from the step directory
    fn command(&self, program: impl Into<String>) -> CommandSpec {
        let mut spec = CommandSpec::new(program)
            .current_dir(&self.step_dir)
            .timeout(self.timeout)
            .env("RECIPE_NAME", &self.recipe.name)
            .env("RECIPE_VERSION", &self.recipe.version)
            .env("RUNID", self.run_id)
            .env("PWD", self.step_dir.display().to_string());
        let mut ids: Vec<_> = self.artifacts.keys().collect();
        ids.sort();
        for id in ids {
            spec = spec.env(id.as_str(), self.artifacts[id].display().to_string());
        }
        spec
    }

    fn artifact(&self, id: &str) -> Result<&Path> {
        self.artifacts
            .get(id)
            .map(PathBuf::as_path)
            .ok_or_else(|| Error::NotFoundError(format!("artifact '{id}' is not declared by the recipe")))
    }

    /// Run `spec`, accepting any exit code in `allowed`
    fn run_allowing(&self, spec: &CommandSpec, allowed: &[i32]) -> Result<()> {
        let output = self.runner.run(spec, self.cancel)?;
        let allowed = allowed_exit_codes(allowed);
        match output.code {
            Some(code) if allowed.contains(&code) => {
                debug!("{} exited with {}", spec.display(), code);
                Ok(())
            }
            code => Err(Error::CommandFailed {
                command: spec.display(),
                code: match code {
                    Some(c) => format!("exit code {c} (allowed: {allowed:?})"),
                    None => "termination by signal".to_string(),
                },
                output: output.combined(),
            }),
        }
    }
}

/// Execute one step
pub fn run_step(step: &Step, ctx: &StepContext<'_>) -> Result<()> {
    fs::create_dir_all(&ctx.step_dir).map_err(|e| {
        Error::IoError(format!("Failed to create {}: {}", ctx.step_dir.display(), e))
    })?;
    match step {
        Step::ScriptRun(s) => script_run(s, ctx),
        Step::FileExec(s) => file_exec(s, ctx),
        Step::FileCopy(s) => file_copy(s, ctx),
        Step::ArchiveExtraction(s) => archive_extraction(s, ctx),
        Step::DpkgInstallation(s) => dpkg_installation(s, ctx),
        Step::RpmInstallation(s) => rpm_installation(s, ctx),
    }
}

fn script_run(step: &ScriptRun, ctx: &StepContext<'_>) -> Result<()> {
    let script = ctx.step_dir.join(SCRIPT_FILE);
    fs::write(&script, &step.script)?;

    let spec = match step.interpreter {
        Interpreter::Shell => {
            fs::set_permissions(&script, Permissions::from_mode(0o644))?;
            ctx.command("/bin/sh").arg(script.display().to_string())
        }
        Interpreter::None => {
            fs::set_permissions(&script, Permissions::from_mode(0o755))?;
            ctx.command(script.display().to_string())
        }
    };
    ctx.run_allowing(&spec, &step.allowed_exit_codes)
}

fn file_exec(step: &FileExec, ctx: &StepContext<'_>) -> Result<()> {
    let program = match (&step.artifact_id, &step.local_path) {
        (Some(id), None) => {
            let path = ctx.artifact(id)?;
            // Downloaded artifacts are not executable yet
            fs::set_permissions(path, Permissions::from_mode(0o755))?;
            path.to_path_buf()
        }
        (None, Some(path)) => PathBuf::from(path),
        _ => {
            return Err(Error::ParseError(
                "fileExec needs exactly one of artifactId or localPath".to_string(),
            ));
        }
    };
    let spec = ctx
        .command(program.display().to_string())
        .args(step.args.iter().cloned());
    ctx.run_allowing(&spec, &step.allowed_exit_codes)
}

/// Parse an octal mode string such as `"755"` or `"0644"`
fn parse_mode(mode: &str) -> Result<u32> {
    u32::from_str_radix(mode.trim(), 8)
        .ok()
        .filter(|m| *m <= 0o7777)
        .ok_or_else(|| Error::ParseError(format!("invalid permissions '{mode}'")))
}

fn file_copy(step: &FileCopy, ctx: &StepContext<'_>) -> Result<()> {
    let src = ctx.artifact(&step.artifact_id)?;
    let dest = Path::new(&step.destination);
    let mode = step.permissions.as_deref().map(parse_mode).transpose()?;

    if dest.exists() && !step.overwrite {
        return Err(Error::IoError(format!(
            "{} already exists and overwrite is not set",
            dest.display()
        )));
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(src, dest).map_err(|e| {
        Error::IoError(format!("Failed to copy {} to {}: {}", src.display(), dest.display(), e))
    })?;
    if let Some(mode) = mode {
        fs::set_permissions(dest, Permissions::from_mode(mode))?;
    }
    info!("Copied artifact {} to {}", step.artifact_id, dest.display());
    Ok(())
}

fn archive_extraction(step: &ArchiveExtraction, ctx: &StepContext<'_>) -> Result<()> {
    let src = ctx.artifact(&step.artifact_id)?;
    let dest = Path::new(&step.destination);
    fs::create_dir_all(dest)?;

    let file = File::open(src)
        .map_err(|e| Error::IoError(format!("Failed to open {}: {}", src.display(), e)))?;
    let reader: Box<dyn Read> = match step.format {
        ArchiveFormat::Tar => Box::new(file),
        ArchiveFormat::TarGzip => Box::new(GzDecoder::new(file)),
    };
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.unpack(dest).map_err(|e| {
        Error::IoError(format!(
            "Failed to extract {} to {}: {}",
            src.display(),
            dest.display(),
            e
        ))
    })?;
    info!("Extracted artifact {} to {}", step.artifact_id, dest.display());
    Ok(())
}

fn dpkg_installation(step: &PackageInstallation, ctx: &StepContext<'_>) -> Result<()> {
    let package = ctx.artifact(&step.artifact_id)?;
    let spec = ctx
        .command("dpkg")
        .env("DEBIAN_FRONTEND", "noninteractive")
        .args(["--install".to_string(), package.display().to_string()]);
    ctx.run_allowing(&spec, &[])
}

fn rpm_installation(step: &PackageInstallation, ctx: &StepContext<'_>) -> Result<()> {
    let package = ctx.artifact(&step.artifact_id)?;
    let spec = ctx
        .command("rpm")
        .args(["--upgrade".to_string(), "--replacepkgs".to_string(), package.display().to_string()]);
    ctx.run_allowing(&spec, &[])
}
