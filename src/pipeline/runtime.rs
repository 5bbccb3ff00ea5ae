use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::debug;

use crate::pipeline::error::JobError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status_code: i32,
    pub stdout: String,
    pub stderr: String,
}

pub trait PipelineCommandRunner: Send + Sync + 'static {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, PipelineRuntimeError>;
}

#[derive(Debug, Default, Clone)]
pub struct StdPipelineCommandRunner;

impl PipelineCommandRunner for StdPipelineCommandRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, PipelineRuntimeError> {
        let output = Command::new(spec.program.as_str())
            .args(spec.args.iter().map(String::as_str))
            .current_dir(spec.cwd.as_path())
            .output()
            .map_err(PipelineRuntimeError::Io)?;

        Ok(CommandOutput {
            status_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(output.stdout.as_slice()).to_string(),
            stderr: String::from_utf8_lossy(output.stderr.as_slice()).to_string(),
        })
    }
}

#[derive(Debug, Error)]
pub enum PipelineRuntimeError {
    #[error("command execution failed: {0}")]
    Io(std::io::Error),
}

/// Runs `spec` and turns a spawn failure or a non-zero exit into a job error.
pub fn run_checked(
    runner: &dyn PipelineCommandRunner,
    spec: &CommandSpec,
) -> Result<CommandOutput, JobError> {
    debug!(program = %spec.program, args = spec.args.len(), "running external tool");
    let output = runner
        .run(spec)
        .map_err(|e| JobError::PostProcess(format!("{}: {e}", spec.program)))?;
    if output.status_code != 0 {
        return Err(JobError::ToolFailed {
            program: spec.program.clone(),
            status_code: output.status_code,
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output)
}

pub fn default_app_root_from_manifest_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).to_path_buf()
}

pub fn default_builtin_presets_dir() -> PathBuf {
    default_app_root_from_manifest_dir().join("presets")
}
