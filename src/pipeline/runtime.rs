use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(values.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn succeeded(&self) -> bool {
        self.status_code == 0
    }
}

/// Runs one external tool to completion and captures its output.
///
/// Every stage that shells out goes through this seam so tests can record the
/// exact invocations and feed canned outputs back.
pub trait PipelineCommandRunner: Send + Sync + 'static {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, PipelineRuntimeError>;
}

pub type SharedCommandRunner = Arc<dyn PipelineCommandRunner>;

#[derive(Debug, Default, Clone)]
pub struct StdPipelineCommandRunner;

impl PipelineCommandRunner for StdPipelineCommandRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, PipelineRuntimeError> {
        debug!(command = %spec.display(), cwd = %spec.cwd.display(), "spawning external tool");
        let output = Command::new(spec.program.as_str())
            .args(spec.args.iter().map(String::as_str))
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(spec.cwd.as_path())
            .output()
            .map_err(|source| {
                if source.kind() == ErrorKind::NotFound {
                    PipelineRuntimeError::ProgramNotFound(spec.program.clone())
                } else {
                    PipelineRuntimeError::Io(source)
                }
            })?;

        Ok(CommandOutput {
            status_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(output.stdout.as_slice()).to_string(),
            stderr: String::from_utf8_lossy(output.stderr.as_slice()).to_string(),
        })
    }
}

#[derive(Debug, Error)]
pub enum PipelineRuntimeError {
    #[error("command not found: {0}")]
    ProgramNotFound(String),
    #[error("command execution failed: {0}")]
    Io(#[source] std::io::Error),
}

/// Clips tool diagnostics the way reports carry them: at most `max_chars`
/// characters followed by an ellipsis marker.
pub fn truncate_diagnostic(text: &str, max_chars: usize) -> String {
    let clipped = text.chars().take(max_chars).collect::<String>();
    format!("{clipped}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_spec_builder_collects_args_and_env() {
        let spec = CommandSpec::new("pytest", "/tmp/ws")
            .arg("--cov=pkg.mod")
            .args(["-q", "tests"])
            .env("PYTHONDONTWRITEBYTECODE", "1");

        assert_eq!(spec.args, vec!["--cov=pkg.mod", "-q", "tests"]);
        assert_eq!(
            spec.env,
            vec![(
                String::from("PYTHONDONTWRITEBYTECODE"),
                String::from("1")
            )]
        );
        assert_eq!(spec.display(), "pytest --cov=pkg.mod -q tests");
    }

    #[test]
    fn truncate_diagnostic_respects_char_boundaries() {
        assert_eq!(truncate_diagnostic("héllo wörld", 5), "héllo...");
        assert_eq!(truncate_diagnostic("", 500), "...");
    }

    #[test]
    fn std_runner_reports_missing_program() {
        let err = StdPipelineCommandRunner
            .run(&CommandSpec::new(
                "codelab-definitely-not-a-real-binary",
                std::env::temp_dir(),
            ))
            .expect_err("missing binary should fail");
        assert!(matches!(err, PipelineRuntimeError::ProgramNotFound(_)));
    }
}
