use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::{info, warn};

use crate::pipeline::runtime::{CommandSpec, SharedCommandRunner};
use crate::pipeline::stage_result::{StageDetails, StageError, StageResult, StageTool};
use crate::pipeline::workspace::Workspace;

pub const COVERAGE_REPORT_FILE: &str = "coverage.json";
pub const MUTATION_CONFIG_FILE: &str = "setup.cfg";
pub const NO_MODULES_TO_COVER: &str = "No modules to cover.";

const MUTATION_CONFIG: &str = "[mutmut]\npaths_to_mutate=.\nrunner=pytest\ntests_dir=tests\n";

#[derive(Clone)]
pub struct CoverageRunner {
    runner: SharedCommandRunner,
    program: String,
}

impl CoverageRunner {
    pub fn new(runner: SharedCommandRunner, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }

    pub fn build_command(&self, workspace: &Workspace, modules: &[String]) -> CommandSpec {
        let report_path = workspace.root().join(COVERAGE_REPORT_FILE);
        CommandSpec::new(self.program.as_str(), workspace.root())
            .args(modules.iter().map(|module| format!("--cov={module}")))
            .arg(format!("--cov-report=json:{}", report_path.display()))
            .arg(workspace.tests_dir().display().to_string())
            .env("PYTHONPATH", workspace.root().display().to_string())
    }

    pub fn run(&self, workspace: &Workspace, modules: &[String]) -> StageResult {
        let modules = modules
            .iter()
            .filter(|module| !module.is_empty())
            .cloned()
            .collect::<Vec<_>>();
        if modules.is_empty() {
            warn!("coverage requested with an empty module scope");
            return StageResult::failed(
                StageTool::PytestCov,
                NO_MODULES_TO_COVER,
                empty_coverage(),
            );
        }

        info!(modules = modules.len(), "running coverage analysis");
        let spec = self.build_command(workspace, modules.as_slice());
        let diagnostic = match self.runner.run(&spec) {
            Ok(output) if output.stderr.trim().is_empty() => output.stdout,
            Ok(output) => output.stderr,
            Err(error) => error.to_string(),
        };

        let report_path = workspace.root().join(COVERAGE_REPORT_FILE);
        match read_coverage_report(report_path.as_path()) {
            Some(report) => StageResult {
                tool: StageTool::PytestCov,
                success: true,
                message: String::from("Coverage report collected."),
                details: StageDetails::Coverage {
                    summary: report.get("totals").cloned().unwrap_or_else(empty_object),
                    files: report.get("files").cloned().unwrap_or_else(empty_object),
                },
                errors: Vec::new(),
            },
            None => {
                warn!("coverage report missing or unreadable");
                let mut result = StageResult::failed(
                    StageTool::PytestCov,
                    "Coverage report was not produced.",
                    empty_coverage(),
                );
                result.errors.push(StageError::new(self.program.as_str(), diagnostic));
                result
            }
        }
    }
}

fn read_coverage_report(path: &Path) -> Option<Value> {
    let raw = fs::read_to_string(path).ok()?;
    serde_json::from_str::<Value>(raw.as_str())
        .map_err(|error| warn!(error = %error, "coverage report is not valid JSON"))
        .ok()
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

fn empty_coverage() -> StageDetails {
    StageDetails::Coverage {
        summary: empty_object(),
        files: empty_object(),
    }
}

#[derive(Clone)]
pub struct MutationRunner {
    runner: SharedCommandRunner,
    program: String,
}

impl MutationRunner {
    pub fn new(runner: SharedCommandRunner, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }

    pub fn run(&self, workspace: &Workspace) -> StageResult {
        info!("performing mutation testing");
        let config_path = workspace.root().join(MUTATION_CONFIG_FILE);
        if let Err(error) = fs::write(config_path.as_path(), MUTATION_CONFIG) {
            let mut result = StageResult::failed(
                StageTool::Mutmut,
                "Mutation testing could not be configured.",
                StageDetails::Mutation {
                    score: None,
                    raw_report: String::new(),
                },
            );
            result
                .errors
                .push(StageError::new(MUTATION_CONFIG_FILE, error.to_string()));
            return result;
        }

        let base = || {
            CommandSpec::new(self.program.as_str(), workspace.root())
                .env("PYTHONPATH", workspace.root().display().to_string())
        };
        // The run step's exit status reflects surviving mutants, not tool health.
        if let Err(error) = self
            .runner
            .run(&base().args(["run", "--paths-to-mutate", "."]))
        {
            warn!(error = %error, "mutation run could not be launched");
        }

        match self.runner.run(&base().arg("results")) {
            Ok(output) => {
                let score = parse_mutation_score(output.stdout.as_str());
                let mut errors = Vec::new();
                if score.is_none() {
                    let diagnostic = if output.stderr.trim().is_empty() {
                        format!("no mutation score in results output (exit {})", output.status_code)
                    } else {
                        output.stderr.trim().to_string()
                    };
                    errors.push(StageError::new(self.program.as_str(), diagnostic));
                }
                StageResult {
                    tool: StageTool::Mutmut,
                    // A clean exit without a score line produced nothing to report.
                    success: score.is_some(),
                    message: format!(
                        "Mutation score: {}",
                        score.as_deref().unwrap_or("N/A")
                    ),
                    details: StageDetails::Mutation {
                        score,
                        raw_report: output.stdout,
                    },
                    errors,
                }
            }
            Err(error) => {
                let mut result = StageResult::failed(
                    StageTool::Mutmut,
                    "Mutation results were not available.",
                    StageDetails::Mutation {
                        score: None,
                        raw_report: String::new(),
                    },
                );
                result
                    .errors
                    .push(StageError::new(self.program.as_str(), error.to_string()));
                result
            }
        }
    }
}

/// Reads the score from the last non-empty summary line. The line must carry
/// the `killed` marker; the score is whatever sits between the first `(` and
/// the next `)`.
pub fn parse_mutation_score(summary: &str) -> Option<String> {
    let last = summary.trim().lines().last()?;
    if !last.contains("killed") {
        return None;
    }
    let (_, after_paren) = last.split_once('(')?;
    let score = after_paren.split(')').next().unwrap_or_default();
    Some(score.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::runtime::{CommandOutput, PipelineCommandRunner, PipelineRuntimeError};
    use crate::pipeline::workspace::{with_workspace, TESTS_DIR};
    use serde_json::json;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    /// Records invocations and optionally writes a coverage report the way
    /// pytest-cov would.
    #[derive(Default)]
    struct RecordingRunner {
        seen: Mutex<Vec<CommandSpec>>,
        coverage_report: Option<Value>,
        results_stdout: String,
    }

    impl PipelineCommandRunner for RecordingRunner {
        fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, PipelineRuntimeError> {
            self.seen
                .lock()
                .expect("runner mutex poisoned")
                .push(spec.clone());
            if let Some(report) = self.coverage_report.as_ref() {
                if spec.program == "pytest" {
                    fs::write(
                        spec.cwd.join(COVERAGE_REPORT_FILE),
                        serde_json::to_string(report).expect("report json"),
                    )
                    .expect("write coverage report");
                }
            }
            let stdout = if spec.args.first().map(String::as_str) == Some("results") {
                self.results_stdout.clone()
            } else {
                String::new()
            };
            Ok(CommandOutput {
                status_code: 0,
                stdout,
                stderr: if spec.program == "pytest" {
                    String::from("E   ImportError: no tests ran")
                } else {
                    String::new()
                },
            })
        }
    }

    fn temp_parent() -> PathBuf {
        let root = std::env::temp_dir().join(format!("codelab_measure_{}", Uuid::new_v4()));
        fs::create_dir_all(root.as_path()).expect("temp parent should exist");
        root
    }

    #[test]
    fn empty_scope_fails_without_invoking_the_runner() {
        let parent = temp_parent();
        let runner = Arc::new(RecordingRunner::default());
        let coverage = CoverageRunner::new(runner.clone(), "pytest");

        let result = with_workspace(parent.as_path(), |ws| coverage.run(ws, &[]))
            .expect("workspace");

        assert!(!result.success);
        assert_eq!(result.message, NO_MODULES_TO_COVER);
        assert!(runner.seen.lock().expect("seen").is_empty());
        let _ = fs::remove_dir_all(parent);
    }

    #[test]
    fn coverage_report_sections_are_surfaced_verbatim() {
        let parent = temp_parent();
        let runner = Arc::new(RecordingRunner {
            coverage_report: Some(json!({
                "totals": {"percent_covered": 91.3, "percent_covered_display": "91"},
                "files": {"pkg/a.py": {"summary": {"covered_lines": 10}}}
            })),
            ..RecordingRunner::default()
        });
        let coverage = CoverageRunner::new(runner.clone(), "pytest");
        let modules = vec![String::from("pkg.a"), String::from("pkg.b")];

        let result = with_workspace(parent.as_path(), |ws| coverage.run(ws, modules.as_slice()))
            .expect("workspace");

        assert!(result.success);
        assert_eq!(result.coverage_percent_display().as_deref(), Some("91"));
        let StageDetails::Coverage { files, .. } = &result.details else {
            panic!("expected coverage details");
        };
        assert_eq!(files["pkg/a.py"]["summary"]["covered_lines"], json!(10));

        let seen = runner.seen.lock().expect("seen");
        assert_eq!(seen[0].args[0], "--cov=pkg.a");
        assert_eq!(seen[0].args[1], "--cov=pkg.b");
        assert!(seen[0].args[2].starts_with("--cov-report=json:"));
        assert!(seen[0].args[3].ends_with(TESTS_DIR));
        let _ = fs::remove_dir_all(parent);
    }

    #[test]
    fn missing_coverage_report_surfaces_diagnostics() {
        let parent = temp_parent();
        let runner = Arc::new(RecordingRunner::default());
        let coverage = CoverageRunner::new(runner, "pytest");
        let modules = vec![String::from("calc")];

        let result = with_workspace(parent.as_path(), |ws| coverage.run(ws, modules.as_slice()))
            .expect("workspace");

        assert!(!result.success);
        assert_eq!(result.errors[0].error, "E   ImportError: no tests ran");
        let _ = fs::remove_dir_all(parent);
    }

    #[test]
    fn mutation_runner_writes_config_and_parses_results() {
        let parent = temp_parent();
        let runner = Arc::new(RecordingRunner {
            results_stdout: String::from(
                "To apply a mutant on disk:\n    mutmut apply <id>\n\n🎉 12 🫥 0  ⏰ 0  🤔 0  🙁 3  🔇 0\n12/15 killed (80.0%)\n",
            ),
            ..RecordingRunner::default()
        });
        let mutation = MutationRunner::new(runner.clone(), "mutmut");

        let (result, config) = with_workspace(parent.as_path(), |ws| {
            let result = mutation.run(ws);
            let config = fs::read_to_string(ws.root().join(MUTATION_CONFIG_FILE))
                .expect("config should be written");
            (result, config)
        })
        .expect("workspace");

        assert!(result.success);
        assert_eq!(result.mutation_score().as_deref(), Some("80.0%"));
        assert!(config.contains("tests_dir=tests"));
        let seen = runner.seen.lock().expect("seen");
        assert_eq!(seen[0].args, vec!["run", "--paths-to-mutate", "."]);
        assert_eq!(seen[1].args, vec!["results"]);
        let _ = fs::remove_dir_all(parent);
    }

    #[test]
    fn clean_exit_without_summary_is_not_a_success() {
        let parent = temp_parent();
        let runner = Arc::new(RecordingRunner::default());
        let mutation = MutationRunner::new(runner.clone(), "mutmut");

        let result = with_workspace(parent.as_path(), |ws| mutation.run(ws)).expect("workspace");

        assert!(!result.success);
        assert_eq!(result.mutation_score(), None);
        assert_eq!(result.message, "Mutation score: N/A");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].item, "mutmut");
        assert!(result.errors[0].error.contains("no mutation score"));
        assert_eq!(runner.seen.lock().expect("seen").len(), 2);
        let _ = fs::remove_dir_all(parent);
    }

    #[test]
    fn mutation_score_requires_killed_marker_on_last_line() {
        assert_eq!(
            parse_mutation_score("Survived 🙁 (3)\n\n5 killed (62.5%)\n\n"),
            Some(String::from("62.5%"))
        );
        assert_eq!(parse_mutation_score("5 killed (62.5%)\nSurvived (3)"), None);
        assert_eq!(parse_mutation_score("killed without parens"), None);
        assert_eq!(parse_mutation_score(""), None);
    }

    #[test]
    fn mutation_score_parse_is_stable() {
        let summary = "3 killed (75%)";
        assert_eq!(parse_mutation_score(summary), parse_mutation_score(summary));
    }
}
