use std::any::Any;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::pipeline::generation::{AiTestGenerator, SearchTestGenerator};
use crate::pipeline::measurement::{CoverageRunner, MutationRunner};
use crate::pipeline::runtime::SharedCommandRunner;
use crate::pipeline::stage_result::{StageResult, StageTool};
use crate::pipeline::tool_adapters::SharedTestGenerationModel;
use crate::pipeline::workspace::{materialize, with_workspace, MaterializeError, SourceUnit, Workspace};
use crate::pipeline::PipelineStage;

pub const NOT_AVAILABLE: &str = "N/A";

/// Everything one pipeline instance needs; derived from the application
/// config and owned by the pipeline, never read from globals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub workspace_parent: PathBuf,
    pub search_time_budget_secs: u64,
    pub pynguin_program: String,
    pub pytest_program: String,
    pub mutmut_program: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workspace_parent: std::env::temp_dir(),
            search_time_budget_secs: 60,
            pynguin_program: String::from("pynguin"),
            pytest_program: String::from("pytest"),
            mutmut_program: String::from("mutmut"),
        }
    }
}

/// The hard stops of a pipeline run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineAbort {
    #[error("Setup failed: No valid Python modules found in selection.")]
    NoValidModules,
    #[error("All test generation methods failed, cannot proceed.")]
    AllGeneratorsFailed,
    #[error("Workspace error: {0}")]
    Workspace(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineAbort {
    pub fn category(&self) -> &'static str {
        match self {
            Self::NoValidModules => "PreconditionError",
            Self::AllGeneratorsFailed => "GenerationFailure",
            Self::Workspace(_) => "WorkspaceError",
            Self::Internal(_) => "InternalError",
        }
    }
}

impl From<MaterializeError> for PipelineAbort {
    fn from(value: MaterializeError) -> Self {
        match value {
            MaterializeError::NoValidModules => Self::NoValidModules,
            other => Self::Workspace(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverallStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub overall_status: OverallStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutation_score: Option<String>,
}

impl PipelineSummary {
    fn completed(coverage: &StageResult, mutation: &StageResult) -> Self {
        Self {
            overall_status: OverallStatus::Success,
            message: String::from("Testing pipeline completed."),
            error_kind: None,
            coverage: Some(
                coverage
                    .coverage_percent_display()
                    .unwrap_or_else(|| String::from(NOT_AVAILABLE)),
            ),
            mutation_score: Some(
                mutation
                    .mutation_score()
                    .unwrap_or_else(|| String::from(NOT_AVAILABLE)),
            ),
        }
    }

    fn aborted(abort: &PipelineAbort) -> Self {
        Self {
            overall_status: OverallStatus::Failure,
            message: abort.to_string(),
            error_kind: Some(abort.category().to_string()),
            coverage: None,
            mutation_score: None,
        }
    }
}

/// One StageResult per stage plus the top-level summary. Stages that never
/// ran keep their placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub summary: PipelineSummary,
    pub pynguin_test_generation: StageResult,
    pub gemini_test_generation: StageResult,
    pub coverage_analysis: StageResult,
    pub mutation_testing: StageResult,
}

impl PipelineReport {
    fn pending() -> Self {
        Self {
            summary: PipelineSummary {
                overall_status: OverallStatus::Failure,
                message: String::from("Testing pipeline did not complete."),
                error_kind: None,
                coverage: None,
                mutation_score: None,
            },
            pynguin_test_generation: StageResult::not_run(StageTool::Pynguin, "Pynguin"),
            gemini_test_generation: StageResult::not_run(StageTool::Gemini, "Gemini"),
            coverage_analysis: StageResult::not_run(StageTool::PytestCov, "Coverage"),
            mutation_testing: StageResult::not_run(StageTool::Mutmut, "Mutation"),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.summary.overall_status == OverallStatus::Success
    }
}

pub trait TestingPipelineOps: Send + Sync + 'static {
    /// Runs the full pipeline over `(original path, content)` pairs. Never
    /// fails: every abort is folded into a Failure report.
    fn run_pipeline(&self, files: Vec<(PathBuf, String)>) -> PipelineReport;
}

pub type SharedTestingPipeline = Arc<dyn TestingPipelineOps>;

#[derive(Clone)]
pub struct TestingPipeline {
    config: PipelineConfig,
    search: SearchTestGenerator,
    ai: AiTestGenerator,
    coverage: CoverageRunner,
    mutation: MutationRunner,
}

impl TestingPipeline {
    pub fn new(
        config: PipelineConfig,
        runner: SharedCommandRunner,
        model: Option<SharedTestGenerationModel>,
    ) -> Self {
        Self {
            search: SearchTestGenerator::new(
                runner.clone(),
                config.pynguin_program.as_str(),
                config.search_time_budget_secs,
            ),
            ai: AiTestGenerator::new(model),
            coverage: CoverageRunner::new(runner.clone(), config.pytest_program.as_str()),
            mutation: MutationRunner::new(runner, config.mutmut_program.as_str()),
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&self, files: Vec<(PathBuf, String)>) -> PipelineReport {
        info!(files = files.len(), "starting automated testing pipeline");
        let units = SourceUnit::from_selection(files);
        let mut report = PipelineReport::pending();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            with_workspace(self.config.workspace_parent.as_path(), |workspace| {
                self.run_stages(workspace, units.as_slice(), &mut report)
            })
        }));
        let outcome = match outcome {
            Ok(Ok(stages)) => stages,
            Ok(Err(io_error)) => Err(PipelineAbort::Workspace(io_error.to_string())),
            Err(payload) => Err(PipelineAbort::Internal(panic_message(payload))),
        };

        report.summary = match outcome {
            Ok(()) => {
                info!(stage = PipelineStage::Report.as_str(), "testing pipeline completed");
                PipelineSummary::completed(&report.coverage_analysis, &report.mutation_testing)
            }
            Err(abort) => {
                error!(
                    error_kind = abort.category(),
                    error = %abort,
                    "testing pipeline aborted"
                );
                PipelineSummary::aborted(&abort)
            }
        };

        if let Ok(rendered) = serde_json::to_string_pretty(&report) {
            debug!(report = %rendered, "consolidated testing report");
        }
        report
    }

    fn run_stages(
        &self,
        workspace: &Workspace,
        units: &[SourceUnit],
        report: &mut PipelineReport,
    ) -> Result<(), PipelineAbort> {
        enter(PipelineStage::Materialize);
        let materialized = materialize(workspace, units)?;
        fs::create_dir_all(workspace.tests_dir())
            .map_err(|e| PipelineAbort::Workspace(format!("failed to create tests dir: {e}")))?;
        let python_units = units
            .iter()
            .filter(|unit| unit.module_name().is_some())
            .cloned()
            .collect::<Vec<_>>();

        enter(PipelineStage::SearchGeneration);
        report.pynguin_test_generation = self
            .search
            .run(workspace, materialized.module_names.as_slice());
        finished(&report.pynguin_test_generation);

        enter(PipelineStage::AiGeneration);
        report.gemini_test_generation = self.ai.run(workspace, python_units.as_slice());
        finished(&report.gemini_test_generation);

        if !report.pynguin_test_generation.success && !report.gemini_test_generation.success {
            return Err(PipelineAbort::AllGeneratorsFailed);
        }

        enter(PipelineStage::Coverage);
        report.coverage_analysis = self
            .coverage
            .run(workspace, materialized.module_names.as_slice());
        finished(&report.coverage_analysis);

        enter(PipelineStage::Mutation);
        report.mutation_testing = self.mutation.run(workspace);
        finished(&report.mutation_testing);
        Ok(())
    }
}

impl TestingPipelineOps for TestingPipeline {
    fn run_pipeline(&self, files: Vec<(PathBuf, String)>) -> PipelineReport {
        self.run(files)
    }
}

fn enter(stage: PipelineStage) {
    info!(stage = stage.as_str(), "entering pipeline stage");
}

fn finished(result: &StageResult) {
    info!(
        tool = result.tool.as_str(),
        success = result.success,
        errors = result.errors.len(),
        "{}",
        result.message
    );
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    String::from("stage panicked")
}
