pub mod quality;
pub mod security;

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::info;

use crate::pipeline::runtime::SharedCommandRunner;
use crate::pipeline::workspace::{materialize, with_workspace, MaterializeError, SourceUnit};

pub const REPORT_TITLE: &str = "Code Analysis Report";
pub const DEPENDENCY_PLACEHOLDER_SCORE: i64 = 75;

const SECURITY_EXPLANATION: &str = "Scans for common security vulnerabilities like hardcoded passwords, SQL injection, and insecure library usage. Score is penalized based on the severity of issues found.";
const SECURITY_RECOMMENDATIONS: &str = "Review high and medium severity issues from the details below. Use a secret manager for credentials. Sanitize all user inputs.";
const QUALITY_EXPLANATION: &str = "Measures code maintainability and complexity. High Cyclomatic Complexity makes code hard to test and understand. A high Maintainability Index is desirable.";
const QUALITY_RECOMMENDATIONS: &str = "Refactor functions with high complexity (>10) into smaller, more focused units. Improve documentation and simplify control flow.";
const DEPENDENCY_EXPLANATION: &str = "Checks project dependencies for known vulnerabilities and outdated packages. Keeping dependencies up-to-date is crucial for security.";
const DEPENDENCY_RECOMMENDATIONS: &str = "Implement a tool like `pip-audit` or GitHub's Dependabot to automate dependency scanning. Regularly update packages to their latest stable versions.";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("No Python files found.")]
    NoPythonFiles,
    #[error("analysis workspace error: {0}")]
    Workspace(String),
}

/// Score, one-line summary and tool details for one scorecard row.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryScore {
    pub score: i64,
    pub summary: String,
    pub details: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisCategory {
    pub name: String,
    pub score: i64,
    pub grade: String,
    pub summary: String,
    pub explanation: String,
    pub recommendations: String,
    pub details: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub title: String,
    pub overall_score: i64,
    pub categories: Vec<AnalysisCategory>,
}

pub fn grade(score: i64) -> &'static str {
    match score {
        s if s >= 90 => "A (Excellent)",
        s if s >= 75 => "B (Good)",
        s if s >= 60 => "C (Fair)",
        s if s >= 40 => "D (Poor)",
        _ => "F (Critical)",
    }
}

pub fn dependency_placeholder() -> CategoryScore {
    CategoryScore {
        score: DEPENDENCY_PLACEHOLDER_SCORE,
        summary: String::from("Dependency analysis not yet implemented."),
        details: json!({}),
    }
}

pub fn build_report(
    security: CategoryScore,
    quality: CategoryScore,
    dependency: CategoryScore,
) -> AnalysisReport {
    let overall_score =
        ((security.score + quality.score + dependency.score) as f64 / 3.0).round() as i64;
    let categories = [
        ("Security Scan", security, SECURITY_EXPLANATION, SECURITY_RECOMMENDATIONS),
        ("Code Quality", quality, QUALITY_EXPLANATION, QUALITY_RECOMMENDATIONS),
        (
            "Dependency Analysis",
            dependency,
            DEPENDENCY_EXPLANATION,
            DEPENDENCY_RECOMMENDATIONS,
        ),
    ]
    .into_iter()
    .map(|(name, scored, explanation, recommendations)| AnalysisCategory {
        name: name.to_string(),
        score: scored.score,
        grade: grade(scored.score).to_string(),
        summary: scored.summary,
        explanation: explanation.to_string(),
        recommendations: recommendations.to_string(),
        details: scored.details,
    })
    .collect();

    AnalysisReport {
        title: String::from(REPORT_TITLE),
        overall_score,
        categories,
    }
}

pub trait CodeAnalysisOps: Send + Sync + 'static {
    fn analyze(&self, files: Vec<(PathBuf, String)>) -> Result<AnalysisReport, AnalysisError>;
}

pub type SharedCodeAnalysis = Arc<dyn CodeAnalysisOps>;

#[derive(Clone)]
pub struct ToolchainCodeAnalyzer {
    runner: SharedCommandRunner,
    workspace_parent: PathBuf,
    bandit_program: String,
    radon_program: String,
}

impl ToolchainCodeAnalyzer {
    pub fn new(runner: SharedCommandRunner, workspace_parent: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            workspace_parent: workspace_parent.into(),
            bandit_program: String::from("bandit"),
            radon_program: String::from("radon"),
        }
    }

    pub fn with_programs(mut self, bandit: impl Into<String>, radon: impl Into<String>) -> Self {
        self.bandit_program = bandit.into();
        self.radon_program = radon.into();
        self
    }
}

impl CodeAnalysisOps for ToolchainCodeAnalyzer {
    fn analyze(&self, files: Vec<(PathBuf, String)>) -> Result<AnalysisReport, AnalysisError> {
        let units = SourceUnit::from_selection(files);
        info!(files = units.len(), "starting code analysis");

        let report = with_workspace(
            self.workspace_parent.as_path(),
            |workspace| -> Result<AnalysisReport, AnalysisError> {
                let materialized = materialize(workspace, units.as_slice()).map_err(|e| match e {
                    MaterializeError::NoValidModules => AnalysisError::NoPythonFiles,
                    other => AnalysisError::Workspace(other.to_string()),
                })?;
                let security = security::run_security_scan(
                    self.runner.as_ref(),
                    self.bandit_program.as_str(),
                    workspace.root(),
                );
                let quality = quality::run_quality_check(
                    self.runner.as_ref(),
                    self.radon_program.as_str(),
                    workspace.root(),
                    materialized.source_paths.as_slice(),
                );
                Ok(build_report(security, quality, dependency_placeholder()))
            },
        )
        .map_err(|e| AnalysisError::Workspace(e.to_string()))??;

        info!(overall_score = report.overall_score, "code analysis finished");
        Ok(report)
    }
}
