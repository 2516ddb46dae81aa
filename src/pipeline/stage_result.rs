use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identity of the external tool behind a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageTool {
    Pynguin,
    Gemini,
    #[serde(rename = "pytest-cov")]
    PytestCov,
    #[serde(rename = "mutmut")]
    Mutmut,
}

impl StageTool {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pynguin => "Pynguin",
            Self::Gemini => "Gemini",
            Self::PytestCov => "pytest-cov",
            Self::Mutmut => "mutmut",
        }
    }
}

/// One failed item inside a stage: the module or file it concerned and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    pub item: String,
    pub error: String,
}

impl StageError {
    pub fn new(item: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            error: error.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedTest {
    pub filename: String,
    pub code: String,
}

/// Tool-specific payload of a stage, normalised per tool identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageDetails {
    NotRun,
    Disabled,
    SearchGeneration {
        modules_tested: usize,
        test_suites_generated: usize,
    },
    AiGeneration {
        files_processed: usize,
        test_suites_generated: usize,
        generated_tests: Vec<GeneratedTest>,
    },
    Coverage {
        summary: Value,
        files: Value,
    },
    Mutation {
        #[serde(skip_serializing_if = "Option::is_none")]
        score: Option<String>,
        raw_report: String,
    },
}

/// Uniform outcome record every stage hands to the coordinator.
///
/// `success` means the stage produced at least one unit of useful output, not
/// that the underlying process exited cleanly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub tool: StageTool,
    pub success: bool,
    pub message: String,
    pub details: StageDetails,
    #[serde(default)]
    pub errors: Vec<StageError>,
}

impl StageResult {
    pub fn not_run(tool: StageTool, stage_label: &str) -> Self {
        Self {
            tool,
            success: false,
            message: format!("{stage_label} step did not run."),
            details: StageDetails::NotRun,
            errors: Vec::new(),
        }
    }

    pub fn disabled(tool: StageTool, message: impl Into<String>) -> Self {
        Self {
            tool,
            success: false,
            message: message.into(),
            details: StageDetails::Disabled,
            errors: Vec::new(),
        }
    }

    pub fn failed(tool: StageTool, message: impl Into<String>, details: StageDetails) -> Self {
        Self {
            tool,
            success: false,
            message: message.into(),
            details,
            errors: Vec::new(),
        }
    }

    pub fn has_run(&self) -> bool {
        !matches!(self.details, StageDetails::NotRun)
    }

    pub fn coverage_percent_display(&self) -> Option<String> {
        let StageDetails::Coverage { summary, .. } = &self.details else {
            return None;
        };
        match summary.get("percent_covered_display")? {
            Value::String(value) => Some(value.clone()),
            Value::Number(value) => Some(value.to_string()),
            _ => None,
        }
    }

    pub fn mutation_score(&self) -> Option<String> {
        match &self.details {
            StageDetails::Mutation { score, .. } => score.clone(),
            _ => None,
        }
    }
}

/// Per-item fold state shared by the generation runners: items either add to
/// the produced count or contribute an error entry, and never stop the loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemTally {
    pub produced: usize,
    pub errors: Vec<StageError>,
}

impl ItemTally {
    pub fn record(mut self, outcome: Result<(), StageError>) -> Self {
        match outcome {
            Ok(()) => self.produced += 1,
            Err(error) => self.errors.push(error),
        }
        self
    }
}
