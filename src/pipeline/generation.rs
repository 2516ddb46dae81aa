use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::pipeline::runtime::{truncate_diagnostic, CommandSpec, SharedCommandRunner};
use crate::pipeline::stage_result::{
    GeneratedTest, ItemTally, StageDetails, StageError, StageResult, StageTool,
};
use crate::pipeline::tool_adapters::SharedTestGenerationModel;
use crate::pipeline::workspace::{SourceUnit, Workspace};

const STDERR_EXCERPT_CHARS: usize = 500;
pub const AI_TEST_FILE_PREFIX: &str = "test_gemini_";

/// Search-based generator: one bounded Pynguin run per module.
#[derive(Clone)]
pub struct SearchTestGenerator {
    runner: SharedCommandRunner,
    program: String,
    time_budget_secs: u64,
}

impl SearchTestGenerator {
    pub fn new(runner: SharedCommandRunner, program: impl Into<String>, time_budget_secs: u64) -> Self {
        Self {
            runner,
            program: program.into(),
            time_budget_secs,
        }
    }

    pub fn build_command(&self, workspace: &Workspace, module: &str) -> CommandSpec {
        CommandSpec::new(self.program.as_str(), workspace.root())
            .arg("--project-path")
            .arg(workspace.root().display().to_string())
            .arg("--output-path")
            .arg(workspace.tests_dir().display().to_string())
            .arg("--module-name")
            .arg(module)
            .arg("--maximum-search-time")
            .arg(self.time_budget_secs.to_string())
            .env("PYNGUIN_DANGER_AWARE", "1")
            .env("PYTHONPATH", workspace.root().display().to_string())
    }

    pub fn run(&self, workspace: &Workspace, modules: &[String]) -> StageResult {
        info!(modules = modules.len(), "generating unit tests with Pynguin");
        let tally = modules
            .iter()
            .map(|module| self.run_module(workspace, module))
            .fold(ItemTally::default(), ItemTally::record);

        StageResult {
            tool: StageTool::Pynguin,
            success: tally.produced > 0,
            message: format!(
                "Generated {} of {} module test suites.",
                tally.produced,
                modules.len()
            ),
            details: StageDetails::SearchGeneration {
                modules_tested: modules.len(),
                test_suites_generated: tally.produced,
            },
            errors: tally.errors,
        }
    }

    fn run_module(&self, workspace: &Workspace, module: &str) -> Result<(), StageError> {
        let spec = self.build_command(workspace, module);
        match self.runner.run(&spec) {
            Ok(output) if output.succeeded() => {
                info!(module, "pynguin produced a test suite");
                Ok(())
            }
            Ok(output) => {
                warn!(module, status_code = output.status_code, "pynguin failed for module");
                Err(StageError::new(
                    module,
                    truncate_diagnostic(output.stderr.as_str(), STDERR_EXCERPT_CHARS),
                ))
            }
            Err(error) => {
                warn!(module, error = %error, "pynguin could not be launched");
                Err(StageError::new(module, error.to_string()))
            }
        }
    }
}

/// Prompted generator: asks the hosted model for a pytest module per unit.
#[derive(Clone)]
pub struct AiTestGenerator {
    model: Option<SharedTestGenerationModel>,
}

impl AiTestGenerator {
    pub fn new(model: Option<SharedTestGenerationModel>) -> Self {
        Self { model }
    }

    pub fn run(&self, workspace: &Workspace, units: &[SourceUnit]) -> StageResult {
        let Some(model) = self.model.as_ref() else {
            return StageResult::disabled(StageTool::Gemini, "GEMINI_API_KEY not set. Skipping.");
        };
        info!(units = units.len(), "generating additional unit tests with Gemini");

        let tests_dir = workspace.tests_dir();
        let (tally, generated_tests) = units.iter().fold(
            (ItemTally::default(), Vec::new()),
            |(tally, mut generated), unit| {
                let outcome = generate_for_unit(model, tests_dir.as_path(), unit).map(|test| {
                    generated.push(test);
                });
                (tally.record(outcome), generated)
            },
        );

        StageResult {
            tool: StageTool::Gemini,
            success: tally.produced > 0,
            message: format!(
                "Generated {} of {} AI test suites.",
                tally.produced,
                units.len()
            ),
            details: StageDetails::AiGeneration {
                files_processed: units.len(),
                test_suites_generated: tally.produced,
                generated_tests,
            },
            errors: tally.errors,
        }
    }
}

fn generate_for_unit(
    model: &SharedTestGenerationModel,
    tests_dir: &Path,
    unit: &SourceUnit,
) -> Result<GeneratedTest, StageError> {
    let filename = unit.file_name();
    let fail = |error: String| {
        warn!(file = %filename, error = %error, "gemini test generation failed");
        StageError::new(filename.as_str(), error)
    };

    let prompt = build_test_prompt(unit);
    let response = model
        .generate_content(prompt.as_str())
        .map_err(|e| fail(e.to_string()))?;
    if response.candidates.is_empty() {
        let reason = response.block_reason().unwrap_or("Unknown");
        return Err(fail(format!(
            "Response was blocked by safety filters. Reason: {reason}"
        )));
    }
    let text = response.text().map_err(|e| fail(e.to_string()))?;
    let code = extract_test_code(text.as_str());
    if code.is_empty() {
        return Err(fail(String::from(
            "Gemini returned a valid but empty response.",
        )));
    }

    let test_path = tests_dir.join(ai_test_file_name(unit));
    fs::write(test_path.as_path(), code.as_str())
        .map_err(|e| fail(format!("failed to write {}: {e}", test_path.display())))?;
    info!(file = %filename, "gemini produced a test suite");
    Ok(GeneratedTest { filename, code })
}

/// Output file for a unit; derived from the module path so units sharing a
/// basename in different packages never collide.
pub fn ai_test_file_name(unit: &SourceUnit) -> String {
    let stem = unit
        .module_name()
        .map(|module| module.replace('.', "_"))
        .unwrap_or_else(|| unit.file_name().trim_end_matches(".py").to_string());
    format!("{AI_TEST_FILE_PREFIX}{stem}.py")
}

pub fn build_test_prompt(unit: &SourceUnit) -> String {
    let module = unit.module_name().unwrap_or_default();
    format!(
        "You are an expert Python developer who writes thorough pytest test suites.\n\
         Write unit tests for the module `{module}` (file `{file}`).\n\
         Import the code under test with `import {module}` or `from {module} import ...`.\n\
         Cover normal behaviour, edge cases, and error handling. Do not call the network \
         or touch files outside a temporary directory.\n\
         Respond with a single ```python fenced block that contains only the test module.\n\n\
         Python code to test:\n```python\n{code}\n```",
        file = unit.file_name(),
        code = unit.content(),
    )
}

/// Returns the body of the first fenced block, or the whole text when the
/// response has no complete fence. Whitespace is trimmed either way.
pub fn extract_test_code(text: &str) -> String {
    if let Some(start) = text.find("```") {
        let after_fence = &text[start + 3..];
        if let Some(newline) = after_fence.find('\n') {
            let body = &after_fence[newline + 1..];
            if let Some(end) = body.find("```") {
                return body[..end].trim().to_string();
            }
        }
    }
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::runtime::{
        CommandOutput, PipelineCommandRunner, PipelineRuntimeError,
    };
    use crate::pipeline::tool_adapters::{
        GenerateContentResponse, PromptFeedback, TestGenerationModel, ToolAdapterError,
    };
    use crate::pipeline::workspace::{materialize, with_workspace};
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    #[derive(Default)]
    struct FakeRunner {
        seen: Mutex<Vec<CommandSpec>>,
        failing_modules: Vec<String>,
    }

    impl PipelineCommandRunner for FakeRunner {
        fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, PipelineRuntimeError> {
            self.seen
                .lock()
                .expect("fake runner mutex poisoned")
                .push(spec.clone());
            let module = spec
                .args
                .iter()
                .skip_while(|arg| arg.as_str() != "--module-name")
                .nth(1)
                .cloned()
                .unwrap_or_default();
            if self.failing_modules.contains(&module) {
                return Ok(CommandOutput {
                    status_code: 1,
                    stdout: String::new(),
                    stderr: String::from("ModuleNotFoundError: broken"),
                });
            }
            Ok(CommandOutput {
                status_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }

    struct ScriptedModel {
        replies: Mutex<VecDeque<Result<GenerateContentResponse, ToolAdapterError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<GenerateContentResponse, ToolAdapterError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    impl TestGenerationModel for ScriptedModel {
        fn generate_content(
            &self,
            prompt: &str,
        ) -> Result<GenerateContentResponse, ToolAdapterError> {
            self.prompts
                .lock()
                .expect("scripted model mutex poisoned")
                .push(prompt.to_string());
            self.replies
                .lock()
                .expect("scripted model mutex poisoned")
                .pop_front()
                .unwrap_or_else(|| Ok(GenerateContentResponse::default()))
        }
    }

    fn temp_parent() -> PathBuf {
        let root = std::env::temp_dir().join(format!("codelab_generation_{}", Uuid::new_v4()));
        fs::create_dir_all(root.as_path()).expect("temp parent should exist");
        root
    }

    fn sample_units() -> Vec<SourceUnit> {
        SourceUnit::from_selection(vec![
            (
                PathBuf::from("/repo/pkg/alpha.py"),
                String::from("def one():\n    return 1\n"),
            ),
            (
                PathBuf::from("/repo/lib/beta.py"),
                String::from("def two():\n    return 2\n"),
            ),
        ])
    }

    #[test]
    fn extract_prefers_first_fenced_block() {
        let text = "Here you go:\n```python\nimport pkg\n\ndef test_a():\n    assert True\n```\nand\n```python\nother\n```";
        assert_eq!(
            extract_test_code(text),
            "import pkg\n\ndef test_a():\n    assert True"
        );
    }

    #[test]
    fn extract_falls_back_to_trimmed_raw_text() {
        assert_eq!(extract_test_code("  def test_x():\n    pass \n"), "def test_x():\n    pass");
        assert_eq!(extract_test_code("```python\nunterminated"), "```python\nunterminated");
    }

    #[test]
    fn search_generator_continues_past_failing_module() {
        let parent = temp_parent();
        let runner = Arc::new(FakeRunner {
            failing_modules: vec![String::from("pkg.alpha")],
            ..FakeRunner::default()
        });
        let generator = SearchTestGenerator::new(runner.clone(), "pynguin", 60);
        let units = sample_units();

        let result = with_workspace(parent.as_path(), |ws| {
            let materialized = materialize(ws, units.as_slice()).expect("materialize");
            generator.run(ws, materialized.module_names.as_slice())
        })
        .expect("workspace");

        assert!(result.success);
        assert_eq!(
            result.details,
            StageDetails::SearchGeneration {
                modules_tested: 2,
                test_suites_generated: 1
            }
        );
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].item, "pkg.alpha");
        assert!(result.errors[0].error.ends_with("..."));

        let seen = runner.seen.lock().expect("seen").clone();
        assert_eq!(seen.len(), 2);
        assert!(seen[0]
            .args
            .windows(2)
            .any(|pair| pair[0] == "--maximum-search-time" && pair[1] == "60"));
        assert!(seen[0]
            .env
            .contains(&(String::from("PYNGUIN_DANGER_AWARE"), String::from("1"))));
        let _ = fs::remove_dir_all(parent);
    }

    #[test]
    fn ai_generator_is_disabled_without_model() {
        let parent = temp_parent();
        let units = sample_units();
        let result = with_workspace(parent.as_path(), |ws| {
            AiTestGenerator::new(None).run(ws, units.as_slice())
        })
        .expect("workspace");

        assert!(!result.success);
        assert_eq!(result.details, StageDetails::Disabled);
        assert_eq!(result.message, "GEMINI_API_KEY not set. Skipping.");
        let _ = fs::remove_dir_all(parent);
    }

    #[test]
    fn blocked_response_is_recorded_and_other_units_still_succeed() {
        let parent = temp_parent();
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(GenerateContentResponse {
                candidates: Vec::new(),
                prompt_feedback: Some(PromptFeedback {
                    block_reason: Some(String::from("SAFETY")),
                }),
            }),
            Ok(GenerateContentResponse::text_only(
                "```python\nimport lib.beta\n\ndef test_two():\n    assert lib.beta.two() == 2\n```",
            )),
        ]));
        let generator = AiTestGenerator::new(Some(model.clone()));
        let units = sample_units();

        let (result, written) = with_workspace(parent.as_path(), |ws| {
            materialize(ws, units.as_slice()).expect("materialize");
            fs::create_dir_all(ws.tests_dir()).expect("tests dir");
            let result = generator.run(ws, units.as_slice());
            let written = fs::read_to_string(ws.tests_dir().join("test_gemini_lib_beta.py"))
                .expect("generated test should be on disk");
            (result, written)
        })
        .expect("workspace");

        assert!(result.success);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].item, "alpha.py");
        assert_eq!(
            result.errors[0].error,
            "Response was blocked by safety filters. Reason: SAFETY"
        );
        let StageDetails::AiGeneration {
            files_processed,
            test_suites_generated,
            generated_tests,
        } = result.details
        else {
            panic!("expected ai generation details");
        };
        assert_eq!(files_processed, 2);
        assert_eq!(test_suites_generated, 1);
        assert_eq!(generated_tests[0].filename, "beta.py");
        assert_eq!(generated_tests[0].code, written);

        let prompts = model.prompts.lock().expect("prompts");
        assert!(prompts[0].contains("def one():"));
        assert!(prompts[1].contains("`lib.beta`"));
        let _ = fs::remove_dir_all(parent);
    }

    #[test]
    fn empty_and_failed_responses_are_errors_not_skips() {
        let parent = temp_parent();
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(GenerateContentResponse::text_only("```python\n   \n```")),
            Err(ToolAdapterError::Native(String::from("HTTP 500: upstream"))),
        ]));
        let generator = AiTestGenerator::new(Some(model));
        let units = sample_units();

        let result = with_workspace(parent.as_path(), |ws| {
            fs::create_dir_all(ws.tests_dir()).expect("tests dir");
            generator.run(ws, units.as_slice())
        })
        .expect("workspace");

        assert!(!result.success);
        assert_eq!(result.errors.len(), 2);
        assert_eq!(
            result.errors[0].error,
            "Gemini returned a valid but empty response."
        );
        assert_eq!(result.errors[1].error, "HTTP 500: upstream");
        let _ = fs::remove_dir_all(parent);
    }

    #[test]
    fn ai_test_file_names_follow_module_path() {
        let units = sample_units();
        assert_eq!(ai_test_file_name(&units[0]), "test_gemini_pkg_alpha.py");
    }
}
