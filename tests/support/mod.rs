#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use codelab_backend::analysis::ToolchainCodeAnalyzer;
use codelab_backend::api::server::AppServices;
use codelab_backend::config::FinetuneSettings;
use codelab_backend::finetune::CommandFinetuneService;
use codelab_backend::model_runtime::{ModelRuntimeError, ModelRuntimeOps};
use codelab_backend::pipeline::coordinator::{PipelineConfig, TestingPipeline};
use codelab_backend::pipeline::measurement::COVERAGE_REPORT_FILE;
use codelab_backend::pipeline::runtime::{
    CommandOutput, CommandSpec, PipelineCommandRunner, PipelineRuntimeError,
};
use codelab_backend::pipeline::tool_adapters::{
    GenerateContentResponse, SharedTestGenerationModel, TestGenerationModel, ToolAdapterError,
};

/// Stands in for every external binary. Records each invocation.
pub struct ToolchainFake {
    pub pynguin_status: i32,
    pub trainer_status: i32,
    pub seen: Mutex<Vec<CommandSpec>>,
}

impl ToolchainFake {
    pub fn new() -> Self {
        Self {
            pynguin_status: 0,
            trainer_status: 0,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn programs(&self) -> Vec<String> {
        self.seen
            .lock()
            .expect("toolchain fake mutex poisoned")
            .iter()
            .map(|spec| spec.program.clone())
            .collect()
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.seen.lock().expect("toolchain fake mutex poisoned").clone()
    }
}

impl PipelineCommandRunner for ToolchainFake {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, PipelineRuntimeError> {
        self.seen
            .lock()
            .expect("toolchain fake mutex poisoned")
            .push(spec.clone());
        let first = spec.args.first().map(String::as_str);
        let (status_code, stdout) = match (spec.program.as_str(), first) {
            ("pynguin", _) => (self.pynguin_status, String::new()),
            ("pytest", _) => {
                fs::write(
                    spec.cwd.join(COVERAGE_REPORT_FILE),
                    json!({
                        "totals": {"percent_covered_display": "91", "covered_lines": 10},
                        "files": {"calc.py": {"summary": {"percent_covered": 91.0}}}
                    })
                    .to_string(),
                )
                .expect("coverage report should be writable");
                (0, String::new())
            }
            ("mutmut", Some("results")) => (0, String::from("9/10 killed (90.0%)\n")),
            ("bandit", _) => (
                1,
                json!({
                    "metrics": {"_totals": {"SEVERITY.HIGH": 1, "SEVERITY.MEDIUM": 0, "SEVERITY.LOW": 2}},
                    "results": [{"test_id": "B602", "issue_severity": "HIGH"}]
                })
                .to_string(),
            ),
            ("radon", Some("cc")) => {
                let report = spec.args[2..]
                    .iter()
                    .map(|file| {
                        (
                            file.clone(),
                            json!([{"type": "function", "name": "add", "complexity": 3}]),
                        )
                    })
                    .collect::<serde_json::Map<_, _>>();
                (0, Value::Object(report).to_string())
            }
            ("radon", Some("mi")) => {
                let report = spec.args[2..]
                    .iter()
                    .map(|file| (file.clone(), json!({"mi": 80.0})))
                    .collect::<serde_json::Map<_, _>>();
                (0, Value::Object(report).to_string())
            }
            ("python3", _) => (self.trainer_status, String::from("training done")),
            _ => (0, String::new()),
        };
        Ok(CommandOutput {
            status_code,
            stdout,
            stderr: String::from("tool stderr"),
        })
    }
}

pub struct ScriptedModel {
    pub reply: String,
}

impl TestGenerationModel for ScriptedModel {
    fn generate_content(&self, _prompt: &str) -> Result<GenerateContentResponse, ToolAdapterError> {
        Ok(GenerateContentResponse::text_only(self.reply.as_str()))
    }
}

#[derive(Default)]
pub struct ModelRuntimeFake {
    pub models: Option<Vec<Value>>,
    pub tokens: Vec<String>,
    pub fail_after_tokens: bool,
    pub prompts: Mutex<Vec<(String, String)>>,
}

impl ModelRuntimeOps for ModelRuntimeFake {
    fn list_models(&self) -> Result<Vec<Value>, ModelRuntimeError> {
        self.models
            .clone()
            .ok_or_else(|| ModelRuntimeError::Transport(String::from("connection refused")))
    }

    fn stream_generate(
        &self,
        model: &str,
        prompt: &str,
        on_token: &mut dyn FnMut(String) -> bool,
    ) -> Result<(), ModelRuntimeError> {
        self.prompts
            .lock()
            .expect("prompts mutex poisoned")
            .push((model.to_string(), prompt.to_string()));
        for token in &self.tokens {
            if !on_token(token.clone()) {
                return Ok(());
            }
        }
        if self.fail_after_tokens {
            return Err(ModelRuntimeError::Status {
                status: 404,
                body: String::from("model not found"),
            });
        }
        Ok(())
    }
}

pub struct Harness {
    pub root: PathBuf,
    pub toolchain: Arc<ToolchainFake>,
    pub model_runtime: Arc<ModelRuntimeFake>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(ToolchainFake::new(), ModelRuntimeFake::default())
    }

    pub fn with(toolchain: ToolchainFake, model_runtime: ModelRuntimeFake) -> Self {
        let root = std::env::temp_dir().join(format!("codelab_http_{}", Uuid::new_v4()));
        fs::create_dir_all(root.join("project/app/util")).expect("fixture dirs");
        fs::create_dir_all(root.join("scratch")).expect("scratch dir");
        fs::write(
            root.join("project/app/calc.py"),
            "def add(a, b):\n    return a + b\n",
        )
        .expect("calc.py");
        fs::write(
            root.join("project/app/util/text.py"),
            "def shout(s):\n    return s.upper()\n",
        )
        .expect("text.py");
        fs::write(root.join("project/README.md"), "# demo\n").expect("README");
        Self {
            root,
            toolchain: Arc::new(toolchain),
            model_runtime: Arc::new(model_runtime),
        }
    }

    pub fn project(&self) -> PathBuf {
        self.root.join("project")
    }

    pub fn scratch(&self) -> PathBuf {
        self.root.join("scratch")
    }

    pub fn path(&self, rel: &str) -> String {
        self.project().join(rel).display().to_string()
    }

    pub fn services(&self, model: Option<SharedTestGenerationModel>) -> AppServices {
        let pipeline_config = PipelineConfig {
            workspace_parent: self.scratch(),
            search_time_budget_secs: 5,
            ..PipelineConfig::default()
        };
        AppServices {
            testing_pipeline: Arc::new(TestingPipeline::new(
                pipeline_config,
                self.toolchain.clone(),
                model,
            )),
            code_analysis: Arc::new(ToolchainCodeAnalyzer::new(
                self.toolchain.clone(),
                self.scratch(),
            )),
            finetune: Arc::new(CommandFinetuneService::new(
                self.toolchain.clone(),
                self.root.clone(),
                self.root.join("adapters"),
                FinetuneSettings::default(),
                "ollama",
            )),
            model_runtime: self.model_runtime.clone(),
            default_model_name: String::from("custom-deepseek-coder"),
        }
    }

    pub fn scratch_entries(&self) -> usize {
        fs::read_dir(self.scratch()).expect("scratch readable").count()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(self.root.as_path());
    }
}

pub fn selection_body(base: &Path, items: &[String]) -> Body {
    Body::from(
        json!({
            "base_path": base.display().to_string(),
            "selected_items": items,
        })
        .to_string(),
    )
}

pub async fn send_raw(
    app: axum::Router,
    method: Method,
    uri: &str,
    body: Body,
) -> (StatusCode, Option<String>, Vec<u8>) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .expect("request should build");

    let response = app
        .oneshot(request)
        .await
        .expect("router should return response");
    let status = response.status();
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    (status, content_type, body.to_vec())
}

pub async fn send_json(
    app: axum::Router,
    method: Method,
    uri: &str,
    body: Body,
    expected_status: StatusCode,
) -> Value {
    let (status, _, body) = send_raw(app, method, uri, body).await;
    assert_eq!(
        status,
        expected_status,
        "unexpected status, body: {}",
        String::from_utf8_lossy(body.as_slice())
    );
    serde_json::from_slice(body.as_slice()).expect("response should be valid JSON")
}
