use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::pipeline::runtime::{CommandSpec, PipelineCommandRunner, PipelineRuntimeError};

const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_output_tokens: 8192,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeminiSettings {
    pub api_key: String,
    pub model: String,
    pub endpoint: String,
    pub generation: GenerationSettings,
    pub request_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<CandidateContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<ContentPart>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
}

impl GenerateContentResponse {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            candidates: vec![Candidate {
                content: Some(CandidateContent {
                    parts: vec![ContentPart {
                        text: Some(text.into()),
                    }],
                }),
                finish_reason: Some(String::from("STOP")),
            }],
            prompt_feedback: None,
        }
    }

    pub fn block_reason(&self) -> Option<&str> {
        self.prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.as_deref())
    }

    /// Concatenated text parts of the first candidate.
    pub fn text(&self) -> Result<String, ToolAdapterError> {
        let Some(candidate) = self.candidates.first() else {
            return Err(ToolAdapterError::Native(String::from(
                "response carried no candidates",
            )));
        };
        let parts = candidate
            .content
            .as_ref()
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|part| part.text.as_deref())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        if parts.is_empty() {
            return Err(ToolAdapterError::Native(format!(
                "response candidate carried no text (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            )));
        }
        Ok(parts.concat())
    }
}

/// Hosted generative model used to draft test modules.
pub trait TestGenerationModel: Send + Sync + 'static {
    fn generate_content(&self, prompt: &str) -> Result<GenerateContentResponse, ToolAdapterError>;
}

pub type SharedTestGenerationModel = Arc<dyn TestGenerationModel>;

#[derive(Debug, Clone)]
pub struct GeminiClient {
    settings: GeminiSettings,
}

impl GeminiClient {
    pub fn new(settings: GeminiSettings) -> Self {
        Self { settings }
    }

    pub fn request_body(&self, prompt: &str) -> Value {
        let safety_settings = SAFETY_CATEGORIES
            .iter()
            .map(|category| json!({"category": category, "threshold": "BLOCK_NONE"}))
            .collect::<Vec<_>>();
        json!({
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
            "generationConfig": {
                "temperature": self.settings.generation.temperature,
                "maxOutputTokens": self.settings.generation.max_output_tokens,
            },
            "safetySettings": safety_settings,
        })
    }

    fn endpoint_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.settings.endpoint.trim_end_matches('/'),
            self.settings.model
        )
    }
}

impl TestGenerationModel for GeminiClient {
    fn generate_content(&self, prompt: &str) -> Result<GenerateContentResponse, ToolAdapterError> {
        let mut builder = Client::builder();
        if let Some(timeout) = self.settings.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ToolAdapterError::Native(format!("http client init failed: {e}")))?;
        let resp = client
            .post(self.endpoint_url())
            .header("x-goog-api-key", self.settings.api_key.as_str())
            .json(&self.request_body(prompt))
            .send()
            .map_err(|e| ToolAdapterError::Native(format!("Gemini request failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(ToolAdapterError::Native(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }
        resp.json()
            .map_err(|e| ToolAdapterError::Native(format!("Gemini JSON decode failed: {e}")))
    }
}

#[derive(Debug, Error)]
pub enum ToolAdapterError {
    #[error("tool adapter command runner error: {0}")]
    CommandRunner(#[source] PipelineRuntimeError),
    #[error("tool adapter command failed ({program}) with exit code {status_code}: {stderr}")]
    CommandFailed {
        program: String,
        status_code: i32,
        stdout: String,
        stderr: String,
    },
    #[error("tool adapter JSON decode failed: {source}")]
    JsonDecode {
        #[source]
        source: serde_json::Error,
        stdout: String,
    },
    #[error("{0}")]
    Native(String),
}

/// Runs a tool that reports on stdout as JSON. `accepted_status` lists exit
/// codes that still carry a report (linters exit non-zero on findings).
pub fn run_json_command<T>(
    runner: &dyn PipelineCommandRunner,
    spec: CommandSpec,
    accepted_status: &[i32],
) -> Result<T, ToolAdapterError>
where
    T: DeserializeOwned,
{
    let output = runner
        .run(&spec)
        .map_err(ToolAdapterError::CommandRunner)?;
    if !accepted_status.contains(&output.status_code) {
        return Err(ToolAdapterError::CommandFailed {
            program: spec.program,
            status_code: output.status_code,
            stdout: output.stdout,
            stderr: output.stderr,
        });
    }

    serde_json::from_str(output.stdout.as_str()).map_err(|source| ToolAdapterError::JsonDecode {
        source,
        stdout: output.stdout,
    })
}
