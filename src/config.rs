use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use url::Url;

use crate::pipeline::coordinator::PipelineConfig;
use crate::pipeline::tool_adapters::{GeminiSettings, GenerationSettings};

pub const DEFAULT_SETTINGS_REL_PATH: &str = "config/codelab.settings.toml";
pub const DEFAULT_BIND: &str = "127.0.0.1:8000";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_FINETUNE_MODEL_NAME: &str = "custom-deepseek-coder";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to read settings '{path}': {message}")]
    ReadFile { path: String, message: String },
    #[error("failed to parse settings TOML '{path}': {message}")]
    ParseToml { path: String, message: String },
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPrograms {
    pub pynguin: String,
    pub pytest: String,
    pub mutmut: String,
    pub bandit: String,
    pub radon: String,
    pub ollama: String,
}

impl Default for ToolPrograms {
    fn default() -> Self {
        Self {
            pynguin: String::from("pynguin"),
            pytest: String::from("pytest"),
            mutmut: String::from("mutmut"),
            bandit: String::from("bandit"),
            radon: String::from("radon"),
            ollama: String::from("ollama"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinetuneSettings {
    pub base_model_id: String,
    pub ollama_base_model: String,
    pub adapter_output_dir: PathBuf,
    pub trainer_program: String,
    pub trainer_args: Vec<String>,
    pub default_model_name: String,
}

impl Default for FinetuneSettings {
    fn default() -> Self {
        Self {
            base_model_id: String::from("deepseek-ai/deepseek-coder-1.3b-base"),
            ollama_base_model: String::from("deepseek-coder:latest"),
            adapter_output_dir: PathBuf::from("finetuned_adapters"),
            trainer_program: String::from("python3"),
            trainer_args: vec![String::from("scripts/train_lora.py")],
            default_model_name: String::from(DEFAULT_FINETUNE_MODEL_NAME),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub app_root: PathBuf,
    pub bind: String,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_endpoint: String,
    pub gemini_timeout_secs: Option<u64>,
    pub ollama_base_url: String,
    pub workspace_parent: PathBuf,
    pub search_time_budget_secs: u64,
    pub tools: ToolPrograms,
    pub finetune: FinetuneSettings,
}

impl AppConfig {
    pub fn defaults(app_root: impl Into<PathBuf>) -> Self {
        Self {
            app_root: app_root.into(),
            bind: String::from(DEFAULT_BIND),
            gemini_api_key: None,
            gemini_model: String::from(DEFAULT_GEMINI_MODEL),
            gemini_endpoint: String::from(DEFAULT_GEMINI_ENDPOINT),
            gemini_timeout_secs: None,
            ollama_base_url: String::from(DEFAULT_OLLAMA_BASE_URL),
            workspace_parent: std::env::temp_dir(),
            search_time_budget_secs: 60,
            tools: ToolPrograms::default(),
            finetune: FinetuneSettings::default(),
        }
    }

    /// Defaults, then the settings file, then `.env`, then the process
    /// environment.
    pub fn load(app_root: &Path) -> Result<Self, ConfigError> {
        let process_env = std::env::vars().collect::<HashMap<_, _>>();
        Self::resolve(app_root, &process_env)
    }

    pub fn resolve(app_root: &Path, process_env: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Self::defaults(app_root);

        let settings_path = process_env
            .get("CODELAB_SETTINGS")
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(|v| resolve_under_root(app_root, v))
            .unwrap_or_else(|| app_root.join(DEFAULT_SETTINGS_REL_PATH));
        if let Some(file) = load_settings_file(settings_path.as_path())? {
            config.apply_file(file);
        }

        let dotenv = load_dotenv_map(app_root).map_err(|error| ConfigError::ReadFile {
            path: app_root.join(".env").display().to_string(),
            message: error.to_string(),
        })?;
        let lookup = |key: &str| -> Option<String> {
            process_env
                .get(key)
                .or_else(|| dotenv.get(key))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        config.apply_env(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, file: SettingsFile) {
        let SettingsFile {
            server,
            gemini,
            ollama,
            pipeline,
            tools,
            finetune,
        } = file;

        if let Some(bind) = server.bind {
            self.bind = bind;
        }
        if let Some(key) = gemini.api_key.filter(|v| !v.trim().is_empty()) {
            self.gemini_api_key = Some(key);
        }
        if let Some(model) = gemini.model {
            self.gemini_model = model;
        }
        if let Some(endpoint) = gemini.endpoint {
            self.gemini_endpoint = endpoint;
        }
        if gemini.timeout_secs.is_some() {
            self.gemini_timeout_secs = gemini.timeout_secs;
        }
        if let Some(base_url) = ollama.base_url {
            self.ollama_base_url = base_url;
        }
        if let Some(dir) = pipeline.workspace_dir {
            self.workspace_parent = resolve_under_root(self.app_root.as_path(), dir.as_str());
        }
        if let Some(secs) = pipeline.search_time_budget_secs {
            self.search_time_budget_secs = secs;
        }

        let programs = &mut self.tools;
        for (slot, value) in [
            (&mut programs.pynguin, tools.pynguin),
            (&mut programs.pytest, tools.pytest),
            (&mut programs.mutmut, tools.mutmut),
            (&mut programs.bandit, tools.bandit),
            (&mut programs.radon, tools.radon),
            (&mut programs.ollama, tools.ollama),
        ] {
            if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
                *slot = value;
            }
        }

        if let Some(v) = finetune.base_model_id {
            self.finetune.base_model_id = v;
        }
        if let Some(v) = finetune.ollama_base_model {
            self.finetune.ollama_base_model = v;
        }
        if let Some(v) = finetune.adapter_output_dir {
            self.finetune.adapter_output_dir = PathBuf::from(v);
        }
        if let Some(v) = finetune.trainer_program {
            self.finetune.trainer_program = v;
        }
        if let Some(v) = finetune.trainer_args {
            self.finetune.trainer_args = v;
        }
        if let Some(v) = finetune.default_model_name {
            self.finetune.default_model_name = v;
        }
    }

    fn apply_env(&mut self, lookup: &dyn Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = lookup("CODELAB_BIND") {
            self.bind = v;
        }
        if let Some(v) = lookup("GEMINI_API_KEY") {
            self.gemini_api_key = Some(v);
        }
        if let Some(v) = lookup("GEMINI_MODEL") {
            self.gemini_model = v;
        }
        if let Some(v) = lookup("GEMINI_ENDPOINT") {
            self.gemini_endpoint = v;
        }
        if let Some(v) = lookup("OLLAMA_BASE_URL") {
            self.ollama_base_url = v;
        }
        if let Some(v) = lookup("CODELAB_WORKSPACE_DIR") {
            self.workspace_parent = resolve_under_root(self.app_root.as_path(), v.as_str());
        }
        if let Some(v) = lookup("CODELAB_SEARCH_TIME_BUDGET_SECS") {
            self.search_time_budget_secs =
                v.parse::<u64>().map_err(|error| ConfigError::InvalidValue {
                    key: String::from("CODELAB_SEARCH_TIME_BUDGET_SECS"),
                    message: error.to_string(),
                })?;
        }
        if let Some(v) = lookup("CODELAB_ADAPTER_DIR") {
            self.finetune.adapter_output_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("CODELAB_FINETUNE_BASE_MODEL") {
            self.finetune.base_model_id = v;
        }
        if let Some(v) = lookup("CODELAB_OLLAMA_BASE_MODEL") {
            self.finetune.ollama_base_model = v;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.bind
            .parse::<SocketAddr>()
            .map_err(|error| ConfigError::InvalidValue {
                key: String::from("bind"),
                message: error.to_string(),
            })?;
        for (key, raw) in [
            ("ollama_base_url", self.ollama_base_url.as_str()),
            ("gemini_endpoint", self.gemini_endpoint.as_str()),
        ] {
            let parsed = Url::parse(raw).map_err(|error| ConfigError::InvalidValue {
                key: key.to_string(),
                message: error.to_string(),
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("unsupported scheme '{}'", parsed.scheme()),
                });
            }
        }
        if self.search_time_budget_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: String::from("search_time_budget_secs"),
                message: String::from("must be greater than zero"),
            });
        }
        if self.finetune.default_model_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: String::from("finetune.default_model_name"),
                message: String::from("must not be empty"),
            });
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind
            .parse::<SocketAddr>()
            .map_err(|error| ConfigError::InvalidValue {
                key: String::from("bind"),
                message: error.to_string(),
            })
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            workspace_parent: self.workspace_parent.clone(),
            search_time_budget_secs: self.search_time_budget_secs,
            pynguin_program: self.tools.pynguin.clone(),
            pytest_program: self.tools.pytest.clone(),
            mutmut_program: self.tools.mutmut.clone(),
        }
    }

    /// Settings for the hosted model, or `None` when no credential is set.
    pub fn gemini_settings(&self) -> Option<GeminiSettings> {
        let api_key = self.gemini_api_key.clone()?;
        Some(GeminiSettings {
            api_key,
            model: self.gemini_model.clone(),
            endpoint: self.gemini_endpoint.clone(),
            generation: GenerationSettings::default(),
            request_timeout: self.gemini_timeout_secs.map(Duration::from_secs),
        })
    }

    pub fn adapter_output_dir(&self) -> PathBuf {
        resolve_under_root(
            self.app_root.as_path(),
            self.finetune.adapter_output_dir.to_string_lossy().as_ref(),
        )
    }

    /// Printable view with the credential masked.
    pub fn redacted_json(&self) -> Value {
        json!({
            "app_root": self.app_root.display().to_string(),
            "bind": self.bind,
            "gemini_api_key": self.gemini_api_key.as_ref().map(|_| "***"),
            "gemini_model": self.gemini_model,
            "gemini_endpoint": self.gemini_endpoint,
            "ollama_base_url": self.ollama_base_url,
            "workspace_parent": self.workspace_parent.display().to_string(),
            "search_time_budget_secs": self.search_time_budget_secs,
            "tools": {
                "pynguin": self.tools.pynguin,
                "pytest": self.tools.pytest,
                "mutmut": self.tools.mutmut,
                "bandit": self.tools.bandit,
                "radon": self.tools.radon,
                "ollama": self.tools.ollama,
            },
            "finetune": {
                "base_model_id": self.finetune.base_model_id,
                "ollama_base_model": self.finetune.ollama_base_model,
                "adapter_output_dir": self.adapter_output_dir().display().to_string(),
                "trainer_program": self.finetune.trainer_program,
                "trainer_args": self.finetune.trainer_args,
                "default_model_name": self.finetune.default_model_name,
            }
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct SettingsFile {
    server: ServerSection,
    gemini: GeminiSection,
    ollama: OllamaSection,
    pipeline: PipelineSection,
    tools: ToolsSection,
    finetune: FinetuneSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ServerSection {
    bind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct GeminiSection {
    api_key: Option<String>,
    model: Option<String>,
    endpoint: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct OllamaSection {
    base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct PipelineSection {
    workspace_dir: Option<String>,
    search_time_budget_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ToolsSection {
    pynguin: Option<String>,
    pytest: Option<String>,
    mutmut: Option<String>,
    bandit: Option<String>,
    radon: Option<String>,
    ollama: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct FinetuneSection {
    base_model_id: Option<String>,
    ollama_base_model: Option<String>,
    adapter_output_dir: Option<String>,
    trainer_program: Option<String>,
    trainer_args: Option<Vec<String>>,
    default_model_name: Option<String>,
}

fn load_settings_file(path: &Path) -> Result<Option<SettingsFile>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|error| ConfigError::ReadFile {
        path: path.display().to_string(),
        message: error.to_string(),
    })?;
    toml::from_str::<SettingsFile>(raw.as_str())
        .map(Some)
        .map_err(|error| ConfigError::ParseToml {
            path: path.display().to_string(),
            message: error.to_string(),
        })
}

pub fn default_app_root() -> PathBuf {
    std::env::var("CODELAB_APP_ROOT")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")))
}

pub fn resolve_under_root(app_root: &Path, value: &str) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        path
    } else {
        app_root.join(path)
    }
}

pub fn load_dotenv_map(app_root: &Path) -> Result<HashMap<String, String>, std::io::Error> {
    let path = app_root.join(".env");
    if !path.is_file() {
        return Ok(HashMap::new());
    }
    let raw = fs::read_to_string(path)?;
    Ok(parse_dotenv_content(raw.as_str()))
}

pub fn parse_dotenv_content(raw: &str) -> HashMap<String, String> {
    raw.lines()
        .filter_map(parse_dotenv_line)
        .collect::<HashMap<_, _>>()
}

fn parse_dotenv_line(line: &str) -> Option<(String, String)> {
    let mut line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    if let Some(rest) = line.strip_prefix("export ") {
        line = rest.trim_start();
    }
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let value = value.trim();
    let quoted = value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')));
    let value = if quoted {
        &value[1..value.len() - 1]
    } else {
        value
            .split_once(" #")
            .map(|(before, _)| before.trim_end())
            .unwrap_or(value)
    };
    Some((key.to_string(), value.to_string()))
}
