pub mod jobs;
pub mod registration;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{error, info};

use crate::config::FinetuneSettings;
use crate::finetune::jobs::{FinetuneJob, FinetuneJobRegistry};
use crate::finetune::registration::{register_adapter, ModelRegistration};
use crate::pipeline::runtime::{
    truncate_diagnostic, CommandSpec, PipelineRuntimeError, SharedCommandRunner,
};
use crate::worker::JobState;

pub const DATASET_FILE: &str = "dataset.jsonl";
const TRAINER_STDERR_CHARS: usize = 2000;

/// Fixed LoRA recipe handed to the trainer.
#[derive(Debug, Clone, PartialEq)]
pub struct LoraHyperParams {
    pub rank: u32,
    pub alpha: u32,
    pub dropout: f32,
    pub target_modules: [&'static str; 4],
    pub learning_rate: f32,
    pub epochs: u32,
    pub batch_size: u32,
    pub gradient_accumulation_steps: u32,
    pub max_seq_length: u32,
}

impl Default for LoraHyperParams {
    fn default() -> Self {
        Self {
            rank: 8,
            alpha: 32,
            dropout: 0.05,
            target_modules: ["q_proj", "k_proj", "v_proj", "o_proj"],
            learning_rate: 2e-4,
            epochs: 3,
            batch_size: 1,
            gradient_accumulation_steps: 4,
            max_seq_length: 1024,
        }
    }
}

impl LoraHyperParams {
    pub fn to_args(&self) -> Vec<String> {
        vec![
            String::from("--lora-r"),
            self.rank.to_string(),
            String::from("--lora-alpha"),
            self.alpha.to_string(),
            String::from("--lora-dropout"),
            self.dropout.to_string(),
            String::from("--target-modules"),
            self.target_modules.join(","),
            String::from("--learning-rate"),
            self.learning_rate.to_string(),
            String::from("--epochs"),
            self.epochs.to_string(),
            String::from("--batch-size"),
            self.batch_size.to_string(),
            String::from("--grad-accum"),
            self.gradient_accumulation_steps.to_string(),
            String::from("--max-seq-length"),
            self.max_seq_length.to_string(),
        ]
    }
}

#[derive(Debug, Error)]
pub enum FinetuneError {
    #[error("No readable code files found.")]
    NoTrainingFiles,
    #[error("invalid model name '{0}'")]
    InvalidModelName(String),
    #[error("finetune job not found: {0}")]
    UnknownJob(String),
    #[error("finetune job cannot move from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
    #[error("finetune job registry lock poisoned")]
    RegistryPoisoned,
    #[error("finetune filesystem error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("finetune command failed to start: {0}")]
    Runner(#[source] PipelineRuntimeError),
    #[error("trainer exited with code {status_code}: {stderr}")]
    Training { status_code: i32, stderr: String },
    #[error("Adapter directory not found at {}", .0.display())]
    AdapterMissing(PathBuf),
    #[error("'ollama create' failed with code {status_code}: {output}")]
    Registration { status_code: i32, output: String },
}

/// Raw training material for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinetuneRequest {
    pub contents: Vec<String>,
    pub model_name: String,
}

impl FinetuneRequest {
    /// JSON Lines dataset, one `{"text": ...}` record per file.
    pub fn dataset_jsonl(&self) -> String {
        self.contents
            .iter()
            .map(|text| format!("{}\n", json!({ "text": text })))
            .collect()
    }
}

pub trait FinetuneOps: Send + Sync + 'static {
    /// Records a queued job without doing any work.
    fn submit(&self, request: &FinetuneRequest) -> Result<FinetuneJob, FinetuneError>;
    /// Trains and registers; blocks until the job reaches a terminal state.
    fn execute(&self, job_id: &str, request: FinetuneRequest) -> Result<(), FinetuneError>;
    fn job(&self, job_id: &str) -> Result<Option<FinetuneJob>, FinetuneError>;
}

pub type SharedFinetune = Arc<dyn FinetuneOps>;

pub struct CommandFinetuneService {
    runner: SharedCommandRunner,
    app_root: PathBuf,
    adapter_root: PathBuf,
    settings: FinetuneSettings,
    ollama_program: String,
    hyper_params: LoraHyperParams,
    registry: FinetuneJobRegistry,
}

impl CommandFinetuneService {
    pub fn new(
        runner: SharedCommandRunner,
        app_root: impl Into<PathBuf>,
        adapter_root: impl Into<PathBuf>,
        settings: FinetuneSettings,
        ollama_program: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            app_root: app_root.into(),
            adapter_root: adapter_root.into(),
            settings,
            ollama_program: ollama_program.into(),
            hyper_params: LoraHyperParams::default(),
            registry: FinetuneJobRegistry::default(),
        }
    }

    pub fn adapter_dir(&self, model_name: &str) -> PathBuf {
        self.adapter_root.join(model_name)
    }

    pub fn trainer_command(&self, dataset: &Path, output_dir: &Path) -> CommandSpec {
        CommandSpec::new(self.settings.trainer_program.as_str(), self.app_root.as_path())
            .args(self.settings.trainer_args.iter().cloned())
            .arg("--base-model")
            .arg(self.settings.base_model_id.as_str())
            .arg("--dataset")
            .arg(dataset.display().to_string())
            .arg("--output-dir")
            .arg(output_dir.display().to_string())
            .args(self.hyper_params.to_args())
    }

    fn train(&self, request: &FinetuneRequest) -> Result<PathBuf, FinetuneError> {
        let output_dir = self.adapter_dir(request.model_name.as_str());
        fs::create_dir_all(output_dir.as_path()).map_err(|source| FinetuneError::Io {
            path: output_dir.clone(),
            source,
        })?;
        let dataset = output_dir.join(DATASET_FILE);
        fs::write(dataset.as_path(), request.dataset_jsonl()).map_err(|source| {
            FinetuneError::Io {
                path: dataset.clone(),
                source,
            }
        })?;
        info!(
            files = request.contents.len(),
            output_dir = %output_dir.display(),
            "starting adapter training"
        );

        let output = self
            .runner
            .run(&self.trainer_command(dataset.as_path(), output_dir.as_path()))
            .map_err(FinetuneError::Runner)?;
        if !output.succeeded() {
            return Err(FinetuneError::Training {
                status_code: output.status_code,
                stderr: truncate_diagnostic(output.stderr.as_str(), TRAINER_STDERR_CHARS),
            });
        }
        info!(output_dir = %output_dir.display(), "adapter training completed");
        Ok(output_dir)
    }

    fn run_stages(&self, job_id: &str, request: &FinetuneRequest) -> Result<(), FinetuneError> {
        self.registry.transition(job_id, JobState::Training, None)?;
        let adapter_dir = self.train(request)?;

        self.registry.transition(job_id, JobState::Registering, None)?;
        register_adapter(
            self.runner.as_ref(),
            &ModelRegistration {
                ollama_program: self.ollama_program.as_str(),
                base_model: self.settings.ollama_base_model.as_str(),
                adapter_dir: adapter_dir.as_path(),
                model_name: request.model_name.as_str(),
                scratch_dir: std::env::temp_dir().as_path(),
            },
        )?;

        self.registry.transition(job_id, JobState::Done, None)?;
        Ok(())
    }
}

impl FinetuneOps for CommandFinetuneService {
    fn submit(&self, request: &FinetuneRequest) -> Result<FinetuneJob, FinetuneError> {
        if request.contents.is_empty() {
            return Err(FinetuneError::NoTrainingFiles);
        }
        validate_model_name(request.model_name.as_str())?;
        let digest = Sha256::digest(request.dataset_jsonl().as_bytes());
        let job = FinetuneJob::queued(
            request.model_name.as_str(),
            request.contents.len(),
            format!("{digest:x}"),
        );
        self.registry.insert(job.clone())?;
        info!(
            job_id = %job.job_id,
            model = %job.model_name,
            retained_jobs = self.registry.job_count()?,
            "finetune job queued"
        );
        Ok(job)
    }

    fn execute(&self, job_id: &str, request: FinetuneRequest) -> Result<(), FinetuneError> {
        let outcome = self.run_stages(job_id, &request);
        if let Err(failure) = &outcome {
            error!(job_id, error = %failure, "finetune job failed");
            if let Err(mark_error) =
                self.registry
                    .transition(job_id, JobState::Failed, Some(failure.to_string()))
            {
                error!(job_id, error = %mark_error, "could not mark finetune job failed");
            }
        }
        outcome
    }

    fn job(&self, job_id: &str) -> Result<Option<FinetuneJob>, FinetuneError> {
        self.registry.get(job_id)
    }
}

/// Model names become a directory under the adapter root and an ollama tag.
pub fn validate_model_name(name: &str) -> Result<(), FinetuneError> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'));
    if valid {
        Ok(())
    } else {
        Err(FinetuneError::InvalidModelName(name.to_string()))
    }
}
