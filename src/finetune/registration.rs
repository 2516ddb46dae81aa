use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use uuid::Uuid;

use crate::finetune::FinetuneError;
use crate::pipeline::runtime::{CommandSpec, PipelineCommandRunner};

pub fn render_modelfile(base_model: &str, adapter_abs: &Path) -> String {
    format!("FROM {base_model}\nADAPTER {}\n", adapter_abs.display())
}

/// Scratch manifest file deleted when dropped.
struct TempModelfile {
    path: PathBuf,
}

impl TempModelfile {
    fn write(dir: &Path, content: &str) -> Result<Self, FinetuneError> {
        let path = dir.join(format!("codelab_{}.Modelfile", Uuid::new_v4().simple()));
        fs::write(path.as_path(), content).map_err(|source| FinetuneError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(Self { path })
    }
}

impl Drop for TempModelfile {
    fn drop(&mut self) {
        match fs::remove_file(self.path.as_path()) {
            Ok(()) => info!(path = %self.path.display(), "cleaned up temporary Modelfile"),
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => {
                warn!(path = %self.path.display(), error = %error, "failed to remove Modelfile")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRegistration<'a> {
    pub ollama_program: &'a str,
    pub base_model: &'a str,
    pub adapter_dir: &'a Path,
    pub model_name: &'a str,
    pub scratch_dir: &'a Path,
}

/// Registers the adapter as a new local model through `ollama create`.
pub fn register_adapter(
    runner: &dyn PipelineCommandRunner,
    registration: &ModelRegistration<'_>,
) -> Result<(), FinetuneError> {
    let adapter_abs = fs::canonicalize(registration.adapter_dir)
        .map_err(|_| FinetuneError::AdapterMissing(registration.adapter_dir.to_path_buf()))?;
    let manifest = render_modelfile(registration.base_model, adapter_abs.as_path());
    info!(
        model = registration.model_name,
        base_model = registration.base_model,
        adapter = %adapter_abs.display(),
        "registering fine-tuned adapter with ollama"
    );

    let modelfile = TempModelfile::write(registration.scratch_dir, manifest.as_str())?;
    let spec = CommandSpec::new(registration.ollama_program, registration.scratch_dir)
        .arg("create")
        .arg(registration.model_name)
        .arg("-f")
        .arg(modelfile.path.display().to_string());
    let output = runner.run(&spec).map_err(FinetuneError::Runner)?;
    drop(modelfile);

    for line in output
        .stdout
        .lines()
        .chain(output.stderr.lines())
        .map(str::trim)
        .filter(|line| !line.is_empty())
    {
        info!(model = registration.model_name, "ollama: {line}");
    }

    if !output.succeeded() {
        return Err(FinetuneError::Registration {
            status_code: output.status_code,
            output: output.stderr,
        });
    }
    info!(model = registration.model_name, "model registered with ollama");
    Ok(())
}
