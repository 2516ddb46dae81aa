use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};

use crate::api::error::ErrorKind;
use crate::api::server::AppState;
use crate::finetune::jobs::FinetuneJob;
use crate::finetune::{FinetuneError, FinetuneRequest};

use super::handler_utils::{
    error_response, internal_error, into_json, map_selection_rejection, ApiObject,
    FileSelectionInput, SelectionRejection,
};

pub const FINETUNE_STARTED_MESSAGE: &str = "Finetuning process started.";

#[derive(Debug, Clone, Serialize)]
struct FinetuneAcceptedResponse {
    message: &'static str,
    files_for_training: usize,
    job_id: String,
}

#[derive(Debug, Clone, Serialize)]
struct FinetuneJobResponse {
    ok: bool,
    job: FinetuneJob,
}

#[derive(Debug)]
enum SubmitFailure {
    Rejected(SelectionRejection),
    Finetune(FinetuneError),
}

/// Accepts a fine-tuning job and returns before any training starts.
pub async fn start_finetune_handler(
    State(state): State<AppState>,
    Json(payload): Json<FileSelectionInput>,
) -> ApiObject<Value> {
    let service = state.services.finetune.clone();
    let default_model_name = state.services.default_model_name.clone();
    let result = tokio::task::spawn_blocking(move || {
        let files = payload.read_files().map_err(SubmitFailure::Rejected)?;
        let request = FinetuneRequest {
            contents: files.into_iter().map(|(_, content)| content).collect(),
            model_name: payload
                .ollama_model_name
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .unwrap_or(default_model_name),
        };
        let job = service.submit(&request).map_err(SubmitFailure::Finetune)?;
        Ok::<_, SubmitFailure>((job, request))
    })
    .await;

    let (job, request) = match result {
        Ok(Ok(accepted)) => accepted,
        Ok(Err(SubmitFailure::Rejected(rejection))) => return map_selection_rejection(rejection),
        Ok(Err(SubmitFailure::Finetune(FinetuneError::NoTrainingFiles))) => {
            return map_selection_rejection(SelectionRejection::NoReadableFiles)
        }
        Ok(Err(SubmitFailure::Finetune(error @ FinetuneError::InvalidModelName(_)))) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                ErrorKind::Validation,
                "validation_error",
                error.to_string(),
            )
        }
        Ok(Err(SubmitFailure::Finetune(error))) => {
            return internal_error(format!("finetune submit failed: {error}"))
        }
        Err(join_error) => return internal_error(format!("finetune submit task failed: {join_error}")),
    };

    let worker = state.services.finetune.clone();
    let job_id = job.job_id.clone();
    // Detached: the job record carries the outcome.
    tokio::task::spawn_blocking(move || {
        if let Err(failure) = worker.execute(job_id.as_str(), request) {
            error!(job_id = %job_id, error = %failure, "background finetune job ended with error");
        }
    });
    info!(job_id = %job.job_id, model = %job.model_name, "finetune job scheduled");

    (
        StatusCode::OK,
        into_json(FinetuneAcceptedResponse {
            message: FINETUNE_STARTED_MESSAGE,
            files_for_training: job.files_for_training,
            job_id: job.job_id,
        }),
    )
}

pub async fn get_finetune_job_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiObject<Value> {
    let service = state.services.finetune.clone();
    let result = tokio::task::spawn_blocking(move || service.job(job_id.as_str())).await;

    match result {
        Ok(Ok(Some(job))) => (StatusCode::OK, into_json(FinetuneJobResponse { ok: true, job })),
        Ok(Ok(None)) => error_response(
            StatusCode::NOT_FOUND,
            ErrorKind::Validation,
            "not_found",
            "Finetune job not found",
        ),
        Ok(Err(error)) => internal_error(format!("finetune job lookup failed: {error}")),
        Err(join_error) => internal_error(format!("finetune job lookup task failed: {join_error}")),
    }
}
