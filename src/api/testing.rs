use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::Value;
use tracing::info;

use crate::api::server::AppState;
use crate::selection::contains_python;

use super::handler_utils::{
    internal_error, into_json, map_selection_rejection, ApiObject, FileSelectionInput,
    SelectionRejection,
};

/// Runs the testing pipeline. Once the selection is accepted the response is
/// always 200; failures are carried inside the report.
pub async fn run_testing_pipeline_handler(
    State(state): State<AppState>,
    Json(payload): Json<FileSelectionInput>,
) -> ApiObject<Value> {
    let pipeline = state.services.testing_pipeline.clone();
    let result = tokio::task::spawn_blocking(move || {
        let files = match payload.read_files() {
            Err(SelectionRejection::NoReadableFiles) => Vec::new(),
            other => other?,
        };
        if !contains_python(files.as_slice()) {
            return Err(SelectionRejection::NoPythonFiles);
        }
        info!(files = files.len(), "testing pipeline requested");
        Ok(pipeline.run_pipeline(files))
    })
    .await;

    match result {
        Ok(Ok(report)) => (StatusCode::OK, into_json(report)),
        Ok(Err(rejection)) => map_selection_rejection(rejection),
        Err(join_error) => internal_error(format!("testing pipeline task failed: {join_error}")),
    }
}
