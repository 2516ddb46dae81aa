use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::Value;
use tracing::info;

use crate::analysis::AnalysisError;
use crate::api::server::AppState;

use super::handler_utils::{
    internal_error, into_json, map_selection_rejection, ApiObject, FileSelectionInput,
    SelectionRejection,
};

pub async fn code_analysis_report_handler(
    State(state): State<AppState>,
    Json(payload): Json<FileSelectionInput>,
) -> ApiObject<Value> {
    let analyzer = state.services.code_analysis.clone();
    let result = tokio::task::spawn_blocking(move || {
        let files = payload.read_files()?;
        info!(files = files.len(), "code analysis requested");
        Ok::<_, SelectionRejection>(analyzer.analyze(files))
    })
    .await;

    match result {
        Ok(Ok(Ok(report))) => (StatusCode::OK, into_json(report)),
        Ok(Ok(Err(AnalysisError::NoPythonFiles))) => {
            map_selection_rejection(SelectionRejection::NoPythonFiles)
        }
        Ok(Ok(Err(error))) => internal_error(format!("code analysis failed: {error}")),
        Ok(Err(rejection)) => map_selection_rejection(rejection),
        Err(join_error) => internal_error(format!("code analysis task failed: {join_error}")),
    }
}
