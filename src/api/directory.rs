use std::path::PathBuf;

use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use crate::api::error::ErrorKind;
use crate::selection::list_directory;

use super::handler_utils::{error_response, internal_error, into_json, ApiObject};

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryPathInput {
    pub path: String,
}

pub async fn list_directory_handler(Json(payload): Json<DirectoryPathInput>) -> ApiObject<Value> {
    let result =
        tokio::task::spawn_blocking(move || list_directory(PathBuf::from(payload.path).as_path()))
            .await;

    match result {
        Ok(Ok(tree)) => (StatusCode::OK, into_json(tree)),
        Ok(Err(error)) => error_response(
            StatusCode::NOT_FOUND,
            ErrorKind::Validation,
            "not_found",
            error.to_string(),
        ),
        Err(join_error) => internal_error(format!("directory listing task failed: {join_error}")),
    }
}
