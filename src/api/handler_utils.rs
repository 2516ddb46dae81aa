use std::path::PathBuf;

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::error;

use crate::api::error::ErrorKind;
use crate::selection::{read_selection, SelectionError};

pub type ApiObject<T> = (StatusCode, Json<T>);

#[derive(Debug, Clone, Serialize)]
struct ErrorResponse {
    ok: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<String>,
}

/// Body shared by every endpoint that works on a set of selected files.
#[derive(Debug, Clone, Deserialize)]
pub struct FileSelectionInput {
    pub base_path: String,
    pub selected_items: Vec<String>,
    #[serde(default)]
    pub ollama_model_name: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionRejection {
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error("No readable code files found.")]
    NoReadableFiles,
    #[error("No Python files found.")]
    NoPythonFiles,
}

impl FileSelectionInput {
    /// Reads the selection, rejecting an empty result.
    pub fn read_files(&self) -> Result<Vec<(PathBuf, String)>, SelectionRejection> {
        let files = read_selection(
            PathBuf::from(self.base_path.as_str()).as_path(),
            self.selected_items.as_slice(),
        )?;
        if files.is_empty() {
            return Err(SelectionRejection::NoReadableFiles);
        }
        Ok(files)
    }
}

pub fn error_response(
    status: StatusCode,
    kind: ErrorKind,
    code: impl Into<String>,
    message: impl Into<String>,
) -> ApiObject<Value> {
    (
        status,
        into_json(ErrorResponse {
            ok: false,
            error: message.into(),
            error_kind: Some(kind),
            error_code: Some(code.into()),
        }),
    )
}

pub fn map_selection_rejection(rejection: SelectionRejection) -> ApiObject<Value> {
    let status = match rejection {
        SelectionRejection::Selection(_) => StatusCode::NOT_FOUND,
        SelectionRejection::NoReadableFiles | SelectionRejection::NoPythonFiles => {
            StatusCode::BAD_REQUEST
        }
    };
    let code = if status == StatusCode::NOT_FOUND {
        "not_found"
    } else {
        "validation_error"
    };
    error_response(status, ErrorKind::Validation, code, rejection.to_string())
}

pub fn internal_error(message: impl Into<String>) -> ApiObject<Value> {
    let detail = message.into();
    error!(detail = %detail, "internal api error");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Infra,
        "internal_error",
        "Internal server error",
    )
}

pub fn into_json(payload: impl Serialize) -> Json<Value> {
    match serde_json::to_value(payload) {
        Ok(value) => Json(value),
        Err(serialize_error) => {
            error!(error = %serialize_error, "api payload failed to serialize");
            Json(json!({"ok": false, "error": "Internal server error"}))
        }
    }
}
