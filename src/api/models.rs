use std::convert::Infallible;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use crate::api::error::ErrorKind;
use crate::api::server::AppState;
use crate::model_runtime::{error_frame, token_frame};

use super::handler_utils::{error_response, internal_error, into_json, ApiObject};

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";
const CHAT_FRAME_BUFFER: usize = 64;

#[derive(Debug, Clone, Deserialize)]
pub struct ChatInput {
    pub model: String,
    pub prompt: String,
}

pub async fn list_models_handler(State(state): State<AppState>) -> ApiObject<Value> {
    let runtime = state.services.model_runtime.clone();
    let result = tokio::task::spawn_blocking(move || runtime.list_models()).await;

    match result {
        Ok(Ok(models)) => (StatusCode::OK, into_json(models)),
        Ok(Err(error)) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Provider,
            "model_runtime_unavailable",
            format!("Could not connect to Ollama: {error}"),
        ),
        Err(join_error) => internal_error(format!("model listing task failed: {join_error}")),
    }
}

/// Streams one NDJSON frame per upstream token. Upstream failures become a
/// final error frame; the HTTP status is already 200 by then.
pub async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatInput>,
) -> Response {
    let runtime = state.services.model_runtime.clone();
    let (tx, rx) = mpsc::channel::<Result<String, Infallible>>(CHAT_FRAME_BUFFER);

    tokio::task::spawn_blocking(move || {
        let mut relay = |token: String| tx.blocking_send(Ok(token_frame(token.as_str()))).is_ok();
        let outcome = runtime.stream_generate(
            payload.model.as_str(),
            payload.prompt.as_str(),
            &mut relay,
        );
        if let Err(error) = outcome {
            warn!(model = %payload.model, error = %error, "ollama generation failed");
            let _ = tx.blocking_send(Ok(error_frame(&error)));
        }
    });

    (
        [(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response()
}
