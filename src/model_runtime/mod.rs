use std::io::{BufRead, BufReader};
use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

const LIST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ModelRuntimeError {
    #[error("{0}")]
    Transport(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response line: {0}")]
    Decode(String),
}

/// Local model server that lists installed models and streams completions.
pub trait ModelRuntimeOps: Send + Sync + 'static {
    fn list_models(&self) -> Result<Vec<Value>, ModelRuntimeError>;

    /// Calls `on_token` once per upstream chunk; returning `false` stops the
    /// stream early.
    fn stream_generate(
        &self,
        model: &str,
        prompt: &str,
        on_token: &mut dyn FnMut(String) -> bool,
    ) -> Result<(), ModelRuntimeError>;
}

pub type SharedModelRuntime = Arc<dyn ModelRuntimeOps>;

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Default, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
}

impl ModelRuntimeOps for OllamaClient {
    fn list_models(&self) -> Result<Vec<Value>, ModelRuntimeError> {
        let client = Client::builder()
            .timeout(LIST_TIMEOUT)
            .build()
            .map_err(|e| ModelRuntimeError::Transport(format!("http client init failed: {e}")))?;
        let resp = client
            .get(self.url("/api/tags"))
            .send()
            .map_err(|e| ModelRuntimeError::Transport(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ModelRuntimeError::Status {
                status: status.as_u16(),
                body: resp.text().unwrap_or_default(),
            });
        }
        let tags: TagsResponse = resp
            .json()
            .map_err(|e| ModelRuntimeError::Decode(e.to_string()))?;
        debug!(count = tags.models.len(), "listed ollama models");
        Ok(tags.models)
    }

    fn stream_generate(
        &self,
        model: &str,
        prompt: &str,
        on_token: &mut dyn FnMut(String) -> bool,
    ) -> Result<(), ModelRuntimeError> {
        // Generation can run for minutes; no overall timeout.
        let client = Client::builder()
            .timeout(None)
            .build()
            .map_err(|e| ModelRuntimeError::Transport(format!("http client init failed: {e}")))?;
        info!(model, prompt_chars = prompt.chars().count(), "streaming ollama generation");
        let resp = client
            .post(self.url("/api/generate"))
            .json(&json!({"model": model, "prompt": prompt, "stream": true}))
            .send()
            .map_err(|e| ModelRuntimeError::Transport(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ModelRuntimeError::Status {
                status: status.as_u16(),
                body: resp.text().unwrap_or_default(),
            });
        }
        relay_ndjson(BufReader::new(resp), on_token)
    }
}

/// Decodes newline-delimited generate chunks, skipping blank lines.
pub fn relay_ndjson<R: BufRead>(
    reader: R,
    on_token: &mut dyn FnMut(String) -> bool,
) -> Result<(), ModelRuntimeError> {
    for line in reader.lines() {
        let line = line.map_err(|e| ModelRuntimeError::Transport(e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let chunk: GenerateChunk = serde_json::from_str(line.as_str())
            .map_err(|e| ModelRuntimeError::Decode(e.to_string()))?;
        if !on_token(chunk.response) {
            debug!("stream consumer went away");
            break;
        }
    }
    Ok(())
}

pub fn token_frame(token: &str) -> String {
    format!("{}\n", json!({ "token": token }))
}

pub fn error_frame(error: &ModelRuntimeError) -> String {
    format!("{}\n", json!({ "error": format!("Ollama API error: {error}") }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn relays_each_non_empty_line() {
        let body = "{\"response\":\"def\"}\n\n{\"response\":\" f\"}\n{\"done\":true}\n";
        let mut tokens = Vec::new();
        relay_ndjson(Cursor::new(body), &mut |token| {
            tokens.push(token);
            true
        })
        .expect("relay");
        assert_eq!(tokens, vec!["def", " f", ""]);
    }

    #[test]
    fn stops_when_consumer_declines() {
        let body = "{\"response\":\"a\"}\n{\"response\":\"b\"}\n";
        let mut seen = 0;
        relay_ndjson(Cursor::new(body), &mut |_| {
            seen += 1;
            false
        })
        .expect("relay");
        assert_eq!(seen, 1);
    }

    #[test]
    fn malformed_line_is_a_decode_error() {
        let err = relay_ndjson(Cursor::new("{\"response\":\"a\"}\nnot json\n"), &mut |_| true)
            .expect_err("bad line");
        assert!(matches!(err, ModelRuntimeError::Decode(_)));
    }

    #[test]
    fn frames_are_newline_terminated_json() {
        assert_eq!(token_frame("x\"y"), "{\"token\":\"x\\\"y\"}\n");
        let frame = error_frame(&ModelRuntimeError::Status {
            status: 404,
            body: String::from("model not found"),
        });
        assert_eq!(
            frame,
            "{\"error\":\"Ollama API error: HTTP 404: model not found\"}\n"
        );
    }

    #[test]
    fn unreachable_server_is_a_transport_error() {
        let client = OllamaClient::new("http://127.0.0.1:9/");
        assert!(matches!(
            client.list_models(),
            Err(ModelRuntimeError::Transport(_))
        ));
    }
}
