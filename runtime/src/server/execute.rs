//! `POST /execute`: request validation, the blocking pipeline, and mapping
//! outcomes onto HTTP responses.

use crate::audit::ExecutionAuditor;
use crate::cli::DEFAULT_MAX_BODY_BYTES;
use async_trait::async_trait;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use capsules_script_exec::config::DEFAULT_MAX_SCRIPT_CHARS;
use capsules_script_exec::error::INTERNAL_MESSAGE;
use capsules_script_exec::{ErrorKind, ExecError, SandboxConfig, SandboxResult, ScriptSubmission};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

pub const CONTENT_TYPE_MESSAGE: &str = "Content-Type must be application/json";
pub const INVALID_JSON_MESSAGE: &str = "Invalid JSON payload";
pub const BODY_TOO_LARGE_MESSAGE: &str = "Request body too large";
pub const MISSING_SCRIPT_MESSAGE: &str = "'script' field is required";
pub const SCRIPT_NOT_STRING_MESSAGE: &str = "'script' must be a string";

/// Runs a validated submission to completion.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    async fn execute(&self, submission: ScriptSubmission) -> Result<SandboxResult, ExecError>;
}

/// Executes submissions through the confined pipeline on the blocking pool.
#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    config: Arc<SandboxConfig>,
}

impl SandboxExecutor {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }
}

#[async_trait]
impl ScriptExecutor for SandboxExecutor {
    async fn execute(&self, submission: ScriptSubmission) -> Result<SandboxResult, ExecError> {
        let config = Arc::clone(&self.config);
        tokio::task::spawn_blocking(move || capsules_script_exec::execute(&config, &submission))
            .await
            .unwrap_or_else(|err| {
                Err(ExecError::internal(format!(
                    "execution task failed to complete: {}",
                    err
                )))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLimits {
    /// Longest accepted script, in characters.
    pub max_script_chars: usize,
    pub max_body_bytes: usize,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_script_chars: DEFAULT_MAX_SCRIPT_CHARS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

pub(crate) async fn execute_script(
    Extension(executor): Extension<Arc<dyn ScriptExecutor>>,
    Extension(limits): Extension<RequestLimits>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let started = Instant::now();

    let (script_bytes, outcome) = match parse_request(payload, limits.max_script_chars) {
        Ok(submission) => {
            let script_bytes = submission.len_bytes();
            (Some(script_bytes), executor.execute(submission).await)
        }
        Err(err) => (None, Err(err)),
    };

    ExecutionAuditor::emit_event(ExecutionAuditor::execution_finished(
        &outcome,
        started.elapsed(),
        script_bytes,
    ));

    translate(outcome)
}

/// Pull the script text out of a JSON body and check it against the limits.
/// Nothing is staged or spawned for a rejected request.
pub fn parse_request(
    payload: Result<Json<Value>, JsonRejection>,
    max_script_chars: usize,
) -> Result<ScriptSubmission, ExecError> {
    let Json(body) = payload.map_err(reject)?;

    let script = body
        .as_object()
        .and_then(|fields| fields.get("script"))
        .filter(|script| !script.is_null())
        .ok_or_else(|| ExecError::validation(MISSING_SCRIPT_MESSAGE))?;
    let text = script
        .as_str()
        .ok_or_else(|| ExecError::validation(SCRIPT_NOT_STRING_MESSAGE))?;

    ScriptSubmission::parse(text, max_script_chars)
}

fn reject(rejection: JsonRejection) -> ExecError {
    let message = match &rejection {
        JsonRejection::MissingJsonContentType(_) => CONTENT_TYPE_MESSAGE,
        _ if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => BODY_TOO_LARGE_MESSAGE,
        _ => INVALID_JSON_MESSAGE,
    };
    ExecError::validation(message).with_detail(rejection.body_text())
}

/// Map a pipeline outcome onto the HTTP response.
pub fn translate(outcome: Result<SandboxResult, ExecError>) -> Response {
    match outcome {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(err) => {
            let status = StatusCode::from_u16(err.kind().http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let message = match err.kind() {
                ErrorKind::InternalError => INTERNAL_MESSAGE,
                _ => err.message(),
            };
            (status, Json(json!({ "error": message }))).into_response()
        }
    }
}
