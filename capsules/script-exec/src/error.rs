use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Failure classes an invocation can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    ValidationError,
    ScriptError,
    TimeLimitExceeded,
    SandboxEnvironmentError,
    ProtocolError,
    InternalError,
}

impl ErrorKind {
    /// HTTP status the kind maps to at the API surface.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::InternalError => 500,
            _ => 400,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::ScriptError => "script_error",
            ErrorKind::TimeLimitExceeded => "time_limit_exceeded",
            ErrorKind::SandboxEnvironmentError => "sandbox_environment_error",
            ErrorKind::ProtocolError => "protocol_error",
            ErrorKind::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const SANDBOX_ENVIRONMENT_MESSAGE: &str =
    "Sandbox could not start due to environment restrictions.";
pub const TIME_LIMIT_MESSAGE: &str = "Script exceeded time limit";
pub const INTERNAL_MESSAGE: &str = "Internal server error";

/// Classified failure of a single execution.
///
/// `message` is what the caller may see. `detail` carries whatever the
/// operator needs (paths, OS errors, raw stderr) and is only ever logged.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct ExecError {
    kind: ErrorKind,
    message: String,
    detail: Option<String>,
}

impl ExecError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, message)
    }

    pub fn script(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ScriptError, message)
    }

    pub fn time_limit() -> Self {
        Self::new(ErrorKind::TimeLimitExceeded, TIME_LIMIT_MESSAGE)
    }

    pub fn environment(detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::SandboxEnvironmentError,
            SANDBOX_ENVIRONMENT_MESSAGE,
        )
        .with_detail(detail)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolError, message)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, INTERNAL_MESSAGE).with_detail(detail)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Caller-safe message.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn code(&self) -> &'static str {
        match self.kind {
            ErrorKind::ValidationError => "SCRIPT_EXEC_VALIDATION",
            ErrorKind::ScriptError => "SCRIPT_EXEC_SCRIPT_ERROR",
            ErrorKind::TimeLimitExceeded => "SCRIPT_EXEC_TIMEOUT",
            ErrorKind::SandboxEnvironmentError => "SCRIPT_EXEC_SANDBOX_ENV",
            ErrorKind::ProtocolError => "SCRIPT_EXEC_PROTOCOL",
            ErrorKind::InternalError => "SCRIPT_EXEC_INTERNAL",
        }
    }
}
