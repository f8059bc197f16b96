//! Contract between the invoker and the sandbox runner.
//!
//! On success the runner exits 0 and writes exactly one JSON line,
//! `{"result": {...}, "stdout": "..."}`. On failure it exits non-zero and
//! writes a diagnostic to stderr whose last non-internal line is the
//! user-facing summary.

use crate::error::ExecError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the zero-argument function every script must define.
pub const ENTRY_POINT: &str = "main";

pub const GENERIC_FAILURE_MESSAGE: &str = "Script failed with non-zero exit code";
pub const UNPARSABLE_OUTPUT_MESSAGE: &str = "Failed to parse sandbox output as JSON";
pub const INCOMPLETE_OUTPUT_MESSAGE: &str = "Sandbox output missing 'result' or 'stdout'";

/// Marks the start of an exception raised by user code; nothing from here on
/// is evidence about the jail.
const TRACEBACK_HEADER: &str = "Traceback (most recent call last):";

static CONFINEMENT_FAILURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Operation not permitted|permission denied")
        .expect("confinement failure pattern is a valid regex")
});

/// Successful outcome of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxResult {
    pub result: Map<String, Value>,
    pub stdout: String,
}

impl SandboxResult {
    pub fn new(result: Map<String, Value>, stdout: impl Into<String>) -> Self {
        Self {
            result,
            stdout: stdout.into(),
        }
    }

    /// Single protocol line written by the runner.
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Parse the runner's stdout after a zero exit.
pub fn parse_envelope(stdout: &str) -> Result<SandboxResult, ExecError> {
    let value: Value = serde_json::from_str(stdout.trim()).map_err(|err| {
        ExecError::protocol(UNPARSABLE_OUTPUT_MESSAGE)
            .with_detail(format!("{}; raw stdout: {:?}", err, truncate(stdout, 512)))
    })?;

    let Value::Object(mut envelope) = value else {
        return Err(ExecError::protocol(INCOMPLETE_OUTPUT_MESSAGE)
            .with_detail("sandbox output is not a JSON object"));
    };

    let (Some(result), Some(stdout)) = (envelope.remove("result"), envelope.remove("stdout"))
    else {
        return Err(ExecError::protocol(INCOMPLETE_OUTPUT_MESSAGE));
    };

    let Value::Object(result) = result else {
        return Err(ExecError::protocol("Sandbox result is not a JSON object")
            .with_detail(format!("result was {}", json_type_name(&result))));
    };

    let Value::String(stdout) = stdout else {
        return Err(ExecError::protocol("Sandbox stdout is not a string")
            .with_detail(format!("stdout was {}", json_type_name(&stdout))));
    };

    Ok(SandboxResult { result, stdout })
}

/// Classify the stderr of a runner that exited non-zero.
pub fn classify_failure(stderr: &str) -> ExecError {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let confinement_failed = lines
        .iter()
        .take_while(|line| !line.starts_with(TRACEBACK_HEADER))
        .any(|line| CONFINEMENT_FAILURE.is_match(line));
    if confinement_failed {
        return ExecError::environment(truncate(stderr, 2048));
    }

    // Bracket-prefixed lines are the jail's own log output.
    let message = lines
        .iter()
        .rev()
        .find(|line| !line.starts_with('['))
        .or_else(|| lines.last())
        .map(|line| line.to_string())
        .unwrap_or_else(|| GENERIC_FAILURE_MESSAGE.to_string());

    ExecError::script(message)
}

pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub(crate) fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = text[..end].to_string();
    truncated.push_str("… (truncated)");
    truncated
}
