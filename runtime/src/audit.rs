use capsules_script_exec::{ErrorKind, ExecError, SandboxResult};
use metrics::{counter, histogram};
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, warn};

/// Structured audit event for one `/execute` request. Never carries script text.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionAuditEvent {
    pub execution_id: String,
    pub outcome: ExecutionOutcome,
    pub error: Option<String>,
    /// Operator-only context; logged, never returned to the caller.
    pub detail: Option<String>,
    pub metadata: ExecutionEventMetadata,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success,
    Failed(ErrorKind),
}

impl ExecutionOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionOutcome::Success => "success",
            ExecutionOutcome::Failed(kind) => kind.as_str(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionEventMetadata {
    pub timestamp: String,
    pub duration_ms: u64,
    /// Absent when the request was rejected before a script was extracted.
    pub script_bytes: Option<usize>,
}

/// Execution metrics recorder for Prometheus/monitoring
pub struct ExecutionMetrics;

impl ExecutionMetrics {
    pub fn increment_executions(outcome: ExecutionOutcome) {
        counter!("sandbox_executions_total", 1,
            "outcome" => outcome.as_str().to_string()
        );
    }

    pub fn record_duration(duration_ms: u64) {
        histogram!("sandbox_execution_duration_ms", duration_ms as f64);
    }
}

pub struct ExecutionAuditor;

impl ExecutionAuditor {
    /// Log the event and record its metrics.
    pub fn emit_event(event: ExecutionAuditEvent) {
        let outcome = event.outcome.as_str();
        let error = event.error.as_deref().unwrap_or("none");
        let detail = event.detail.as_deref().unwrap_or("none");
        let script_bytes = event.metadata.script_bytes;
        let duration_ms = event.metadata.duration_ms;

        match event.outcome {
            ExecutionOutcome::Success => {
                info!(
                    event = "execution.completed",
                    execution_id = %event.execution_id,
                    outcome,
                    duration_ms,
                    script_bytes,
                    "Script executed successfully"
                );
            }
            ExecutionOutcome::Failed(
                ErrorKind::ValidationError | ErrorKind::ScriptError,
            ) => {
                info!(
                    event = "execution.rejected",
                    execution_id = %event.execution_id,
                    outcome,
                    error,
                    duration_ms,
                    script_bytes,
                    "Script execution rejected"
                );
            }
            ExecutionOutcome::Failed(ErrorKind::TimeLimitExceeded) => {
                warn!(
                    event = "execution.timed_out",
                    execution_id = %event.execution_id,
                    outcome,
                    duration_ms,
                    script_bytes,
                    "Script exceeded its time limit"
                );
            }
            ExecutionOutcome::Failed(kind) => {
                error!(
                    event = "execution.failed",
                    execution_id = %event.execution_id,
                    outcome,
                    kind = %kind,
                    error,
                    detail,
                    duration_ms,
                    script_bytes,
                    "Script execution failed"
                );
            }
        }

        ExecutionMetrics::increment_executions(event.outcome);
        ExecutionMetrics::record_duration(duration_ms);
    }

    /// Create the event for a finished request
    pub fn execution_finished(
        outcome: &Result<SandboxResult, ExecError>,
        elapsed: Duration,
        script_bytes: Option<usize>,
    ) -> ExecutionAuditEvent {
        let (outcome, error, detail) = match outcome {
            Ok(_) => (ExecutionOutcome::Success, None, None),
            Err(err) => (
                ExecutionOutcome::Failed(err.kind()),
                Some(err.message().to_string()),
                err.detail().map(str::to_string),
            ),
        };

        ExecutionAuditEvent {
            execution_id: uuid::Uuid::new_v4().to_string(),
            outcome,
            error,
            detail,
            metadata: ExecutionEventMetadata {
                timestamp: chrono::Utc::now().to_rfc3339(),
                duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                script_bytes,
            },
        }
    }
}
