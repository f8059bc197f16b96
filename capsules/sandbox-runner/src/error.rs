use thiserror::Error;

/// Ways a runner invocation can fail. The `Display` text of each variant is
/// the summary line the invoker surfaces to the caller.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Usage: sandbox-runner <script_path>")]
    Usage,

    #[error("Script must define a function main()")]
    MissingEntryPoint,

    #[error("main must be callable")]
    EntryPointNotCallable,

    #[error("main() must not require arguments")]
    EntryPointNeedsArguments,

    #[error("{summary}")]
    ScriptRaised { traceback: String, summary: String },

    #[error("main() must return a JSON object, got None")]
    ReturnedNone,

    #[error("main() must return a JSON object (dict), got {type_name}")]
    NotAnObject { type_name: String },

    #[error("Return value of main() is not JSON-serializable: {detail}")]
    NotSerializable { detail: String },

    #[error("Internal error while executing script")]
    Internal { detail: String },
}

impl RunnerError {
    pub fn internal(detail: impl Into<String>) -> Self {
        RunnerError::Internal {
            detail: detail.into(),
        }
    }

    /// Lines written to stderr, in order. The last one is the summary.
    pub fn diagnostic_lines(&self) -> Vec<String> {
        match self {
            RunnerError::ScriptRaised { traceback, summary } => {
                let mut lines: Vec<String> = traceback.lines().map(str::to_string).collect();
                if lines.last().map(|l| l.trim()) != Some(summary.trim()) {
                    lines.push(summary.clone());
                }
                lines
            }
            RunnerError::Internal { detail } => vec![detail.clone(), self.to_string()],
            _ => vec![self.to_string()],
        }
    }
}
