//! Confined execution pipeline for untrusted scripts.
//!
//! A submission is validated, staged to a uniquely named file, executed by
//! the sandbox runner inside the confinement wrapper under a hard timeout,
//! and the runner's output is checked against the boundary protocol. Every
//! failure is classified into an [`ErrorKind`].

pub mod config;
pub mod error;
pub mod invoker;
pub mod protocol;
pub mod stager;
pub mod submission;

pub use config::{ConfigError, Confinement, SandboxConfig};
pub use error::{ErrorKind, ExecError};
pub use invoker::{invoke, SandboxInvocation};
pub use protocol::{SandboxResult, ENTRY_POINT};
pub use stager::StagedScript;
pub use submission::ScriptSubmission;

use tracing::instrument;

/// Stage, run and clean up one submission.
///
/// The staged file is removed on every path, including timeouts and
/// protocol failures.
#[instrument(skip_all, fields(script_bytes = submission.len_bytes()))]
pub fn execute(
    config: &SandboxConfig,
    submission: &ScriptSubmission,
) -> Result<SandboxResult, ExecError> {
    let staged = StagedScript::write(&config.scratch_dir, submission.text())?;
    let outcome = invoke(config, staged.path());
    staged.release();
    outcome
}
