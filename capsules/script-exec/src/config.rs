use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_JAIL_BIN: &str = "nsjail";
pub const DEFAULT_POLICY_PATH: &str = "/app/nsjail.cfg";
pub const DEFAULT_RUNNER_BIN: &str = "/app/sandbox-runner";
pub const DEFAULT_SCRATCH_DIR: &str = "/tmp";
pub const DEFAULT_JAIL_ENV: &str = "LD_LIBRARY_PATH=/usr/local/lib";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_SCRIPT_CHARS: usize = 10_000;
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Timeout must be greater than zero")]
    ZeroTimeout,

    #[error("{field} must be greater than zero")]
    ZeroLimit { field: &'static str },

    #[error("{field} '{path}' must be an absolute path")]
    RelativePath { field: &'static str, path: String },

    #[error("Jail binary cannot be empty")]
    EmptyJailBin,

    #[error("Jail environment entry '{entry}' must look like KEY=VALUE")]
    InvalidJailEnv { entry: String },

    #[error("Failed to prepare scratch directory '{path}': {message}")]
    ScratchDir { path: String, message: String },

    #[error(
        "Running without the confinement wrapper was requested, but this build does not \
         include the 'unconfined' feature"
    )]
    UnconfinedUnavailable,
}

/// How the runner is launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confinement {
    /// Launch through the confinement wrapper with the policy file.
    Jailed,
    /// Launch the runner directly. Only compiled for development builds.
    #[cfg(feature = "unconfined")]
    Unconfined,
}

impl Confinement {
    /// Resolve the requested mode, refusing the bypass when it was not compiled in.
    pub fn from_bypass_flag(disable_jail: bool) -> Result<Self, ConfigError> {
        if !disable_jail {
            return Ok(Confinement::Jailed);
        }

        #[cfg(feature = "unconfined")]
        {
            Ok(Confinement::Unconfined)
        }
        #[cfg(not(feature = "unconfined"))]
        {
            Err(ConfigError::UnconfinedUnavailable)
        }
    }

    pub fn is_jailed(&self) -> bool {
        matches!(self, Confinement::Jailed)
    }
}

/// Settings for the execution pipeline. Built once at start-up and shared
/// read-only by every invocation.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub jail_bin: String,
    pub policy_path: PathBuf,
    /// Extra `KEY=VALUE` pairs forwarded into the jail.
    pub jail_env: Vec<String>,
    pub runner_bin: PathBuf,
    pub scratch_dir: PathBuf,
    pub timeout: Duration,
    pub max_script_chars: usize,
    pub max_output_bytes: usize,
    pub confinement: Confinement,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            jail_bin: DEFAULT_JAIL_BIN.to_string(),
            policy_path: PathBuf::from(DEFAULT_POLICY_PATH),
            jail_env: vec![DEFAULT_JAIL_ENV.to_string()],
            runner_bin: PathBuf::from(DEFAULT_RUNNER_BIN),
            scratch_dir: PathBuf::from(DEFAULT_SCRATCH_DIR),
            timeout: DEFAULT_TIMEOUT,
            max_script_chars: DEFAULT_MAX_SCRIPT_CHARS,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            confinement: Confinement::Jailed,
        }
    }
}

impl SandboxConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.max_script_chars == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "max_script_chars",
            });
        }
        if self.max_output_bytes == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "max_output_bytes",
            });
        }
        if self.jail_bin.trim().is_empty() {
            return Err(ConfigError::EmptyJailBin);
        }

        for entry in &self.jail_env {
            match entry.split_once('=') {
                Some((key, _)) if !key.trim().is_empty() => {}
                _ => {
                    return Err(ConfigError::InvalidJailEnv {
                        entry: entry.clone(),
                    })
                }
            }
        }

        let absolute = [
            ("Policy path", &self.policy_path),
            ("Runner binary", &self.runner_bin),
            ("Scratch directory", &self.scratch_dir),
        ];
        for (field, path) in absolute {
            if !path.is_absolute() {
                return Err(ConfigError::RelativePath {
                    field,
                    path: path.display().to_string(),
                });
            }
        }

        if !self.scratch_dir.is_dir() {
            fs::create_dir_all(&self.scratch_dir).map_err(|err| ConfigError::ScratchDir {
                path: self.scratch_dir.display().to_string(),
                message: err.to_string(),
            })?;
        }

        Ok(())
    }
}
