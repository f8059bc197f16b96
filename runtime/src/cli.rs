//! Start-up configuration, read from flags with environment fallbacks.

use crate::server::RequestLimits;
use capsules_script_exec::config::{
    DEFAULT_JAIL_BIN, DEFAULT_JAIL_ENV, DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_MAX_SCRIPT_CHARS,
    DEFAULT_POLICY_PATH, DEFAULT_RUNNER_BIN, DEFAULT_SCRATCH_DIR,
};
use capsules_script_exec::{ConfigError, Confinement, SandboxConfig};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Parser, Debug, Clone)]
#[command(name = "runtime", version, about = "Run untrusted scripts inside a confined sandbox")]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Confinement wrapper binary
    #[arg(long, env = "SANDBOX_JAIL_BIN", default_value = DEFAULT_JAIL_BIN)]
    pub jail_bin: String,

    /// Confinement policy file
    #[arg(long = "policy", env = "SANDBOX_POLICY_PATH", default_value = DEFAULT_POLICY_PATH)]
    pub policy_path: PathBuf,

    /// Extra KEY=VALUE pairs passed into the jail, comma separated
    #[arg(
        long,
        env = "SANDBOX_JAIL_ENV",
        value_delimiter = ',',
        default_value = DEFAULT_JAIL_ENV
    )]
    pub jail_env: Vec<String>,

    /// Sandbox runner binary, as seen from inside the jail
    #[arg(long = "runner", env = "SANDBOX_RUNNER_BIN", default_value = DEFAULT_RUNNER_BIN)]
    pub runner_bin: PathBuf,

    /// Directory for staged scripts
    #[arg(long, env = "SANDBOX_SCRATCH_DIR", default_value = DEFAULT_SCRATCH_DIR)]
    pub scratch_dir: PathBuf,

    /// Wall-clock limit per execution (e.g. "10s", "1500ms")
    #[arg(
        long,
        env = "SANDBOX_TIMEOUT",
        default_value = "10s",
        value_parser = humantime::parse_duration
    )]
    pub timeout: Duration,

    #[arg(long, env = "SANDBOX_MAX_SCRIPT_CHARS", default_value_t = DEFAULT_MAX_SCRIPT_CHARS)]
    pub max_script_chars: usize,

    #[arg(long, env = "SANDBOX_MAX_OUTPUT_BYTES", default_value_t = DEFAULT_MAX_OUTPUT_BYTES)]
    pub max_output_bytes: usize,

    #[arg(long, env = "SANDBOX_MAX_BODY_BYTES", default_value_t = DEFAULT_MAX_BODY_BYTES)]
    pub max_body_bytes: usize,

    /// Run the runner without the confinement wrapper (development builds only)
    #[arg(
        long = "disable-jail",
        env = "DISABLE_NSJAIL",
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub disable_jail: bool,
}

impl ServeArgs {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    /// Build and validate the pipeline settings. Creates the scratch
    /// directory when it is missing.
    pub fn sandbox_config(&self) -> Result<SandboxConfig, ConfigError> {
        let config = SandboxConfig {
            jail_bin: self.jail_bin.trim().to_string(),
            policy_path: self.policy_path.clone(),
            jail_env: self
                .jail_env
                .iter()
                .map(|entry| entry.trim())
                .filter(|entry| !entry.is_empty())
                .map(str::to_string)
                .collect(),
            runner_bin: self.runner_bin.clone(),
            scratch_dir: self.scratch_dir.clone(),
            timeout: self.timeout,
            max_script_chars: self.max_script_chars,
            max_output_bytes: self.max_output_bytes,
            confinement: Confinement::from_bypass_flag(self.disable_jail)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn request_limits(&self) -> Result<RequestLimits, ConfigError> {
        if self.max_body_bytes == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "max_body_bytes",
            });
        }
        Ok(RequestLimits {
            max_script_chars: self.max_script_chars,
            max_body_bytes: self.max_body_bytes,
        })
    }
}
