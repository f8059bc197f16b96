//! Inner half of the sandbox boundary.
//!
//! Runs inside the confined process: loads one script, calls its `main()`
//! with stdout captured, validates the return value, and reports through the
//! boundary protocol. Exit status 0 always comes with exactly one JSON line
//! on stdout; anything else exits 1 with a diagnostic on stderr.

pub mod capture;
pub mod error;
pub mod script;

pub use error::RunnerError;

use capsules_script_exec::SandboxResult;
use capture::StdoutCapture;
use pyo3::prelude::*;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::process::ExitCode;

/// Run the script at `path` and produce the protocol payload.
pub fn run_script(path: &Path) -> Result<SandboxResult, RunnerError> {
    let source = fs::read_to_string(path).map_err(|err| {
        RunnerError::internal(format!("failed to read {}: {}", path.display(), err))
    })?;

    Python::with_gil(|py| {
        let capture = StdoutCapture::install(py)
            .map_err(|err| RunnerError::internal(format!("failed to capture stdout: {}", err)))?;

        let returned = script::load(py, path, &source)
            .and_then(|globals| script::entry_point(py, globals))
            .and_then(|entry| script::call(py, entry));
        let stdout = capture.finish();

        let returned = returned?;
        let stdout = stdout
            .map_err(|err| RunnerError::internal(format!("failed to read captured stdout: {}", err)))?;
        let result = script::to_json_object(py, returned)?;

        Ok(SandboxResult::new(result, stdout))
    })
}

/// Write the outcome to the process streams and pick the exit status.
pub fn report(outcome: Result<SandboxResult, RunnerError>) -> ExitCode {
    ExitCode::from(report_to(
        outcome,
        &mut io::stdout().lock(),
        &mut io::stderr().lock(),
    ))
}

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;

/// Returns the exit status to terminate with.
pub fn report_to<O: Write, E: Write>(
    outcome: Result<SandboxResult, RunnerError>,
    stdout: &mut O,
    stderr: &mut E,
) -> u8 {
    let error = match outcome {
        Ok(payload) => match write_payload(&payload, stdout) {
            Ok(()) => return EXIT_SUCCESS,
            Err(err) => RunnerError::internal(format!("failed to emit result: {}", err)),
        },
        Err(err) => err,
    };

    for line in error.diagnostic_lines() {
        let _ = writeln!(stderr, "{}", line);
    }
    let _ = stderr.flush();
    EXIT_FAILURE
}

fn write_payload<O: Write>(payload: &SandboxResult, stdout: &mut O) -> io::Result<()> {
    let line = payload.to_line().map_err(io::Error::from)?;
    writeln!(stdout, "{}", line)?;
    stdout.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    #[test]
    fn success_writes_single_line_and_nothing_to_stderr() {
        let mut result = Map::new();
        result.insert("a".into(), json!(1));
        let (mut out, mut err) = (Vec::new(), Vec::new());

        let code = report_to(Ok(SandboxResult::new(result, "hi\n")), &mut out, &mut err);

        assert_eq!(code, EXIT_SUCCESS);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"result": {"a": 1}, "stdout": "hi\n"}));
        assert!(err.is_empty());
    }

    #[test]
    fn failure_writes_diagnostic_only_to_stderr() {
        let (mut out, mut err) = (Vec::new(), Vec::new());

        let code = report_to(Err(RunnerError::MissingEntryPoint), &mut out, &mut err);

        assert_eq!(code, EXIT_FAILURE);
        assert!(out.is_empty());
        assert_eq!(
            String::from_utf8(err).unwrap(),
            "Script must define a function main()\n"
        );
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_result_write_is_internal_failure() {
        let mut err = Vec::new();

        let code = report_to(
            Ok(SandboxResult::new(Map::new(), "")),
            &mut BrokenPipe,
            &mut err,
        );

        assert_eq!(code, EXIT_FAILURE);
        let text = String::from_utf8(err).unwrap();
        assert_eq!(
            text.lines().last(),
            Some("Internal error while executing script")
        );
    }
}
