use sandbox_runner::{report, run_script, RunnerError};
use std::env;
use std::panic;
use std::path::Path;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();

    let outcome = match args.as_slice() {
        [script_path] => panic::catch_unwind(|| run_script(Path::new(script_path)))
            .unwrap_or_else(|_| Err(RunnerError::internal("sandbox runner panicked"))),
        _ => Err(RunnerError::Usage),
    };

    report(outcome)
}
