#![cfg(unix)]
//! Process-level tests for the invoker. A shell script stands in for the
//! confinement wrapper (it drops its own flags and execs whatever follows
//! `--`), and small shell runners play the part of the sandbox runner.

use capsules_script_exec::{
    execute, invoke, ErrorKind, SandboxConfig, ScriptSubmission, StagedScript,
};
use serial_test::serial;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;

const FAKE_JAIL: &str = r#"#!/bin/sh
while [ "$#" -gt 0 ]; do
  if [ "$1" = "--" ]; then
    shift
    break
  fi
  shift
done
exec "$@"
"#;

struct Harness {
    dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        let harness = Self {
            dir: tempfile::tempdir().unwrap(),
        };
        fs::create_dir_all(harness.scratch()).unwrap();
        fs::write(harness.dir.path().join("policy.cfg"), "# opaque policy\n").unwrap();
        harness.executable("jail", FAKE_JAIL);
        harness
    }

    fn scratch(&self) -> PathBuf {
        self.dir.path().join("scratch")
    }

    fn executable(&self, name: &str, body: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, body).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn config(&self, runner_body: &str) -> SandboxConfig {
        let runner = self.executable("runner", runner_body);
        SandboxConfig {
            jail_bin: self.dir.path().join("jail").display().to_string(),
            policy_path: self.dir.path().join("policy.cfg"),
            runner_bin: runner,
            scratch_dir: self.scratch(),
            timeout: Duration::from_secs(5),
            ..SandboxConfig::default()
        }
    }

    fn staged_files(&self) -> usize {
        fs::read_dir(self.scratch()).unwrap().count()
    }
}

fn submission(text: &str) -> ScriptSubmission {
    ScriptSubmission::parse(text, 10_000).unwrap()
}

/// Echoes the staged script's text back as both a result field and stdout.
const ECHO_RUNNER: &str = r#"#!/bin/sh
content=$(cat "$1")
printf '{"result": {"sentinel": "%s"}, "stdout": "%s\\n"}\n' "$content" "$content"
"#;

#[test]
#[serial]
fn successful_run_returns_result_and_stdout() {
    let harness = Harness::new();
    let config = harness.config(ECHO_RUNNER);

    let result = execute(&config, &submission("alpha")).unwrap();

    assert_eq!(result.result["sentinel"], "alpha");
    assert_eq!(result.stdout, "alpha\n");
    assert_eq!(harness.staged_files(), 0);
}

#[test]
#[serial]
fn repeated_runs_are_identical_and_leave_nothing_behind() {
    let harness = Harness::new();
    let config = harness.config(ECHO_RUNNER);

    let first = execute(&config, &submission("same")).unwrap();
    assert_eq!(harness.staged_files(), 0);
    let second = execute(&config, &submission("same")).unwrap();
    assert_eq!(harness.staged_files(), 0);

    assert_eq!(first, second);
}

#[test]
#[serial]
fn runner_receives_readable_absolute_script_path() {
    let harness = Harness::new();
    let config = harness.config(
        r#"#!/bin/sh
[ "$#" -eq 1 ] || { echo "expected one argument" >&2; exit 2; }
case "$1" in
  /*) ;;
  *) echo "path is not absolute" >&2; exit 2 ;;
esac
[ -r "$1" ] || { echo "script not readable" >&2; exit 2; }
printf '{"result": {}, "stdout": ""}\n'
"#,
    );

    execute(&config, &submission("x = 1")).unwrap();
}

#[test]
#[serial]
fn slow_script_hits_time_limit_within_margin() {
    let harness = Harness::new();
    let config = SandboxConfig {
        timeout: Duration::from_millis(300),
        ..harness.config("#!/bin/sh\nprintf 'partial'\nsleep 10\n")
    };

    let start = Instant::now();
    let err = execute(&config, &submission("spin")).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TimeLimitExceeded);
    assert_eq!(err.message(), "Script exceeded time limit");
    assert!(
        start.elapsed() < Duration::from_secs(3),
        "took {:?}",
        start.elapsed()
    );
    assert_eq!(harness.staged_files(), 0);
}

#[test]
#[serial]
fn background_children_do_not_hold_invocation_open() {
    let harness = Harness::new();
    let config = harness.config(
        "#!/bin/sh\nsleep 30 &\nprintf '{\"result\": {\"ok\": true}, \"stdout\": \"\"}\\n'\n",
    );

    let start = Instant::now();
    let result = execute(&config, &submission("fork")).unwrap();

    assert_eq!(result.result["ok"], true);
    assert!(start.elapsed() < Duration::from_secs(3));
}

#[test]
#[serial]
fn failing_script_surfaces_last_user_line() {
    let harness = Harness::new();
    let config = harness.config(
        r#"#!/bin/sh
echo "Traceback (most recent call last):" >&2
echo "  File \"$1\", line 2, in main" >&2
echo "ValueError: boom" >&2
echo "[I][2024-05-01T10:00:00+0000] pid=42 exited with status: 1" >&2
exit 1
"#,
    );

    let err = execute(&config, &submission("raise")).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ScriptError);
    assert_eq!(err.message(), "ValueError: boom");
}

#[test]
#[serial]
fn silent_failure_uses_generic_message() {
    let harness = Harness::new();
    let config = harness.config("#!/bin/sh\nexit 3\n");

    let err = execute(&config, &submission("x")).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ScriptError);
    assert_eq!(err.message(), "Script failed with non-zero exit code");
}

#[test]
#[serial]
fn jail_setup_failure_is_environment_error() {
    let harness = Harness::new();
    let mut config = harness.config(ECHO_RUNNER);
    let jail = harness.executable(
        "broken-jail",
        "#!/bin/sh\necho \"[E][2024-05-01] clone(CLONE_NEWUSER|CLONE_NEWNS): Operation not permitted\" >&2\nexit 255\n",
    );
    config.jail_bin = jail.display().to_string();

    let err = execute(&config, &submission("x")).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SandboxEnvironmentError);
    assert_eq!(
        err.message(),
        "Sandbox could not start due to environment restrictions."
    );
    assert!(!err.message().contains("clone"));
}

#[test]
#[serial]
fn missing_jail_binary_is_environment_error() {
    let harness = Harness::new();
    let mut config = harness.config(ECHO_RUNNER);
    config.jail_bin = harness.dir.path().join("no-such-jail").display().to_string();

    let err = execute(&config, &submission("x")).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SandboxEnvironmentError);
    assert!(!err.message().contains("no-such-jail"));
    assert_eq!(harness.staged_files(), 0);
}

#[test]
#[serial]
fn garbage_output_is_protocol_error() {
    let harness = Harness::new();
    let config = harness.config("#!/bin/sh\necho 'hello from a confused runner'\n");

    let err = execute(&config, &submission("x")).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ProtocolError);
}

#[test]
#[serial]
fn envelope_without_stdout_key_is_protocol_error() {
    let harness = Harness::new();
    let config = harness.config("#!/bin/sh\necho '{\"result\": {}}'\n");

    let err = execute(&config, &submission("x")).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ProtocolError);
    assert_eq!(err.message(), "Sandbox output missing 'result' or 'stdout'");
}

#[test]
#[serial]
fn non_object_result_is_rejected_by_invoker() {
    let harness = Harness::new();
    let config = harness.config("#!/bin/sh\necho '{\"result\": [1, 2], \"stdout\": \"\"}'\n");

    let err = execute(&config, &submission("x")).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ProtocolError);
}

#[test]
#[serial]
fn oversized_output_is_script_error() {
    let harness = Harness::new();
    let config = SandboxConfig {
        max_output_bytes: 1024,
        ..harness.config("#!/bin/sh\nhead -c 200000 /dev/zero | tr '\\0' 'a'\n")
    };

    let err = execute(&config, &submission("x")).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ScriptError);
    assert_eq!(err.message(), "Script output exceeded the 1024 byte limit");
}

#[test]
#[serial]
fn summary_survives_noisy_stderr() {
    let harness = Harness::new();
    let config = harness.config(
        "#!/bin/sh\nhead -c 2097152 /dev/zero | tr '\\0' 'x' >&2\nprintf '\\nValueError: boom\\n' >&2\nexit 1\n",
    );

    let err = execute(&config, &submission("x")).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ScriptError);
    assert_eq!(err.message(), "ValueError: boom");
}

#[test]
#[serial]
fn concurrent_invocations_receive_only_their_own_output() {
    let harness = Harness::new();
    let config = harness.config(ECHO_RUNNER);

    let results: Vec<(String, String)> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let config = &config;
                scope.spawn(move || {
                    let sentinel = format!("sentinel{i}");
                    let result = execute(config, &submission(&sentinel)).unwrap();
                    (sentinel, result.stdout)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for (sentinel, stdout) in results {
        assert_eq!(stdout, format!("{sentinel}\n"));
    }
    assert_eq!(harness.staged_files(), 0);
}

#[test]
#[serial]
fn invoke_leaves_staged_file_to_its_owner() {
    let harness = Harness::new();
    let config = harness.config(ECHO_RUNNER);

    let staged = StagedScript::write(&harness.scratch(), "owned").unwrap();
    let path: PathBuf = staged.path().to_path_buf();
    invoke(&config, &path).unwrap();
    assert!(Path::new(&path).exists());

    staged.release();
    assert!(!path.exists());
}
