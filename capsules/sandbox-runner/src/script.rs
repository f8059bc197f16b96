//! Loading a submitted script and calling its entry point.

use crate::error::RunnerError;
use capsules_script_exec::ENTRY_POINT;
use pyo3::prelude::*;
use pyo3::types::{IntoPyDict, PyDict};
use serde_json::{Map, Value};
use std::path::Path;

const MODULE_NAME: &str = "__sandbox__";

/// Execute the script body in a fresh namespace.
pub fn load<'py>(py: Python<'py>, path: &Path, source: &str) -> Result<&'py PyDict, RunnerError> {
    let builtins = py.import("builtins").map_err(internal)?;
    let filename = path.display().to_string();

    let globals = PyDict::new(py);
    globals
        .set_item("__builtins__", builtins)
        .and_then(|_| globals.set_item("__name__", MODULE_NAME))
        .and_then(|_| globals.set_item("__file__", &filename))
        .map_err(internal)?;

    let code = builtins
        .getattr("compile")
        .and_then(|compile| compile.call1((source, filename.as_str(), "exec")))
        .map_err(|err| raised(py, err))?;
    builtins
        .getattr("exec")
        .and_then(|exec| exec.call1((code, globals)))
        .map_err(|err| raised(py, err))?;

    Ok(globals)
}

/// Look up the entry point and check it can be called with no arguments.
pub fn entry_point<'py>(py: Python<'py>, globals: &'py PyDict) -> Result<&'py PyAny, RunnerError> {
    let entry = globals
        .get_item(ENTRY_POINT)
        .map_err(internal)?
        .ok_or(RunnerError::MissingEntryPoint)?;

    if !entry.is_callable() {
        return Err(RunnerError::EntryPointNotCallable);
    }

    if !accepts_no_arguments(py, entry) {
        return Err(RunnerError::EntryPointNeedsArguments);
    }

    Ok(entry)
}

/// Callables without an introspectable signature get the benefit of the doubt.
fn accepts_no_arguments(py: Python<'_>, entry: &PyAny) -> bool {
    let Ok(inspect) = py.import("inspect") else {
        return true;
    };
    match inspect.call_method1("signature", (entry,)) {
        Ok(signature) => signature.call_method0("bind").is_ok(),
        Err(_) => true,
    }
}

pub fn call<'py>(py: Python<'py>, entry: &'py PyAny) -> Result<&'py PyAny, RunnerError> {
    entry.call0().map_err(|err| raised(py, err))
}

/// Check the entry point's return value and round-trip it through JSON.
pub fn to_json_object(py: Python<'_>, value: &PyAny) -> Result<Map<String, Value>, RunnerError> {
    if value.is_none() {
        return Err(RunnerError::ReturnedNone);
    }

    if value.downcast::<PyDict>().is_err() {
        let type_name = value
            .get_type()
            .name()
            .map(str::to_string)
            .unwrap_or_else(|_| "unknown".to_string());
        return Err(RunnerError::NotAnObject { type_name });
    }

    let json = py.import("json").map_err(internal)?;
    let kwargs = [("allow_nan", false)].into_py_dict(py);
    let encoded: String = json
        .call_method("dumps", (value,), Some(kwargs))
        .and_then(|text| text.extract())
        .map_err(|err| RunnerError::NotSerializable {
            detail: err.value(py).to_string(),
        })?;

    match serde_json::from_str(&encoded) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(RunnerError::internal(format!(
            "encoded return value decoded as {}",
            capsules_script_exec::protocol::json_type_name(&other)
        ))),
        Err(err) => Err(RunnerError::internal(format!(
            "encoded return value is not valid JSON: {}",
            err
        ))),
    }
}

fn internal(err: PyErr) -> RunnerError {
    RunnerError::internal(err.to_string())
}

/// An exception escaped user code.
fn raised(py: Python<'_>, err: PyErr) -> RunnerError {
    let fallback = err.to_string();
    let traceback = format_exception(py, &err).unwrap_or_else(|_| fallback.clone());
    let summary = traceback
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .unwrap_or(fallback);

    RunnerError::ScriptRaised { traceback, summary }
}

fn format_exception(py: Python<'_>, err: &PyErr) -> PyResult<String> {
    let lines: Vec<String> = py
        .import("traceback")?
        .call_method1(
            "format_exception",
            (err.get_type(py), err.value(py), err.traceback(py)),
        )?
        .extract()?;
    Ok(lines.concat())
}
