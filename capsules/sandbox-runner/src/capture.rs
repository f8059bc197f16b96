use pyo3::prelude::*;

/// Replaces `sys.stdout` with an in-memory `io.StringIO` for as long as the
/// guard lives. Dropping the guard puts the previous stream back, whichever
/// way the guarded code exits.
pub struct StdoutCapture<'py> {
    sys: &'py PyModule,
    original: &'py PyAny,
    sink: &'py PyAny,
}

impl<'py> StdoutCapture<'py> {
    pub fn install(py: Python<'py>) -> PyResult<Self> {
        let sys = py.import("sys")?;
        let original = sys.getattr("stdout")?;
        let sink = py.import("io")?.getattr("StringIO")?.call0()?;
        sys.setattr("stdout", sink)?;

        Ok(Self {
            sys,
            original,
            sink,
        })
    }

    /// Text written so far.
    pub fn contents(&self) -> PyResult<String> {
        self.sink.call_method0("getvalue")?.extract()
    }

    /// Read the captured text and restore the previous stream.
    pub fn finish(self) -> PyResult<String> {
        self.contents()
    }
}

impl Drop for StdoutCapture<'_> {
    fn drop(&mut self) {
        // Nothing useful can be done if sys itself refuses the assignment.
        let _ = self.sys.setattr("stdout", self.original);
        let _ = self.sink.call_method0("close");
    }
}
