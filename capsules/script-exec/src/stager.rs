use crate::error::ExecError;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Mode of a staged script once written: readable by the jailed runner,
/// writable by nobody.
#[cfg(unix)]
const STAGED_MODE: u32 = 0o444;

/// A submitted script materialized on disk for exactly one invocation.
///
/// The file is removed by [`StagedScript::release`] or, failing that, when the
/// value is dropped. Removal is best effort and never reported to the caller.
#[derive(Debug)]
pub struct StagedScript {
    path: PathBuf,
    removed: bool,
}

impl StagedScript {
    pub fn write(scratch_dir: &Path, text: &str) -> Result<Self, ExecError> {
        let path = scratch_dir.join(format!("script-{}.py", Uuid::new_v4()));

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|err| {
                ExecError::internal(format!(
                    "Failed to create staged script {}: {}",
                    path.display(),
                    err
                ))
            })?;

        // From here on the guard owns the file, so any failure below still
        // removes it on drop while the original error propagates.
        let staged = Self {
            path,
            removed: false,
        };

        file.write_all(text.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|err| {
                ExecError::internal(format!(
                    "Failed to write staged script {}: {}",
                    staged.path.display(),
                    err
                ))
            })?;
        drop(file);

        #[cfg(unix)]
        fs::set_permissions(&staged.path, fs::Permissions::from_mode(STAGED_MODE)).map_err(
            |err| {
                ExecError::internal(format!(
                    "Failed to set permissions on staged script {}: {}",
                    staged.path.display(),
                    err
                ))
            },
        )?;

        debug!(path = %staged.path.display(), bytes = text.len(), "staged script");
        Ok(staged)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;

        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed staged script"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                path = %self.path.display(),
                error = %err,
                "failed to remove staged script"
            ),
        }
    }
}

impl Drop for StagedScript {
    fn drop(&mut self) {
        self.remove();
    }
}
