//! Linker driver: turn an emitted object into an executable with `cc`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, warn};

use crate::error::{CompileError, CompileResult};

/// The system C compiler driver, found on `PATH`.
pub fn find_cc() -> CompileResult<PathBuf> {
    which::which("cc").map_err(|err| CompileError::Link {
        exe: PathBuf::from("cc"),
        message: format!("no C compiler driver on PATH: {err}"),
    })
}

/// Run `cc -o <exe> <object>`.
pub fn link_executable(object: &Path, exe: &Path) -> CompileResult<()> {
    let cc = find_cc()?;
    debug!(cc = %cc.display(), object = %object.display(), exe = %exe.display(), "linking");

    let output = Command::new(&cc).arg("-o").arg(exe).arg(object).output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CompileError::Link {
            exe: exe.to_path_buf(),
            message: format!("`{}` exited with {}: {}", cc.display(), output.status, stderr.trim()),
        });
    }

    info!(exe = %exe.display(), "linked executable");
    Ok(())
}

/// Delete the intermediate object. Failure only warrants a warning.
pub fn remove_object(object: &Path) {
    if let Err(err) = fs::remove_file(object) {
        warn!(
            object = %object.display(),
            error = %err,
            "could not remove intermediate object file"
        );
    }
}
