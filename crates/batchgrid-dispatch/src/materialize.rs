//! Job materializer. Writes storage files and launcher scripts.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use batchgrid_core::JobUnit;
use batchgrid_core::codec::encode_payloads;
use tracing::debug;

use crate::error::{DispatchError, DispatchResult};
use crate::layout::JobFolder;

/// Environment variable carrying the pipeline working directory into jobs.
pub const WORKING_DIR_ENV: &str = "BATCHGRID_WD";

/// How a launcher starts the worker.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub interpreter: String,
    pub program: PathBuf,
    pub working_dir: PathBuf,
}

/// Reset `folder` and create its five subdirectories.
///
/// A folder left behind by an earlier attempt with the same name and suffix
/// is removed first.
pub fn prepare_folder(folder: &JobFolder) -> DispatchResult<()> {
    if folder.exists() {
        debug!(path = %folder.root().display(), "removing stale job folder");
        std::fs::remove_dir_all(folder.root())
            .map_err(|e| DispatchError::materialize(folder.root(), e))?;
    }
    for dir in folder.subdirs() {
        std::fs::create_dir_all(&dir).map_err(|e| DispatchError::materialize(&dir, e))?;
    }
    Ok(())
}

/// Write the storage file and launcher of one job.
pub fn materialize(unit: &JobUnit, launch: &LaunchSpec) -> DispatchResult<()> {
    let storage = File::create(&unit.storage_path)
        .map_err(|e| DispatchError::materialize(&unit.storage_path, e))?;
    encode_payloads(BufWriter::new(storage), unit.payload.values())?;

    std::fs::write(&unit.launcher_path, launcher_script(unit, launch))
        .map_err(|e| DispatchError::materialize(&unit.launcher_path, e))?;
    make_executable(&unit.launcher_path)?;
    Ok(())
}

/// Body of the launcher for `unit`.
pub fn launcher_script(unit: &JobUnit, launch: &LaunchSpec) -> String {
    format!(
        "#!/bin/bash -l\nexport {WORKING_DIR_ENV}={}\n{} {} {} {}\n",
        shell_quote(&launch.working_dir.to_string_lossy()),
        shell_quote(&launch.interpreter),
        shell_quote(&launch.program.to_string_lossy()),
        shell_quote(&unit.storage_path.to_string_lossy()),
        shell_quote(&unit.result_path.to_string_lossy()),
    )
}

#[cfg(unix)]
fn make_executable(path: &Path) -> DispatchResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o744))
        .map_err(|e| DispatchError::materialize(path, e))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> DispatchResult<()> {
    Ok(())
}

/// Single-quote `s` for POSIX shells unless it is made of safe characters.
pub fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.chars().all(|c| c.is_ascii_alphanumeric() || "-_./:@=+".contains(c)) {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}
