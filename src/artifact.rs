//! Artifact collection from the shared filesystem.
//!
//! The guest leaves finished artifacts under `<share>/out`. They are
//! copied into a staging directory next to the output directory first and
//! renamed into place afterwards, so an existing output directory is
//! either fully replaced or left untouched - never half-overwritten by a
//! failed copy.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{ProvisionError, Result};

/// Subdirectory of the share the guest writes artifacts into.
pub const ARTIFACT_SUBDIR: &str = "out";

/// Copy the artifact tree into `output_dir`, preserving file mode and
/// modification time.
pub fn collect(share_dir: &Path, output_dir: &Path) -> Result<()> {
    let source = share_dir.join(ARTIFACT_SUBDIR);
    if !source.is_dir() {
        return Err(ProvisionError::ArtifactCopy {
            path: source,
            source: io::Error::new(
                io::ErrorKind::NotFound,
                "guest produced no artifact directory",
            ),
        });
    }

    let staging = staging_path(output_dir)?;
    if staging.exists() {
        // Leftover from a crashed earlier run.
        fs::remove_dir_all(&staging).map_err(|e| copy_err(&staging, e))?;
    }

    copy_tree(&source, &staging)?;

    if output_dir.exists() {
        fs::remove_dir_all(output_dir).map_err(|e| copy_err(output_dir, e))?;
    }
    fs::rename(&staging, output_dir).map_err(|e| copy_err(output_dir, e))?;
    Ok(())
}

fn staging_path(output_dir: &Path) -> Result<PathBuf> {
    let name = output_dir.file_name().ok_or_else(|| ProvisionError::ArtifactCopy {
        path: output_dir.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "output dir has no name"),
    })?;
    Ok(output_dir.with_file_name(format!(".{}.staging", name.to_string_lossy())))
}

fn copy_err(path: &Path, source: io::Error) -> ProvisionError {
    ProvisionError::ArtifactCopy {
        path: path.to_path_buf(),
        source,
    }
}

fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).map_err(|e| copy_err(dst, e))?;
    for entry in fs::read_dir(src).map_err(|e| copy_err(src, e))? {
        let entry = entry.map_err(|e| copy_err(src, e))?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let meta = entry.metadata().map_err(|e| copy_err(&from, e))?;
        if meta.is_dir() {
            copy_tree(&from, &to)?;
        } else {
            // fs::copy carries the permission bits; mtime needs a second
            // pass.
            fs::copy(&from, &to).map_err(|e| copy_err(&from, e))?;
            let modified = meta.modified().map_err(|e| copy_err(&from, e))?;
            let file = fs::File::options()
                .write(true)
                .open(&to)
                .map_err(|e| copy_err(&to, e))?;
            file.set_modified(modified).map_err(|e| copy_err(&to, e))?;
        }
    }
    Ok(())
}
