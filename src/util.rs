use std::io;
use std::path::{Path, PathBuf};

/// Hidden sibling used as the staging file for `path`.
fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp", name))
}

/// Clear a staging entry left behind by an interrupted write. A non-empty
/// directory in that slot is not ours to delete, so it is reported instead.
fn clear_stale_staging(tmp: &Path) -> io::Result<()> {
    let meta = match std::fs::symlink_metadata(tmp) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    log::warn!("Removing stale staging entry {}", tmp.display());
    if meta.is_dir() {
        std::fs::remove_dir(tmp).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("staging path {} is an occupied directory: {}", tmp.display(), e),
            )
        })
    } else {
        std::fs::remove_file(tmp)
    }
}

/// Atomic file write: writes data to a temporary sibling file, then renames
/// into place. Readers see either the old content or the new, never a mix.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    let tmp = staging_path(path);
    clear_stale_staging(&tmp)?;
    if let Err(e) = std::fs::write(&tmp, data) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    std::fs::rename(&tmp, path).inspect_err(|_| {
        let _ = std::fs::remove_file(&tmp);
    })
}
