use std::io;
use std::path::{Component, Path, PathBuf};

/// Why a requested path was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathViolation {
    #[error("empty path")]
    Empty,
    #[error("absolute path")]
    Absolute,
    #[error("path resolves outside the plugin directory")]
    Escapes,
    #[error("path names the plugin directory itself")]
    IsBase,
}

/// A path that passed the containment check.
#[derive(Debug, Clone)]
pub struct Resolved {
    /// Canonical absolute location on disk (the file itself may not exist yet).
    pub absolute: PathBuf,
    /// Location relative to the plugin directory, `/`-separated.
    pub relative: String,
}

/// Normalize a path by resolving `.` and `..` components without touching
/// the filesystem. `..` never climbs above the first component.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if matches!(components.last(), Some(Component::Normal(_))) {
                    components.pop();
                } else {
                    components.push(component);
                }
            }
            Component::CurDir => {}
            c => components.push(c),
        }
    }
    components.iter().collect()
}

/// Canonicalize `path`, tolerating a missing tail: the deepest existing
/// ancestor is canonicalized (following symlinks) and the remaining
/// components are appended unchanged.
fn canonicalize_lenient(path: &Path) -> io::Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();

    loop {
        match existing.canonicalize() {
            Ok(canonical) => {
                let mut out = canonical;
                for part in tail.iter().rev() {
                    out.push(part);
                }
                return Ok(out);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // A dangling symlink has no canonical form to check.
                if existing
                    .symlink_metadata()
                    .is_ok_and(|m| m.file_type().is_symlink())
                {
                    return Err(io::Error::new(
                        io::ErrorKind::PermissionDenied,
                        "dangling symlink",
                    ));
                }
                let Some(name) = existing.file_name().map(|n| n.to_os_string()) else {
                    return Err(e);
                };
                tail.push(name);
                if !existing.pop() {
                    return Err(e);
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Resolve `requested` against the plugin directory `base` and require the
/// result to stay strictly inside it.
///
/// The check runs on the canonical form, so `..` sequences and symlinks that
/// point elsewhere are both caught. Containment is tested per component:
/// `/srv/plugins/Ext` does not contain `/srv/plugins/ExtEvil`.
pub fn resolve_within(base: &Path, requested: &str) -> Result<Resolved, PathViolation> {
    if requested.trim().is_empty() {
        return Err(PathViolation::Empty);
    }

    let requested_path = Path::new(requested);
    if requested_path.has_root() || requested_path.is_absolute() {
        return Err(PathViolation::Absolute);
    }
    if requested_path
        .components()
        .any(|c| matches!(c, Component::Prefix(_)))
    {
        return Err(PathViolation::Absolute);
    }

    let canonical_base = base.canonicalize().map_err(|e| {
        log::warn!("Cannot canonicalize plugin directory {}: {}", base.display(), e);
        PathViolation::Escapes
    })?;

    let joined = normalize_path(&canonical_base.join(requested_path));
    if !joined.starts_with(&canonical_base) {
        return Err(PathViolation::Escapes);
    }

    let absolute = canonicalize_lenient(&joined).map_err(|_| PathViolation::Escapes)?;
    if !absolute.starts_with(&canonical_base) {
        return Err(PathViolation::Escapes);
    }
    if absolute == canonical_base {
        return Err(PathViolation::IsBase);
    }
    let relative = absolute
        .strip_prefix(&canonical_base)
        .map_err(|_| PathViolation::Escapes)?
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");

    Ok(Resolved { absolute, relative })
}
