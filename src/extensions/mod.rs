//! The host application's plugins, as seen by the console.
//!
//! The console does not own plugin lifecycle. It looks plugins up, asks
//! for their private data directory, and asks the host to enable, disable
//! or reload them through [`ExtensionRegistry`].

pub mod actions;
pub mod directory;

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::ConsoleResult;

pub use actions::{perform_action, ActionOutcome, ExtensionAction};
pub use directory::DirectoryRegistry;

/// File extensions treated as editable configuration.
const CONFIG_EXTENSIONS: &[&str] = &["yml", "yaml", "json", "properties", "conf", "config", "txt"];

/// Public summary of an installed plugin. Deliberately carries no
/// filesystem path.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionInfo {
    pub name: String,
    pub enabled: bool,
}

/// Lookup and lifecycle interface onto the host's plugin manager.
pub trait ExtensionRegistry: Send + Sync {
    fn list(&self) -> Vec<ExtensionInfo>;

    fn get(&self, name: &str) -> Option<ExtensionInfo>;

    /// Private data directory of `name`, or `None` if no such plugin.
    fn data_dir(&self, name: &str) -> Option<PathBuf>;

    fn enable(&self, name: &str) -> ConsoleResult<()>;

    fn disable(&self, name: &str) -> ConsoleResult<()>;

    fn reload(&self, name: &str) -> ConsoleResult<()> {
        self.disable(name)?;
        self.enable(name)
    }
}

/// Recursively list configuration files under `dir`, as `/`-separated paths
/// relative to it, sorted. Symlinks are not followed.
pub fn find_config_files(dir: &Path) -> Vec<String> {
    let mut files: Vec<String> = walkdir::WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| CONFIG_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .filter_map(|entry| {
            entry.path().strip_prefix(dir).ok().map(|rel| {
                rel.components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/")
            })
        })
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_nested_config_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("lang/en")).unwrap();
        std::fs::write(dir.path().join("config.yml"), "a: 1").unwrap();
        std::fs::write(dir.path().join("lang/en/messages.PROPERTIES"), "x=y").unwrap();
        std::fs::write(dir.path().join("data.db"), [0u8; 4]).unwrap();
        std::fs::write(dir.path().join("README"), "hi").unwrap();

        let files = find_config_files(dir.path());
        assert_eq!(files, vec!["config.yml", "lang/en/messages.PROPERTIES"]);
    }

    #[test]
    fn missing_directory_has_no_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_config_files(&dir.path().join("absent")).is_empty());
    }
}
