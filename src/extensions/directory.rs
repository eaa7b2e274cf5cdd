use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use super::{ExtensionInfo, ExtensionRegistry};
use crate::error::{ConsoleError, ConsoleResult};

/// Registry over a plugins directory: each subdirectory is one plugin's
/// private data folder, named after the plugin.
///
/// Enabled state lives in memory and defaults to enabled. A host
/// integration that controls real plugin lifecycle implements
/// [`ExtensionRegistry`] itself instead.
pub struct DirectoryRegistry {
    root: PathBuf,
    disabled: RwLock<HashMap<String, bool>>,
}

impl DirectoryRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            disabled: RwLock::new(HashMap::new()),
        }
    }

    fn is_enabled(&self, name: &str) -> bool {
        let disabled = self.disabled.read().unwrap_or_else(|e| e.into_inner());
        !disabled.get(name).copied().unwrap_or(false)
    }

    fn set_disabled(&self, name: &str, value: bool) -> ConsoleResult<()> {
        if self.data_dir(name).is_none() {
            return Err(ConsoleError::ExtensionNotFound(name.to_string()));
        }
        let mut disabled = self.disabled.write().unwrap_or_else(|e| e.into_inner());
        disabled.insert(name.to_string(), value);
        Ok(())
    }
}

/// A plugin name must be exactly one normal path component.
fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}

impl ExtensionRegistry for DirectoryRegistry {
    fn list(&self) -> Vec<ExtensionInfo> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Cannot read plugins directory {}: {}", self.root.display(), e);
                return Vec::new();
            }
        };

        let mut plugins: Vec<ExtensionInfo> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .map(|name| ExtensionInfo {
                enabled: self.is_enabled(&name),
                name,
            })
            .collect();
        plugins.sort_by(|a, b| a.name.cmp(&b.name));
        plugins
    }

    fn get(&self, name: &str) -> Option<ExtensionInfo> {
        self.data_dir(name).map(|_| ExtensionInfo {
            name: name.to_string(),
            enabled: self.is_enabled(name),
        })
    }

    fn data_dir(&self, name: &str) -> Option<PathBuf> {
        if !is_plain_name(name) {
            return None;
        }
        let dir = self.root.join(name);
        dir.is_dir().then_some(dir)
    }

    fn enable(&self, name: &str) -> ConsoleResult<()> {
        self.set_disabled(name, false)?;
        log::info!("Enabled plugin {}", name);
        Ok(())
    }

    fn disable(&self, name: &str) -> ConsoleResult<()> {
        self.set_disabled(name, true)?;
        log::info!("Disabled plugin {}", name);
        Ok(())
    }
}
