//! Safe reads, writes and rollbacks of plugin configuration files.
//!
//! Every path is confined to the owning plugin's data directory before the
//! filesystem is touched. Overwrites are preceded by a snapshot in the
//! backup store, restores are preceded by a snapshot of the live file, and
//! each outcome lands in the audit trail.

pub mod backups;
pub mod locks;
pub mod path_guard;

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::audit::{AuditAction, AuditEntry, AuditTrail};
use crate::error::{ConsoleError, ConsoleResult};
use crate::extensions::{find_config_files, ExtensionRegistry};
use crate::util::atomic_write;

pub use backups::{BackupStore, ConfigSnapshot, SnapshotSummary};
pub use locks::FileLocks;
pub use path_guard::{resolve_within, PathViolation, Resolved};

/// Suffix of `created_by` on the safety capture taken before a rollback.
pub const PRE_ROLLBACK_SUFFIX: &str = " (pre-rollback)";

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    pub plugin: String,
    pub path: String,
    pub content: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WriteOutcome {
    pub plugin: String,
    pub path: String,
    /// Snapshot of the previous content, if the file existed.
    pub backup_id: Option<i64>,
    pub size: usize,
    pub reload_requested: bool,
    pub reloaded: bool,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RollbackOutcome {
    pub plugin: String,
    pub path: String,
    pub restored_backup_id: i64,
    pub restored_backup_date: DateTime<Utc>,
    /// Snapshot of the live file taken just before it was replaced.
    pub pre_rollback_backup_id: Option<i64>,
}

/// Who is asking, for the audit trail.
#[derive(Debug, Clone, Copy)]
pub struct Actor<'a> {
    pub name: &'a str,
    pub source_address: Option<IpAddr>,
}

impl<'a> Actor<'a> {
    pub fn new(name: &'a str, source_address: Option<IpAddr>) -> Self {
        Self {
            name,
            source_address,
        }
    }
}

pub struct ConfigMutationManager {
    registry: Arc<dyn ExtensionRegistry>,
    backups: BackupStore,
    audit: AuditTrail,
    locks: FileLocks,
    max_backups_per_file: usize,
}

impl ConfigMutationManager {
    pub fn new(
        registry: Arc<dyn ExtensionRegistry>,
        backups: BackupStore,
        audit: AuditTrail,
        max_backups_per_file: usize,
    ) -> Self {
        Self {
            registry,
            backups,
            audit,
            locks: FileLocks::new(),
            max_backups_per_file,
        }
    }

    fn plugin_dir(&self, owner: &str) -> ConsoleResult<PathBuf> {
        self.registry
            .data_dir(owner)
            .ok_or_else(|| ConsoleError::ExtensionNotFound(owner.to_string()))
    }

    /// Confine `requested` to the plugin directory of `owner`. Violations
    /// are audited as access denials and reported as forbidden.
    fn resolve(
        &self,
        owner: &str,
        requested: &str,
        operation: &'static str,
        actor: Actor<'_>,
    ) -> ConsoleResult<Resolved> {
        if requested.trim().is_empty() {
            return Err(ConsoleError::MissingPath);
        }
        let dir = self.plugin_dir(owner)?;
        resolve_within(&dir, requested).map_err(|violation| {
            self.audit.record(
                AuditEntry::new(actor.name, AuditAction::AccessDenied, format!("{}/{}", owner, requested))
                    .from_address(actor.source_address)
                    .failed()
                    .with_detail("reason", "PATH_OUTSIDE_PLUGIN_DIR")
                    .with_detail("violation", violation.to_string())
                    .with_detail("operation", operation),
            );
            log::warn!(
                "Rejected config path '{}' for plugin {} from {}: {}",
                requested,
                owner,
                actor.name,
                violation
            );
            ConsoleError::PathOutsideExtension(requested.to_string())
        })
    }

    fn lock_key(owner: &str, resolved: &Resolved) -> String {
        format!("{}\u{0}{}", owner, resolved.absolute.display())
    }

    pub fn list_config_files(&self, owner: &str) -> ConsoleResult<Vec<String>> {
        let dir = self.plugin_dir(owner)?;
        Ok(find_config_files(&dir))
    }

    pub fn read_file(&self, owner: &str, requested: &str, actor: Actor<'_>) -> ConsoleResult<ConfigFile> {
        let resolved = self.resolve(owner, requested, "read", actor)?;

        let metadata = match std::fs::metadata(&resolved.absolute) {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Err(ConsoleError::FileNotFound(resolved.relative)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConsoleError::FileNotFound(resolved.relative))
            }
            Err(e) => return Err(e.into()),
        };
        let content = std::fs::read_to_string(&resolved.absolute)?;

        Ok(ConfigFile {
            plugin: owner.to_string(),
            path: resolved.relative,
            size: metadata.len(),
            last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            content,
        })
    }

    /// Replace the content of a config file, snapshotting the old content
    /// first. Optionally reloads the plugin afterwards.
    pub fn write_file(
        &self,
        owner: &str,
        requested: &str,
        content: &str,
        reload: bool,
        actor: Actor<'_>,
    ) -> ConsoleResult<WriteOutcome> {
        let resolved = self.resolve(owner, requested, "write", actor)?;
        let target = format!("{}/{}", owner, resolved.relative);

        let written = self.locks.with_lock(&Self::lock_key(owner, &resolved), || {
            self.snapshot_then_write(owner, &resolved, content, actor.name.to_string())
        });

        let backup_id = match written {
            Ok(backup_id) => backup_id,
            Err(e) => {
                self.audit.record(
                    AuditEntry::new(actor.name, AuditAction::ConfigUpdate, &target)
                        .from_address(actor.source_address)
                        .failed()
                        .with_detail("error", e.code()),
                );
                return Err(e);
            }
        };

        let reloaded = reload && self.reload_plugin(owner);

        self.audit.record(
            AuditEntry::new(actor.name, AuditAction::ConfigUpdate, &target)
                .from_address(actor.source_address)
                .with_detail("reload_requested", reload)
                .with_detail("reloaded", reloaded)
                .with_detail("size", content.len())
                .with_detail("backup_id", backup_id),
        );
        log::info!(
            "Config file {} saved by {} ({} bytes)",
            target,
            actor.name,
            content.len()
        );

        self.prune(owner, &resolved.relative);

        Ok(WriteOutcome {
            plugin: owner.to_string(),
            path: resolved.relative,
            backup_id,
            size: content.len(),
            reload_requested: reload,
            reloaded,
        })
    }

    /// The read-snapshot-write sequence; callers hold the file lock.
    fn snapshot_then_write(
        &self,
        owner: &str,
        resolved: &Resolved,
        content: &str,
        created_by: String,
    ) -> ConsoleResult<Option<i64>> {
        let backup_id = self.snapshot_existing(owner, resolved, &created_by)?;
        if let Some(parent) = resolved.absolute.parent() {
            std::fs::create_dir_all(parent)?;
        }
        atomic_write(&resolved.absolute, content.as_bytes())?;
        Ok(backup_id)
    }

    /// Capture the live file if there is one.
    fn snapshot_existing(
        &self,
        owner: &str,
        resolved: &Resolved,
        created_by: &str,
    ) -> ConsoleResult<Option<i64>> {
        let current = match std::fs::read_to_string(&resolved.absolute) {
            Ok(current) => current,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let snapshot = self
            .backups
            .insert(owner, &resolved.relative, &current, created_by)?;
        log::debug!(
            "Snapshot {} of {}/{} taken for {}",
            snapshot.id,
            owner,
            resolved.relative,
            created_by
        );
        Ok(Some(snapshot.id))
    }

    fn reload_plugin(&self, owner: &str) -> bool {
        match self.registry.reload(owner) {
            Ok(()) => {
                log::info!("Plugin {} reloaded after config change", owner);
                true
            }
            Err(e) => {
                log::error!("Failed to reload plugin {} after config change: {}", owner, e);
                false
            }
        }
    }

    fn prune(&self, owner: &str, relative: &str) {
        match self.backups.prune(owner, relative, self.max_backups_per_file) {
            Ok(0) => {}
            Ok(n) => log::info!("Pruned {} old backups of {}/{}", n, owner, relative),
            Err(e) => log::warn!("Backup pruning failed for {}/{}: {}", owner, relative, e),
        }
    }

    /// Snapshots of one plugin's files, newest first.
    pub fn list_backups(&self, owner: &str) -> ConsoleResult<Vec<SnapshotSummary>> {
        self.plugin_dir(owner)?;
        self.backups.list_by_owner(owner)
    }

    pub fn get_backup(&self, owner: &str, backup_id: i64) -> ConsoleResult<ConfigSnapshot> {
        self.plugin_dir(owner)?;
        let snapshot = self
            .backups
            .get(backup_id)?
            .ok_or(ConsoleError::BackupNotFound(backup_id))?;
        if snapshot.owner_name != owner {
            return Err(ConsoleError::BackupOwnerMismatch {
                backup_id,
                owner: owner.to_string(),
            });
        }
        Ok(snapshot)
    }

    /// Restore a file from one of its snapshots, first capturing whatever
    /// is there now.
    pub fn rollback(&self, owner: &str, backup_id: i64, actor: Actor<'_>) -> ConsoleResult<RollbackOutcome> {
        self.plugin_dir(owner)?;
        let snapshot = self
            .backups
            .get(backup_id)?
            .ok_or(ConsoleError::BackupNotFound(backup_id))?;

        if snapshot.owner_name != owner {
            self.audit.record(
                AuditEntry::new(actor.name, AuditAction::AccessDenied, format!("{}/backup/{}", owner, backup_id))
                    .from_address(actor.source_address)
                    .failed()
                    .with_detail("reason", "BACKUP_OWNER_MISMATCH")
                    .with_detail("backup_id", backup_id)
                    .with_detail("operation", "rollback"),
            );
            return Err(ConsoleError::BackupOwnerMismatch {
                backup_id,
                owner: owner.to_string(),
            });
        }

        let resolved = self.resolve(owner, &snapshot.relative_path, "rollback", actor)?;
        let target = format!("{}/{}", owner, resolved.relative);
        let backup_date = crate::storage::format_timestamp(&snapshot.captured_at);
        let created_by = format!("{}{}", actor.name, PRE_ROLLBACK_SUFFIX);

        let restored = self.locks.with_lock(&Self::lock_key(owner, &resolved), || {
            self.snapshot_then_write(owner, &resolved, &snapshot.content, created_by)
        });

        let pre_rollback_backup_id = match restored {
            Ok(id) => id,
            Err(e) => {
                self.audit.record(
                    AuditEntry::new(actor.name, AuditAction::ConfigRollback, &target)
                        .from_address(actor.source_address)
                        .failed()
                        .with_detail("backup_id", backup_id)
                        .with_detail("backup_date", backup_date.as_str())
                        .with_detail("error", e.code()),
                );
                return Err(e);
            }
        };

        self.audit.record(
            AuditEntry::new(actor.name, AuditAction::ConfigRollback, &target)
                .from_address(actor.source_address)
                .with_detail("backup_id", backup_id)
                .with_detail("backup_date", backup_date.as_str())
                .with_detail("pre_rollback_backup_id", pre_rollback_backup_id),
        );
        log::info!(
            "Config file {} rolled back to backup {} by {}",
            target,
            backup_id,
            actor.name
        );

        self.prune(owner, &resolved.relative);

        Ok(RollbackOutcome {
            plugin: owner.to_string(),
            path: resolved.relative,
            restored_backup_id: backup_id,
            restored_backup_date: snapshot.captured_at,
            pre_rollback_backup_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::store::AuditStore;
    use crate::extensions::DirectoryRegistry;

    struct Fixture {
        _dir: tempfile::TempDir,
        plugins: PathBuf,
        audit: AuditTrail,
        manager: ConfigMutationManager,
    }

    fn fixture_with_cap(cap: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let plugins = dir.path().join("plugins");
        std::fs::create_dir_all(plugins.join("ExtA")).unwrap();
        std::fs::create_dir_all(plugins.join("ExtB")).unwrap();
        std::fs::write(plugins.join("ExtA/config.yml"), "a=1").unwrap();

        let db = dir.path().join("console.sqlite");
        let audit = AuditTrail::new(Arc::new(AuditStore::open(&db).unwrap()));
        let manager = ConfigMutationManager::new(
            Arc::new(DirectoryRegistry::new(&plugins)),
            BackupStore::open(&db).unwrap(),
            audit.clone(),
            cap,
        );
        Fixture {
            _dir: dir,
            plugins,
            audit,
            manager,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_cap(50)
    }

    fn admin() -> Actor<'static> {
        Actor::new("admin", Some("10.0.0.5".parse().unwrap()))
    }

    #[test]
    fn write_snapshots_previous_content() {
        let f = fixture();
        let out = f
            .manager
            .write_file("ExtA", "config.yml", "a=2", false, admin())
            .unwrap();

        let backup = f.manager.get_backup("ExtA", out.backup_id.unwrap()).unwrap();
        assert_eq!(backup.content, "a=1");
        assert_eq!(backup.created_by, "admin");
        assert_eq!(backup.relative_path, "config.yml");
        assert!(backup.captured_at <= Utc::now());
        assert_eq!(
            std::fs::read_to_string(f.plugins.join("ExtA/config.yml")).unwrap(),
            "a=2"
        );
        assert_eq!(f.manager.list_backups("ExtA").unwrap().len(), 1);

        let audit = f.audit.recent(1).unwrap();
        assert_eq!(audit[0].action, AuditAction::ConfigUpdate);
        assert_eq!(audit[0].target, "ExtA/config.yml");
        assert_eq!(audit[0].detail["size"], 3);
        assert_eq!(audit[0].detail["reload_requested"], false);
    }

    #[test]
    fn new_file_has_no_snapshot_and_gets_parent_dirs() {
        let f = fixture();
        let out = f
            .manager
            .write_file("ExtA", "lang/en/messages.yml", "hi: there", false, admin())
            .unwrap();
        assert!(out.backup_id.is_none());
        assert_eq!(out.path, "lang/en/messages.yml");
        assert!(f.manager.list_backups("ExtA").unwrap().is_empty());
        assert_eq!(
            f.manager
                .read_file("ExtA", "lang/en/messages.yml", admin())
                .unwrap()
                .content,
            "hi: there"
        );
    }

    #[test]
    fn write_with_reload_reports_reload() {
        let f = fixture();
        let out = f
            .manager
            .write_file("ExtA", "config.yml", "a=3", true, admin())
            .unwrap();
        assert!(out.reload_requested);
        assert!(out.reloaded);
    }

    #[test]
    fn save_then_rollback_round_trips() {
        let f = fixture();
        let saved = f
            .manager
            .write_file("ExtA", "config.yml", "a=2\nb=3", false, admin())
            .unwrap();
        let backup_id = saved.backup_id.unwrap();

        let out = f.manager.rollback("ExtA", backup_id, admin()).unwrap();
        assert_eq!(
            std::fs::read(f.plugins.join("ExtA/config.yml")).unwrap(),
            b"a=1"
        );

        let pre = f
            .manager
            .get_backup("ExtA", out.pre_rollback_backup_id.unwrap())
            .unwrap();
        assert_eq!(pre.content, "a=2\nb=3");
        assert_eq!(pre.created_by, "admin (pre-rollback)");
        assert_eq!(f.manager.list_backups("ExtA").unwrap().len(), 2);

        let audit = f.audit.recent(1).unwrap();
        assert_eq!(audit[0].action, AuditAction::ConfigRollback);
        assert_eq!(audit[0].detail["backup_id"], backup_id);
        assert!(audit[0].detail["backup_date"].is_string());
    }

    #[test]
    fn rollback_of_deleted_file_takes_no_pre_snapshot() {
        let f = fixture();
        let saved = f
            .manager
            .write_file("ExtA", "config.yml", "a=2", false, admin())
            .unwrap();
        std::fs::remove_file(f.plugins.join("ExtA/config.yml")).unwrap();

        let out = f
            .manager
            .rollback("ExtA", saved.backup_id.unwrap(), admin())
            .unwrap();
        assert!(out.pre_rollback_backup_id.is_none());
        assert_eq!(
            std::fs::read_to_string(f.plugins.join("ExtA/config.yml")).unwrap(),
            "a=1"
        );
    }

    #[test]
    fn traversal_is_forbidden_without_side_effects() {
        let f = fixture();
        let outside = f.plugins.parent().unwrap().join("passwd");

        for path in ["../../etc/passwd", "../passwd", "../ExtB/config.yml"] {
            let err = f
                .manager
                .write_file("ExtA", path, "pwned", false, admin())
                .unwrap_err();
            assert!(matches!(err, ConsoleError::PathOutsideExtension(_)));
            let err = f.manager.read_file("ExtA", path, admin()).unwrap_err();
            assert!(matches!(err, ConsoleError::PathOutsideExtension(_)));
        }

        assert!(!outside.exists());
        assert!(!f.plugins.join("ExtB/config.yml").exists());
        assert!(f.manager.list_backups("ExtA").unwrap().is_empty());

        let denials = f.audit.recent(100).unwrap();
        assert_eq!(denials.len(), 6);
        assert!(denials.iter().all(|r| r.action == AuditAction::AccessDenied && !r.succeeded));
        assert_eq!(denials[0].detail["reason"], "PATH_OUTSIDE_PLUGIN_DIR");
    }

    #[test]
    fn cross_owner_rollback_is_forbidden() {
        let f = fixture();
        let saved = f
            .manager
            .write_file("ExtA", "config.yml", "a=2", false, admin())
            .unwrap();
        std::fs::write(f.plugins.join("ExtB/config.yml"), "b=1").unwrap();

        let err = f
            .manager
            .rollback("ExtB", saved.backup_id.unwrap(), admin())
            .unwrap_err();
        assert!(matches!(err, ConsoleError::BackupOwnerMismatch { .. }));
        assert_eq!(
            std::fs::read_to_string(f.plugins.join("ExtB/config.yml")).unwrap(),
            "b=1"
        );
        assert_eq!(
            std::fs::read_to_string(f.plugins.join("ExtA/config.yml")).unwrap(),
            "a=2"
        );
        assert!(f.manager.list_backups("ExtB").unwrap().is_empty());
        assert_eq!(f.audit.recent(1).unwrap()[0].detail["reason"], "BACKUP_OWNER_MISMATCH");
    }

    #[test]
    fn lookup_failures() {
        let f = fixture();
        assert!(matches!(
            f.manager.read_file("Nope", "config.yml", admin()),
            Err(ConsoleError::ExtensionNotFound(_))
        ));
        assert!(matches!(
            f.manager.read_file("ExtA", "missing.yml", admin()),
            Err(ConsoleError::FileNotFound(_))
        ));
        assert!(matches!(
            f.manager.read_file("ExtA", "", admin()),
            Err(ConsoleError::MissingPath)
        ));
        assert!(matches!(
            f.manager.rollback("ExtA", 999, admin()),
            Err(ConsoleError::BackupNotFound(999))
        ));
    }

    #[test]
    fn snapshot_failure_aborts_write() {
        let f = fixture();
        // A directory at the target cannot be read for its snapshot
        std::fs::create_dir_all(f.plugins.join("ExtA/blocked.yml")).unwrap();
        let err = f
            .manager
            .write_file("ExtA", "blocked.yml", "x", false, admin())
            .unwrap_err();
        assert!(err.is_internal());
        assert!(f.manager.list_backups("ExtA").unwrap().is_empty());

        let last = &f.audit.recent(1).unwrap()[0];
        assert_eq!(last.action, AuditAction::ConfigUpdate);
        assert!(!last.succeeded);
    }

    #[test]
    fn write_failure_after_snapshot_keeps_backup() {
        let f = fixture();
        let staging = f.plugins.join("ExtA/.config.yml.tmp");
        std::fs::create_dir(&staging).unwrap();
        std::fs::write(staging.join("pinned"), "x").unwrap();

        let err = f
            .manager
            .write_file("ExtA", "config.yml", "a=2", false, admin())
            .unwrap_err();
        assert_eq!(err.code(), "IO_ERROR");

        let backups = f.manager.list_backups("ExtA").unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(f.manager.get_backup("ExtA", backups[0].id).unwrap().content, "a=1");
        assert_eq!(
            std::fs::read_to_string(f.plugins.join("ExtA/config.yml")).unwrap(),
            "a=1"
        );

        let last = &f.audit.recent(1).unwrap()[0];
        assert_eq!(last.action, AuditAction::ConfigUpdate);
        assert!(!last.succeeded);
    }

    #[test]
    fn backups_are_capped_per_file() {
        let f = fixture_with_cap(2);
        for i in 0..4 {
            f.manager
                .write_file("ExtA", "config.yml", &format!("a={}", i + 2), false, admin())
                .unwrap();
        }
        f.manager
            .write_file("ExtA", "other.yml", "x", false, admin())
            .unwrap();

        let backups = f.manager.list_backups("ExtA").unwrap();
        assert_eq!(backups.len(), 2);
        assert!(backups.iter().all(|b| b.relative_path == "config.yml"));
    }

    #[test]
    fn concurrent_writers_lose_no_snapshot() {
        let f = Arc::new(fixture());
        let handles: Vec<_> = (0..6)
            .map(|i| {
                let f = f.clone();
                std::thread::spawn(move || {
                    f.manager
                        .write_file("ExtA", "config.yml", &format!("v={}", i), false, admin())
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        // Every write saw a distinct predecessor: the original plus five of
        // the six new values.
        let backups = f.manager.list_backups("ExtA").unwrap();
        assert_eq!(backups.len(), 6);
        let mut contents: Vec<_> = backups
            .iter()
            .map(|b| f.manager.get_backup("ExtA", b.id).unwrap().content)
            .collect();
        contents.sort();
        contents.dedup();
        assert_eq!(contents.len(), 6);
        assert!(contents.contains(&"a=1".to_string()));
    }

    #[test]
    fn lists_config_files() {
        let f = fixture();
        std::fs::write(f.plugins.join("ExtA/data.db"), [0u8]).unwrap();
        assert_eq!(f.manager.list_config_files("ExtA").unwrap(), vec!["config.yml"]);
    }
}
