use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::error::ConsoleResult;
use crate::storage::{format_timestamp, open_connection, parse_timestamp};

/// Immutable capture of one configuration file's content.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSnapshot {
    pub id: i64,
    pub owner_name: String,
    pub relative_path: String,
    pub content: String,
    pub captured_at: DateTime<Utc>,
    pub created_by: String,
}

/// Backup listing entry. Content is left out so listing a plugin with
/// many large files stays cheap.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
    pub id: i64,
    pub owner_name: String,
    pub relative_path: String,
    pub captured_at: DateTime<Utc>,
    pub created_by: String,
    pub size: usize,
}

/// SQLite table of config snapshots. Rows are inserted and, under the
/// retention cap, deleted oldest first; never updated.
pub struct BackupStore {
    db: Mutex<Connection>,
}

impl BackupStore {
    pub fn open(path: &Path) -> ConsoleResult<Self> {
        let conn = open_connection(path)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS config_backups (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                plugin_name TEXT    NOT NULL,
                path        TEXT    NOT NULL,
                timestamp   TEXT    NOT NULL,
                content     TEXT    NOT NULL,
                created_by  TEXT    NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_config_backups_owner
                ON config_backups(plugin_name, path);
            ",
        )?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Persist a snapshot captured now and return it with its assigned id.
    pub fn insert(
        &self,
        owner: &str,
        relative_path: &str,
        content: &str,
        created_by: &str,
    ) -> ConsoleResult<ConfigSnapshot> {
        let captured_at = Utc::now();
        let conn = self.db.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO config_backups (plugin_name, path, timestamp, content, created_by)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                owner,
                relative_path,
                format_timestamp(&captured_at),
                content,
                created_by
            ],
        )?;
        Ok(ConfigSnapshot {
            id: conn.last_insert_rowid(),
            owner_name: owner.to_string(),
            relative_path: relative_path.to_string(),
            content: content.to_string(),
            captured_at,
            created_by: created_by.to_string(),
        })
    }

    pub fn get(&self, id: i64) -> ConsoleResult<Option<ConfigSnapshot>> {
        let conn = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let snapshot = conn
            .query_row(
                "SELECT id, plugin_name, path, timestamp, content, created_by
                 FROM config_backups WHERE id = ?1",
                params![id],
                row_to_snapshot,
            )
            .optional()?;
        Ok(snapshot)
    }

    /// All snapshots of one plugin, newest first.
    pub fn list_by_owner(&self, owner: &str) -> ConsoleResult<Vec<SnapshotSummary>> {
        let conn = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT id, plugin_name, path, timestamp, created_by, length(CAST(content AS BLOB))
             FROM config_backups WHERE plugin_name = ?1
             ORDER BY timestamp DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![owner], |row| {
            let timestamp: String = row.get(3)?;
            let size: i64 = row.get(5)?;
            Ok(SnapshotSummary {
                id: row.get(0)?,
                owner_name: row.get(1)?,
                relative_path: row.get(2)?,
                captured_at: parse_timestamp(&timestamp),
                created_by: row.get(4)?,
                size: usize::try_from(size).unwrap_or(0),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    #[cfg(test)]
    pub(crate) fn count_for(&self, owner: &str, relative_path: &str) -> ConsoleResult<usize> {
        let conn = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM config_backups WHERE plugin_name = ?1 AND path = ?2",
            params![owner, relative_path],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Keep only the newest `keep` snapshots of one file. Returns how many
    /// were deleted. `keep == 0` disables pruning.
    pub fn prune(&self, owner: &str, relative_path: &str, keep: usize) -> ConsoleResult<usize> {
        if keep == 0 {
            return Ok(0);
        }
        let keep = i64::try_from(keep).unwrap_or(i64::MAX);
        let conn = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let removed = conn.execute(
            "DELETE FROM config_backups
             WHERE plugin_name = ?1 AND path = ?2 AND id NOT IN (
                 SELECT id FROM config_backups
                 WHERE plugin_name = ?1 AND path = ?2
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?3
             )",
            params![owner, relative_path, keep],
        )?;
        Ok(removed)
    }
}

fn row_to_snapshot(row: &Row<'_>) -> rusqlite::Result<ConfigSnapshot> {
    let timestamp: String = row.get(3)?;
    Ok(ConfigSnapshot {
        id: row.get(0)?,
        owner_name: row.get(1)?,
        relative_path: row.get(2)?,
        captured_at: parse_timestamp(&timestamp),
        content: row.get(4)?,
        created_by: row.get(5)?,
    })
}
