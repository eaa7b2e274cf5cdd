use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};

use super::{AuditAction, AuditEntry, AuditQuery, AuditRecord};
use crate::error::ConsoleResult;
use crate::storage::{format_timestamp, open_connection, parse_timestamp};

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 10_000;

/// SQLite-backed append-only audit table.
///
/// The store only ever inserts and reads; nothing in the console updates or
/// deletes an audit row.
pub struct AuditStore {
    db: Mutex<Connection>,
}

impl AuditStore {
    /// Open (or create) the audit table in the database at `path`.
    pub fn open(path: &Path) -> ConsoleResult<Self> {
        let conn = open_connection(path)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS audit_logs (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp      TEXT    NOT NULL,
                actor          TEXT    NOT NULL,
                action         TEXT    NOT NULL,
                target         TEXT    NOT NULL,
                source_address TEXT,
                succeeded      INTEGER NOT NULL DEFAULT 1,
                detail         TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_audit_logs_timestamp ON audit_logs(timestamp);
            CREATE INDEX IF NOT EXISTS idx_audit_logs_actor     ON audit_logs(actor);
            ",
        )?;

        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Insert one entry. Returns the assigned row id.
    pub fn insert(&self, entry: &AuditEntry) -> rusqlite::Result<i64> {
        let conn = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let detail = if entry.detail.is_empty() {
            None
        } else {
            Some(serde_json::Value::Object(entry.detail.clone()).to_string())
        };

        conn.execute(
            "INSERT INTO audit_logs (timestamp, actor, action, target, source_address, succeeded, detail)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                format_timestamp(&entry.timestamp),
                entry.actor,
                entry.action.as_str(),
                entry.target,
                entry.source_address.map(|a| a.to_string()),
                entry.succeeded,
                detail,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Query with optional filters, newest first.
    pub fn query(&self, q: &AuditQuery) -> rusqlite::Result<Vec<AuditRecord>> {
        let conn = self.db.lock().unwrap_or_else(|e| e.into_inner());

        let mut sql = String::from(
            "SELECT id, timestamp, actor, action, target, source_address, succeeded, detail FROM audit_logs",
        );
        let filter = Filter::from_query(q);
        filter.append_where(&mut sql);

        let limit = q.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
        let offset = q.offset.unwrap_or(0);
        sql.push_str(&format!(
            " ORDER BY timestamp DESC, id DESC LIMIT {} OFFSET {}",
            limit, offset
        ));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(filter.params().as_slice(), |row| {
            let timestamp: String = row.get(1)?;
            let action: String = row.get(3)?;
            let detail: Option<String> = row.get(7)?;
            Ok((
                AuditRecordRow {
                    id: row.get(0)?,
                    timestamp,
                    actor: row.get(2)?,
                    action,
                    target: row.get(4)?,
                    source_address: row.get(5)?,
                    succeeded: row.get(6)?,
                },
                detail,
            ))
        })?;

        let mut results = Vec::new();
        for row in rows {
            let (row, detail) = row?;
            let Some(action) = AuditAction::parse(&row.action) else {
                log::warn!("Skipping audit row {} with unknown action '{}'", row.id, row.action);
                continue;
            };
            let detail = detail
                .and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok())
                .and_then(|v| match v {
                    serde_json::Value::Object(map) => Some(map),
                    _ => None,
                })
                .unwrap_or_default();
            results.push(AuditRecord {
                id: row.id,
                timestamp: parse_timestamp(&row.timestamp),
                actor: row.actor,
                action,
                target: row.target,
                source_address: row.source_address,
                succeeded: row.succeeded,
                detail,
            });
        }
        Ok(results)
    }

    /// Count entries matching the filters (ignores limit and offset).
    pub fn count(&self, q: &AuditQuery) -> rusqlite::Result<usize> {
        let conn = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let mut sql = String::from("SELECT COUNT(*) FROM audit_logs");
        let filter = Filter::from_query(q);
        filter.append_where(&mut sql);
        conn.query_row(&sql, filter.params().as_slice(), |row| row.get(0))
    }

    #[cfg(test)]
    pub(crate) fn break_for_tests(&self) {
        let conn = self.db.lock().unwrap();
        conn.execute_batch("DROP TABLE audit_logs;").unwrap();
    }
}

struct AuditRecordRow {
    id: i64,
    timestamp: String,
    actor: String,
    action: String,
    target: String,
    source_address: Option<String>,
    succeeded: bool,
}

/// WHERE clause plus positional parameters built from an [`AuditQuery`].
struct Filter {
    conditions: Vec<String>,
    values: Vec<Box<dyn rusqlite::types::ToSql>>,
}

impl Filter {
    fn from_query(q: &AuditQuery) -> Self {
        let mut filter = Filter {
            conditions: Vec::new(),
            values: Vec::new(),
        };
        if let Some(ref actor) = q.actor {
            filter.push("actor", Box::new(actor.clone()));
        }
        if let Some(ref action) = q.action {
            filter.push("action", Box::new(action.clone()));
        }
        if let Some(ref target) = q.target {
            filter.push("target", Box::new(target.clone()));
        }
        if let Some(succeeded) = q.succeeded {
            filter.push("succeeded", Box::new(succeeded));
        }
        filter
    }

    fn push(&mut self, column: &str, value: Box<dyn rusqlite::types::ToSql>) {
        self.conditions
            .push(format!("{} = ?{}", column, self.values.len() + 1));
        self.values.push(value);
    }

    fn append_where(&self, sql: &mut String) {
        if !self.conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.conditions.join(" AND "));
        }
    }

    fn params(&self) -> Vec<&dyn rusqlite::types::ToSql> {
        self.values.iter().map(|v| v.as_ref()).collect()
    }
}
