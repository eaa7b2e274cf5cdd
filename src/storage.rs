use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;

use crate::error::ConsoleResult;

/// Open (or create) the console database at `path`.
///
/// The audit trail and the backup store each hold their own connection to
/// the same file; WAL mode plus a busy timeout lets them write side by side.
pub fn open_connection(path: &Path) -> ConsoleResult<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

/// Timestamps are stored as fixed-width RFC 3339 strings so that lexical
/// order in SQL matches chronological order.
pub fn format_timestamp(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&chrono::Utc))
        .unwrap_or_else(|e| {
            log::warn!("Unparseable stored timestamp '{}': {}", raw, e);
            chrono::DateTime::<chrono::Utc>::UNIX_EPOCH
        })
}
