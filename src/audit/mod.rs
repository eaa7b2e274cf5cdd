//! Security audit trail.
//!
//! Every access denial and every mutation of a plugin or its configuration
//! is recorded here as "who did what to which target, from where, with what
//! outcome". Entries are written synchronously so that a denial is durable
//! before its response leaves the server.
//!
//! Recording is best-effort: a storage failure is logged and swallowed so
//! the audited operation itself never fails because of the audit write.

pub mod store;

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConsoleResult;
use store::AuditStore;

/// Actor recorded for requests that never authenticated.
pub const ANONYMOUS_ACTOR: &str = "anonymous";

/// Closed vocabulary of audited actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    AccessDenied,
    ConfigUpdate,
    ConfigRollback,
    PluginEnable,
    PluginDisable,
    PluginReload,
    SessionCreate,
    SessionInvalidate,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::AccessDenied => "ACCESS_DENIED",
            AuditAction::ConfigUpdate => "CONFIG_UPDATE",
            AuditAction::ConfigRollback => "CONFIG_ROLLBACK",
            AuditAction::PluginEnable => "PLUGIN_ENABLE",
            AuditAction::PluginDisable => "PLUGIN_DISABLE",
            AuditAction::PluginReload => "PLUGIN_RELOAD",
            AuditAction::SessionCreate => "SESSION_CREATE",
            AuditAction::SessionInvalidate => "SESSION_INVALIDATE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        const ALL: [AuditAction; 8] = [
            AuditAction::AccessDenied,
            AuditAction::ConfigUpdate,
            AuditAction::ConfigRollback,
            AuditAction::PluginEnable,
            AuditAction::PluginDisable,
            AuditAction::PluginReload,
            AuditAction::SessionCreate,
            AuditAction::SessionInvalidate,
        ];
        ALL.into_iter().find(|a| a.as_str() == raw)
    }
}

/// An audit entry about to be recorded. The timestamp is taken when the
/// entry is built, i.e. when the outcome of the action is decided.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: AuditAction,
    pub target: String,
    pub source_address: Option<IpAddr>,
    pub succeeded: bool,
    pub detail: Map<String, Value>,
}

impl AuditEntry {
    pub fn new(actor: impl Into<String>, action: AuditAction, target: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            actor: actor.into(),
            action,
            target: target.into(),
            source_address: None,
            succeeded: true,
            detail: Map::new(),
        }
    }

    pub fn from_address(mut self, addr: Option<IpAddr>) -> Self {
        self.source_address = addr;
        self
    }

    pub fn failed(mut self) -> Self {
        self.succeeded = false;
        self
    }

    pub fn succeeded(mut self, ok: bool) -> Self {
        self.succeeded = ok;
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.detail.insert(key.to_string(), value.into());
        self
    }
}

/// A persisted audit entry.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: AuditAction,
    pub target: String,
    pub source_address: Option<String>,
    pub succeeded: bool,
    #[schema(value_type = Object)]
    pub detail: Map<String, Value>,
}

/// Filters for audit queries. Results are always newest first.
#[derive(Debug, Default, Clone, Deserialize, utoipa::IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct AuditQuery {
    pub actor: Option<String>,
    pub action: Option<String>,
    pub target: Option<String>,
    pub succeeded: Option<bool>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Cheaply cloneable handle shared by every component that audits.
#[derive(Clone)]
pub struct AuditTrail {
    store: Arc<AuditStore>,
}

impl AuditTrail {
    pub fn new(store: Arc<AuditStore>) -> Self {
        Self { store }
    }

    /// Persist `entry`. Never fails the caller.
    pub fn record(&self, entry: AuditEntry) {
        let addr = entry
            .source_address
            .map(|a| a.to_string())
            .unwrap_or_else(|| "-".into());
        if entry.succeeded {
            log::info!(
                "AUDIT actor={} action={} target={} addr={}",
                entry.actor,
                entry.action.as_str(),
                entry.target,
                addr
            );
        } else {
            log::warn!(
                "AUDIT FAILED actor={} action={} target={} addr={} detail={}",
                entry.actor,
                entry.action.as_str(),
                entry.target,
                addr,
                Value::Object(entry.detail.clone())
            );
        }

        if let Err(e) = self.store.insert(&entry) {
            log::error!(
                "Audit write failed for action={} target={}: {}",
                entry.action.as_str(),
                entry.target,
                e
            );
        }
    }

    pub fn query(&self, q: &AuditQuery) -> ConsoleResult<Vec<AuditRecord>> {
        Ok(self.store.query(q)?)
    }

    pub fn count(&self, q: &AuditQuery) -> ConsoleResult<usize> {
        Ok(self.store.count(q)?)
    }

    pub fn recent(&self, limit: usize) -> ConsoleResult<Vec<AuditRecord>> {
        self.query(&AuditQuery {
            limit: Some(limit),
            ..Default::default()
        })
    }

    pub fn by_actor(&self, actor: &str, limit: usize) -> ConsoleResult<Vec<AuditRecord>> {
        self.query(&AuditQuery {
            actor: Some(actor.to_string()),
            limit: Some(limit),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trail() -> (tempfile::TempDir, AuditTrail) {
        let dir = tempfile::tempdir().unwrap();
        let store = AuditStore::open(&dir.path().join("audit.sqlite")).unwrap();
        (dir, AuditTrail::new(Arc::new(store)))
    }

    #[test]
    fn action_names_round_trip() {
        for action in [
            AuditAction::AccessDenied,
            AuditAction::ConfigRollback,
            AuditAction::PluginReload,
            AuditAction::SessionInvalidate,
        ] {
            assert_eq!(AuditAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(AuditAction::parse("PLUGIN_EXPLODE"), None);
    }

    #[test]
    fn recent_and_by_actor() {
        let (_dir, trail) = trail();
        trail.record(AuditEntry::new("alice", AuditAction::ConfigUpdate, "ExtA/config.yml"));
        trail.record(
            AuditEntry::new(ANONYMOUS_ACTOR, AuditAction::AccessDenied, "/api/plugins")
                .failed()
                .with_detail("reason", "MISSING_TOKEN"),
        );
        trail.record(AuditEntry::new("alice", AuditAction::PluginReload, "ExtA"));

        let recent = trail.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].action, AuditAction::PluginReload);
        assert_eq!(recent[1].actor, ANONYMOUS_ACTOR);
        assert!(!recent[1].succeeded);
        assert_eq!(recent[1].detail["reason"], "MISSING_TOKEN");

        let alice = trail.by_actor("alice", 10).unwrap();
        assert_eq!(alice.len(), 2);
        assert!(alice.iter().all(|r| r.actor == "alice"));
    }

    #[test]
    fn record_swallows_storage_failure() {
        let (_dir, trail) = trail();
        trail.store.break_for_tests();
        trail.record(AuditEntry::new("bob", AuditAction::ConfigUpdate, "ExtB/a.yml"));
    }
}
