//! Authentication: sessions, the token authority, and the access gate that
//! every protected request passes through.

pub mod gate;
pub mod session;
pub mod token;

use std::net::IpAddr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use gate::{AccessGate, DenyReason, IpAllowList};
pub use session::SessionStore;
pub use token::TokenAuthority;

/// Role carried by the session synthesized for the static admin token.
pub const ADMIN_ROLE: &str = "admin";

/// An authenticated principal's right to act until `expires_at`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    /// Bearer secret presented by clients. Never serialized.
    #[serde(skip_serializing)]
    pub token: String,
    pub username: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
    /// `None` for the non-expiring admin session.
    pub expires_at: Option<DateTime<Utc>>,
    /// Address that created the session. Kept for audit, not enforced.
    pub source_address: Option<IpAddr>,
}

impl Session {
    /// A session is valid up to and including `expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires) if now > expires)
    }

    pub fn is_admin(&self) -> bool {
        self.role == ADMIN_ROLE
    }
}

/// Identity attached to a request once the access gate lets it through.
#[derive(Debug, Clone)]
pub struct Principal {
    pub session: Session,
    pub source_address: IpAddr,
}

impl Principal {
    pub fn username(&self) -> &str {
        &self.session.username
    }

    pub fn role(&self) -> &str {
        &self.session.role
    }
}

/// Time source for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(expires_at: Option<DateTime<Utc>>) -> Session {
        Session {
            id: "s1".into(),
            token: "t1".into(),
            username: "alice".into(),
            role: "viewer".into(),
            created_at: Utc::now(),
            expires_at,
            source_address: None,
        }
    }

    #[test]
    fn expiry_is_strictly_after_deadline() {
        let deadline = Utc::now();
        let s = session(Some(deadline));
        assert!(!s.is_expired_at(deadline));
        assert!(s.is_expired_at(deadline + Duration::milliseconds(1)));
    }

    #[test]
    fn sessions_without_deadline_never_expire() {
        let s = session(None);
        assert!(!s.is_expired_at(Utc::now() + Duration::days(365 * 100)));
    }

    #[test]
    fn token_is_not_serialized() {
        let json = serde_json::to_value(session(None)).unwrap();
        assert!(json.get("token").is_none());
        assert_eq!(json["username"], "alice");
    }
}
