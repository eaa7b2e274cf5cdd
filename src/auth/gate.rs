use std::net::IpAddr;
use std::sync::Arc;

use axum::http::StatusCode;

use super::{Session, TokenAuthority};
use crate::audit::{AuditAction, AuditEntry, AuditTrail, ANONYMOUS_ACTOR};

/// Why the gate turned a request away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    IpNotAllowed,
    MissingToken,
    InvalidToken,
}

impl DenyReason {
    pub fn code(&self) -> &'static str {
        match self {
            DenyReason::IpNotAllowed => "IP_NOT_ALLOWED",
            DenyReason::MissingToken => "MISSING_TOKEN",
            DenyReason::InvalidToken => "INVALID_TOKEN",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            DenyReason::IpNotAllowed => StatusCode::FORBIDDEN,
            DenyReason::MissingToken | DenyReason::InvalidToken => StatusCode::UNAUTHORIZED,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            DenyReason::IpNotAllowed => "Access denied from this IP address",
            DenyReason::MissingToken => "Missing or invalid Authorization header",
            DenyReason::InvalidToken => "Invalid or expired token",
        }
    }
}

/// Source addresses allowed through the gate. Empty permits everyone.
#[derive(Debug, Clone, Default)]
pub struct IpAllowList {
    entries: Vec<IpAddr>,
}

impl IpAllowList {
    pub fn new(entries: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            entries: entries.into_iter().map(|ip| ip.to_canonical()).collect(),
        }
    }

    pub fn permits(&self, addr: IpAddr) -> bool {
        self.entries.is_empty() || self.entries.contains(&addr.to_canonical())
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
/// The scheme name is case-insensitive (RFC 7235 §2.1); the token may be empty.
pub fn bearer_token(header: &str) -> Option<&str> {
    const SCHEME: &str = "bearer ";
    match header.get(..SCHEME.len()) {
        Some(scheme) if scheme.eq_ignore_ascii_case(SCHEME) => Some(header[SCHEME.len()..].trim()),
        _ => None,
    }
}

/// The single authorization checkpoint in front of every protected route.
///
/// Checks run in a fixed order: source address, then header shape, then the
/// credential itself, so a blocked address learns nothing about its token.
/// Each denial is audited before the caller gets to respond; success is not.
pub struct AccessGate {
    allow_list: IpAllowList,
    authority: Arc<TokenAuthority>,
    audit: AuditTrail,
}

impl AccessGate {
    pub fn new(allow_list: IpAllowList, authority: Arc<TokenAuthority>, audit: AuditTrail) -> Self {
        Self {
            allow_list,
            authority,
            audit,
        }
    }

    pub fn check(
        &self,
        source: IpAddr,
        path: &str,
        authorization: Option<&str>,
    ) -> Result<Session, DenyReason> {
        if !self.allow_list.permits(source) {
            return Err(self.deny(source, path, DenyReason::IpNotAllowed));
        }

        let Some(token) = authorization.and_then(bearer_token) else {
            return Err(self.deny(source, path, DenyReason::MissingToken));
        };

        match self.authority.validate(token) {
            Some(session) => Ok(session),
            None => Err(self.deny(source, path, DenyReason::InvalidToken)),
        }
    }

    fn deny(&self, source: IpAddr, path: &str, reason: DenyReason) -> DenyReason {
        self.audit.record(
            AuditEntry::new(ANONYMOUS_ACTOR, AuditAction::AccessDenied, path)
                .from_address(Some(source))
                .failed()
                .with_detail("reason", reason.code())
                .with_detail("path", path),
        );
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::store::AuditStore;
    use crate::auth::{SessionStore, SystemClock};

    const ADMIN: &str = "gate-test-admin-token";

    fn gate(allowed: &[IpAddr]) -> (tempfile::TempDir, AuditTrail, AccessGate) {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditTrail::new(Arc::new(
            AuditStore::open(&dir.path().join("console.sqlite")).unwrap(),
        ));
        let authority = Arc::new(TokenAuthority::new(
            ADMIN,
            SessionStore::new(Arc::new(SystemClock)),
        ));
        let gate = AccessGate::new(
            IpAllowList::new(allowed.iter().copied()),
            authority,
            audit.clone(),
        );
        (dir, audit, gate)
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn bearer_parsing() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Bearer "), Some(""));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer"), None);
        assert_eq!(bearer_token(""), None);
    }

    #[test]
    fn empty_allow_list_permits_all() {
        let list = IpAllowList::default();
        assert!(list.permits(ip("203.0.113.7")));
    }

    #[test]
    fn mapped_ipv6_matches_ipv4_entry() {
        let list = IpAllowList::new([ip("10.0.0.5")]);
        assert!(list.permits(ip("::ffff:10.0.0.5")));
        assert!(!list.permits(ip("10.0.0.9")));
    }

    #[test]
    fn blocked_ip_is_denied_before_token_check() {
        let (_dir, audit, gate) = gate(&[ip("10.0.0.5")]);
        let bearer = format!("Bearer {}", ADMIN);
        let err = gate
            .check(ip("10.0.0.9"), "/api/plugins", Some(&bearer))
            .unwrap_err();
        assert_eq!(err, DenyReason::IpNotAllowed);

        let rows = audit.recent(10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].actor, ANONYMOUS_ACTOR);
        assert_eq!(rows[0].detail["reason"], "IP_NOT_ALLOWED");
        assert_eq!(rows[0].detail["path"], "/api/plugins");
        assert_eq!(rows[0].source_address.as_deref(), Some("10.0.0.9"));
    }

    #[test]
    fn missing_and_malformed_headers() {
        let (_dir, audit, gate) = gate(&[]);
        let source = ip("127.0.0.1");
        assert_eq!(
            gate.check(source, "/api/server", None).unwrap_err(),
            DenyReason::MissingToken
        );
        assert_eq!(
            gate.check(source, "/api/server", Some("Token abc")).unwrap_err(),
            DenyReason::MissingToken
        );
        assert_eq!(
            gate.check(source, "/api/server", Some("Bearer ")).unwrap_err(),
            DenyReason::InvalidToken
        );
        assert_eq!(audit.recent(10).unwrap().len(), 3);
    }

    #[test]
    fn success_is_not_audited() {
        let (_dir, audit, gate) = gate(&[ip("10.0.0.5")]);
        let session = gate
            .check(ip("10.0.0.5"), "/api/plugins", Some(&format!("Bearer {}", ADMIN)))
            .unwrap();
        assert!(session.is_admin());
        assert!(audit.recent(10).unwrap().is_empty());
    }
}
