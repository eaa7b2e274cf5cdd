use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use subtle::ConstantTimeEq;
use tokio::task::JoinHandle;
use tokio::time::interval;

use super::{Session, SessionStore, ADMIN_ROLE};

/// Prefix of issued session tokens, to tell them apart from the admin token in logs.
const TOKEN_PREFIX: &str = "pcs_";

/// Random Base62 characters after the prefix (~286 bits).
const TOKEN_RANDOM_LEN: usize = 48;

const BASE62_CHARS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

fn generate_token() -> String {
    let mut rng = rand::rng();
    let random_part: String = (0..TOKEN_RANDOM_LEN)
        .map(|_| BASE62_CHARS[rng.random_range(0..BASE62_CHARS.len())] as char)
        .collect();
    format!("{}{}", TOKEN_PREFIX, random_part)
}

/// Validates bearer credentials and issues sessions.
///
/// Two kinds of credential are accepted: the static admin token from the
/// config file, and tokens minted by [`TokenAuthority::create_session`].
/// Presenting the admin token yields a fresh, unstored, non-expiring admin
/// session every time.
pub struct TokenAuthority {
    admin_token: String,
    sessions: SessionStore,
}

impl TokenAuthority {
    pub fn new(admin_token: impl Into<String>, sessions: SessionStore) -> Self {
        Self {
            admin_token: admin_token.into(),
            sessions,
        }
    }

    /// Resolve a presented token to a session. Never fails loudly: anything
    /// unrecognised, expired or empty is simply `None`.
    pub fn validate(&self, presented: &str) -> Option<Session> {
        if presented.is_empty() {
            return None;
        }

        if self.is_admin_token(presented) {
            return Some(Session {
                id: format!("admin-{}", uuid::Uuid::new_v4()),
                token: presented.to_string(),
                username: ADMIN_ROLE.to_string(),
                role: ADMIN_ROLE.to_string(),
                created_at: self.sessions.now(),
                expires_at: None,
                source_address: None,
            });
        }

        self.sessions.get(presented)
    }

    fn is_admin_token(&self, presented: &str) -> bool {
        presented
            .as_bytes()
            .ct_eq(self.admin_token.as_bytes())
            .into()
    }

    pub fn create_session(&self, username: &str, role: &str, duration_hours: u32) -> Session {
        self.create_session_from(username, role, duration_hours, None)
    }

    /// Mint and store a session valid for `duration_hours` from now.
    pub fn create_session_from(
        &self,
        username: &str,
        role: &str,
        duration_hours: u32,
        source_address: Option<IpAddr>,
    ) -> Session {
        let now = self.sessions.now();
        // Durations past chrono's range saturate at the latest representable instant.
        let expires_at = chrono::Duration::try_hours(i64::from(duration_hours))
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            token: generate_token(),
            username: username.to_string(),
            role: role.to_string(),
            created_at: now,
            expires_at: Some(expires_at),
            source_address,
        };
        self.sessions.put(session.token.clone(), session.clone());
        log::info!(
            "Created new session for user: {} with role: {} ({}h)",
            username,
            role,
            duration_hours
        );
        session
    }

    /// Drop a stored session. Returns whether anything was removed; unknown
    /// tokens and the admin token leave the store untouched.
    pub fn invalidate(&self, token: &str) -> bool {
        match self.sessions.remove(token) {
            Some(removed) => {
                log::info!("Invalidated session for user: {}", removed.username);
                true
            }
            None => false,
        }
    }

    /// Live stored sessions; the synthesized admin session is never counted.
    pub fn active_session_count(&self) -> usize {
        self.sessions.live_count()
    }

    pub fn sweep_expired(&self) -> usize {
        let removed = self.sessions.sweep_expired();
        if removed > 0 {
            log::info!("Cleaned up {} expired sessions", removed);
        }
        removed
    }
}

/// Periodically sweep expired sessions until the task is aborted.
pub fn spawn_sweeper(authority: Arc<TokenAuthority>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(every);
        // Consume the first immediate tick
        tick.tick().await;
        loop {
            tick.tick().await;
            authority.sweep_expired();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ManualClock;

    const ADMIN: &str = "correct-horse-battery-staple";

    fn authority() -> (Arc<ManualClock>, TokenAuthority) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = SessionStore::new(clock.clone());
        (clock, TokenAuthority::new(ADMIN, store))
    }

    #[test]
    fn admin_token_yields_fresh_admin_session() {
        let (_clock, auth) = authority();
        let a = auth.validate(ADMIN).unwrap();
        let b = auth.validate(ADMIN).unwrap();

        assert_eq!(a.role, ADMIN_ROLE);
        assert_eq!(a.username, "admin");
        assert!(a.expires_at.is_none());
        assert_ne!(a.id, b.id, "each validation synthesizes a new session");
        assert_eq!(auth.active_session_count(), 0, "admin session is never stored");
    }

    #[test]
    fn near_misses_of_admin_token_are_rejected() {
        let (_clock, auth) = authority();
        assert!(auth.validate("").is_none());
        assert!(auth.validate("correct-horse-battery-stapl").is_none());
        assert!(auth.validate("correct-horse-battery-staple ").is_none());
        assert!(auth.validate("CORRECT-HORSE-BATTERY-STAPLE").is_none());
    }

    #[test]
    fn created_session_validates_until_expiry() {
        let (clock, auth) = authority();
        let session = auth.create_session("ops", "operator", 2);
        assert!(session.token.starts_with(TOKEN_PREFIX));
        assert_ne!(session.token, session.id);

        let found = auth.validate(&session.token).unwrap();
        assert_eq!(found.username, "ops");
        assert_eq!(found.role, "operator");
        assert_eq!(auth.active_session_count(), 1);

        clock.advance(chrono::Duration::hours(2) + chrono::Duration::seconds(1));
        assert!(auth.validate(&session.token).is_none());
        assert_eq!(auth.sessions.len(), 0, "expired entry removed on lookup");
    }

    #[test]
    fn invalidate_twice_is_a_no_op() {
        let (_clock, auth) = authority();
        let session = auth.create_session("ops", "operator", 1);
        assert!(auth.invalidate(&session.token));
        assert!(!auth.invalidate(&session.token));
        assert!(auth.validate(&session.token).is_none());
    }

    #[test]
    fn invalidating_admin_token_changes_nothing() {
        let (_clock, auth) = authority();
        assert!(!auth.invalidate(ADMIN));
        assert!(auth.validate(ADMIN).is_some());
    }

    #[test]
    fn huge_duration_saturates_instead_of_overflowing() {
        let (clock, auth) = authority();
        let session = auth.create_session("ops", "operator", u32::MAX);
        assert_eq!(session.expires_at, Some(DateTime::<Utc>::MAX_UTC));

        clock.advance(chrono::Duration::days(365 * 1000));
        assert!(auth.validate(&session.token).is_some());
    }

    #[test]
    fn sweep_counts_only_expired() {
        let (clock, auth) = authority();
        auth.create_session("a", "viewer", 1);
        auth.create_session("b", "viewer", 3);
        clock.advance(chrono::Duration::hours(2));

        assert_eq!(auth.active_session_count(), 1);
        assert_eq!(auth.sweep_expired(), 1);
        assert_eq!(auth.sweep_expired(), 0);
    }

    #[test]
    fn tokens_are_unique() {
        let (_clock, auth) = authority();
        let t1 = auth.create_session("a", "viewer", 1).token;
        let t2 = auth.create_session("a", "viewer", 1).token;
        assert_ne!(t1, t2);
    }

    #[tokio::test]
    async fn sweeper_runs_on_interval() {
        let (clock, auth) = authority();
        let auth = Arc::new(auth);
        auth.create_session("a", "viewer", 1);
        clock.advance(chrono::Duration::hours(2));

        let handle = spawn_sweeper(auth.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.abort();

        assert_eq!(auth.sessions.len(), 0);
    }
}
