use axum::{extract::rejection::JsonRejection, extract::State, Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{blocking, require_admin};
use crate::audit::{AuditAction, AuditEntry};
use crate::auth::{Principal, Session};
use crate::error::{ConsoleError, ConsoleResult};
use crate::AppState;

/// Longest session the console will issue (30 days).
const MAX_SESSION_HOURS: u32 = 24 * 30;

fn default_duration_hours() -> u32 {
    24
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub username: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
    /// Absent for the admin token's non-expiring session.
    pub expires_at: Option<DateTime<Utc>>,
    pub source_address: Option<String>,
    pub active_sessions: usize,
}

impl SessionInfo {
    fn from_session(session: &Session, active_sessions: usize) -> Self {
        Self {
            id: session.id.clone(),
            username: session.username.clone(),
            role: session.role.clone(),
            created_at: session.created_at,
            expires_at: session.expires_at,
            source_address: session.source_address.map(|a| a.to_string()),
            active_sessions,
        }
    }
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub username: String,
    pub role: String,
    #[serde(default = "default_duration_hours")]
    pub duration_hours: u32,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssuedSession {
    /// Bearer secret. Shown once; the console never returns it again.
    pub token: String,
    pub session: SessionInfo,
}

#[utoipa::path(
    get,
    path = "/api/session",
    tag = "sessions",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "The calling principal", body = SessionInfo),
        (status = 401, description = "Unauthorized", body = crate::error::ErrorBody)
    )
)]
pub async fn current_session(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Json<SessionInfo> {
    let active = state.authority.active_session_count();
    Json(SessionInfo::from_session(&principal.session, active))
}

/// Issue a session token for a named user. Admin only.
#[utoipa::path(
    post,
    path = "/api/sessions",
    tag = "sessions",
    security(("bearer_auth" = [])),
    request_body = CreateSessionRequest,
    responses(
        (status = 200, description = "Session issued", body = IssuedSession),
        (status = 400, description = "Invalid request", body = crate::error::ErrorBody),
        (status = 403, description = "Not an admin", body = crate::error::ErrorBody)
    )
)]
pub async fn create_session(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> ConsoleResult<Json<IssuedSession>> {
    require_admin(&state, &principal, "/api/sessions")?;
    let Json(req) = payload?;

    let username = req.username.trim().to_string();
    let role = req.role.trim().to_string();
    if username.is_empty() || role.is_empty() {
        return Err(ConsoleError::InvalidRequest(
            "username and role are required".into(),
        ));
    }
    if req.duration_hours == 0 || req.duration_hours > MAX_SESSION_HOURS {
        return Err(ConsoleError::InvalidRequest(format!(
            "durationHours must be between 1 and {}",
            MAX_SESSION_HOURS
        )));
    }

    blocking(move || {
        let session = state.authority.create_session_from(
            &username,
            &role,
            req.duration_hours,
            Some(principal.source_address),
        );
        state.audit.record(
            AuditEntry::new(principal.username(), AuditAction::SessionCreate, &username)
                .from_address(Some(principal.source_address))
                .with_detail("session_id", session.id.as_str())
                .with_detail("role", role.as_str())
                .with_detail("duration_hours", req.duration_hours),
        );
        let active = state.authority.active_session_count();
        Ok(Json(IssuedSession {
            token: session.token.clone(),
            session: SessionInfo::from_session(&session, active),
        }))
    })
    .await
}

/// Invalidate the token used for this request. The admin token cannot be
/// revoked this way; the call is then a no-op.
#[utoipa::path(
    delete,
    path = "/api/session",
    tag = "sessions",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Session ended, or `success: false` for the admin token"),
        (status = 401, description = "Unauthorized", body = crate::error::ErrorBody)
    )
)]
pub async fn end_session(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ConsoleResult<Json<serde_json::Value>> {
    blocking(move || {
        let removed = state.authority.invalidate(&principal.session.token);
        state.audit.record(
            AuditEntry::new(
                principal.username(),
                AuditAction::SessionInvalidate,
                principal.session.id.as_str(),
            )
            .from_address(Some(principal.source_address))
            .succeeded(removed),
        );
        let message = if removed {
            "Session ended"
        } else {
            "The admin token cannot be revoked"
        };
        Ok(Json(serde_json::json!({
            "success": removed,
            "message": message,
        })))
    })
    .await
}
