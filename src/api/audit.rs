use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Extension, Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use super::{blocking, require_admin};
use crate::audit::{AuditQuery, AuditRecord};
use crate::auth::Principal;
use crate::error::ConsoleResult;
use crate::AppState;

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditPage {
    pub entries: Vec<AuditRecord>,
    /// Matching entries ignoring limit and offset.
    pub total: usize,
}

/// Query the audit trail, newest first. Admin only.
#[utoipa::path(
    get,
    path = "/api/audit",
    tag = "audit",
    security(("bearer_auth" = [])),
    params(AuditQuery),
    responses(
        (status = 200, description = "Audit entries", body = AuditPage),
        (status = 403, description = "Not an admin", body = crate::error::ErrorBody)
    )
)]
pub async fn query_audit(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    query: Result<Query<AuditQuery>, QueryRejection>,
) -> ConsoleResult<Json<AuditPage>> {
    require_admin(&state, &principal, "/api/audit")?;
    let Query(query) = query?;
    blocking(move || {
        let entries = state.audit.query(&query)?;
        let total = state.audit.count(&query)?;
        Ok(Json(AuditPage { entries, total }))
    })
    .await
}
