use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{blocking, require_writer};
use crate::auth::Principal;
use crate::error::{ConsoleError, ConsoleResult};
use crate::extensions::{perform_action, ActionOutcome, ExtensionAction, ExtensionInfo};
use crate::AppState;

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PluginDetail {
    pub name: String,
    pub enabled: bool,
    pub config_files: Vec<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct ActionRequest {
    /// One of `enable`, `disable`, `reload`.
    pub action: String,
}

#[utoipa::path(
    get,
    path = "/api/plugins",
    tag = "plugins",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Installed plugins", body = Vec<ExtensionInfo>),
        (status = 401, description = "Unauthorized", body = crate::error::ErrorBody)
    )
)]
pub async fn list_plugins(State(state): State<AppState>) -> ConsoleResult<Json<Vec<ExtensionInfo>>> {
    blocking(move || Ok(Json(state.registry.list()))).await
}

#[utoipa::path(
    get,
    path = "/api/plugins/{name}",
    tag = "plugins",
    security(("bearer_auth" = [])),
    params(("name" = String, Path, description = "Plugin name")),
    responses(
        (status = 200, description = "Plugin detail", body = PluginDetail),
        (status = 404, description = "No such plugin", body = crate::error::ErrorBody)
    )
)]
pub async fn get_plugin(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ConsoleResult<Json<PluginDetail>> {
    blocking(move || {
        let info = state
            .registry
            .get(&name)
            .ok_or_else(|| ConsoleError::ExtensionNotFound(name.clone()))?;
        let config_files = state.configs.list_config_files(&name)?;
        Ok(Json(PluginDetail {
            name: info.name,
            enabled: info.enabled,
            config_files,
        }))
    })
    .await
}

/// Enable, disable or reload a plugin.
#[utoipa::path(
    post,
    path = "/api/plugins/{name}/action",
    tag = "plugins",
    security(("bearer_auth" = [])),
    params(("name" = String, Path, description = "Plugin name")),
    request_body = ActionRequest,
    responses(
        (status = 200, description = "Action outcome", body = ActionOutcome),
        (status = 400, description = "Unknown action", body = crate::error::ErrorBody),
        (status = 403, description = "Insufficient role", body = crate::error::ErrorBody),
        (status = 404, description = "No such plugin", body = crate::error::ErrorBody)
    )
)]
pub async fn plugin_action(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<ActionRequest>, JsonRejection>,
) -> ConsoleResult<Json<ActionOutcome>> {
    require_writer(&state, &principal, &format!("{}/action", name))?;
    let Json(req) = payload?;
    let action = ExtensionAction::parse(&req.action)?;

    blocking(move || {
        perform_action(
            state.registry.as_ref(),
            &state.audit,
            &name,
            action,
            principal.username(),
            Some(principal.source_address),
        )
        .map(Json)
    })
    .await
}
