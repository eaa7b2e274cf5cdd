use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::{blocking, require_writer};
use crate::auth::Principal;
use crate::config_files::{Actor, ConfigFile, RollbackOutcome, SnapshotSummary, WriteOutcome};
use crate::error::ConsoleResult;
use crate::AppState;

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PathQuery {
    /// File path relative to the plugin's data directory
    #[serde(default)]
    pub path: String,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFileList {
    pub plugin: String,
    pub files: Vec<String>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SaveRequest {
    #[serde(default)]
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub reload_plugin: bool,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RollbackRequest {
    pub backup_id: i64,
}

#[utoipa::path(
    get,
    path = "/api/plugins/{name}/config",
    tag = "configs",
    security(("bearer_auth" = [])),
    params(("name" = String, Path, description = "Plugin name")),
    responses(
        (status = 200, description = "Configuration files of the plugin", body = ConfigFileList),
        (status = 404, description = "No such plugin", body = crate::error::ErrorBody)
    )
)]
pub async fn list_files(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ConsoleResult<Json<ConfigFileList>> {
    blocking(move || {
        let files = state.configs.list_config_files(&name)?;
        Ok(Json(ConfigFileList { plugin: name, files }))
    })
    .await
}

#[utoipa::path(
    get,
    path = "/api/plugins/{name}/config/file",
    tag = "configs",
    security(("bearer_auth" = [])),
    params(("name" = String, Path, description = "Plugin name"), PathQuery),
    responses(
        (status = 200, description = "File content", body = ConfigFile),
        (status = 400, description = "Missing path", body = crate::error::ErrorBody),
        (status = 403, description = "Path outside the plugin directory", body = crate::error::ErrorBody),
        (status = 404, description = "No such plugin or file", body = crate::error::ErrorBody)
    )
)]
pub async fn read_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Extension(principal): Extension<Principal>,
    query: Result<Query<PathQuery>, QueryRejection>,
) -> ConsoleResult<Json<ConfigFile>> {
    let Query(query) = query?;
    blocking(move || {
        let actor = Actor::new(principal.username(), Some(principal.source_address));
        state.configs.read_file(&name, &query.path, actor).map(Json)
    })
    .await
}

/// Save a configuration file. The previous content, if any, is kept as a
/// backup first.
#[utoipa::path(
    post,
    path = "/api/plugins/{name}/config/file",
    tag = "configs",
    security(("bearer_auth" = [])),
    params(("name" = String, Path, description = "Plugin name")),
    request_body = SaveRequest,
    responses(
        (status = 200, description = "File saved", body = WriteOutcome),
        (status = 400, description = "Invalid request", body = crate::error::ErrorBody),
        (status = 403, description = "Forbidden", body = crate::error::ErrorBody),
        (status = 404, description = "No such plugin", body = crate::error::ErrorBody)
    )
)]
pub async fn save_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<SaveRequest>, JsonRejection>,
) -> ConsoleResult<Json<WriteOutcome>> {
    require_writer(&state, &principal, &format!("{}/config/file", name))?;
    let Json(req) = payload?;
    blocking(move || {
        let actor = Actor::new(principal.username(), Some(principal.source_address));
        state
            .configs
            .write_file(&name, &req.path, &req.content, req.reload_plugin, actor)
            .map(Json)
    })
    .await
}

#[utoipa::path(
    get,
    path = "/api/plugins/{name}/config/backups",
    tag = "configs",
    security(("bearer_auth" = [])),
    params(("name" = String, Path, description = "Plugin name")),
    responses(
        (status = 200, description = "Backups, newest first", body = Vec<SnapshotSummary>),
        (status = 404, description = "No such plugin", body = crate::error::ErrorBody)
    )
)]
pub async fn list_backups(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ConsoleResult<Json<Vec<SnapshotSummary>>> {
    blocking(move || state.configs.list_backups(&name).map(Json)).await
}

/// Restore a configuration file from one of the plugin's backups.
#[utoipa::path(
    post,
    path = "/api/plugins/{name}/config/rollback",
    tag = "configs",
    security(("bearer_auth" = [])),
    params(("name" = String, Path, description = "Plugin name")),
    request_body = RollbackRequest,
    responses(
        (status = 200, description = "File restored", body = RollbackOutcome),
        (status = 403, description = "Backup belongs to another plugin", body = crate::error::ErrorBody),
        (status = 404, description = "No such plugin or backup", body = crate::error::ErrorBody)
    )
)]
pub async fn rollback(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<RollbackRequest>, JsonRejection>,
) -> ConsoleResult<Json<RollbackOutcome>> {
    require_writer(&state, &principal, &format!("{}/config/rollback", name))?;
    let Json(req) = payload?;
    blocking(move || {
        let actor = Actor::new(principal.username(), Some(principal.source_address));
        state.configs.rollback(&name, req.backup_id, actor).map(Json)
    })
    .await
}
