pub mod audit;
pub mod configs;
pub mod health;
mod middleware;
pub mod plugins;
pub mod sessions;

use std::net::SocketAddr;

use axum::{extract::DefaultBodyLimit, middleware as axum_middleware, routing, Json, Router};
use tower_http::cors::{Any, CorsLayer};
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::audit::{AuditAction, AuditEntry};
use crate::auth::Principal;
use crate::error::{ConsoleError, ConsoleResult};
use crate::AppState;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Plugin Console API",
        description = "Remote administration of game-server plugins and their configuration files. All endpoints except health and this document require a Bearer token.",
        version = "0.3.0",
        license(name = "MIT")
    ),
    paths(
        health::health,
        sessions::current_session,
        sessions::create_session,
        sessions::end_session,
        plugins::list_plugins,
        plugins::get_plugin,
        plugins::plugin_action,
        configs::list_files,
        configs::read_file,
        configs::save_file,
        configs::list_backups,
        configs::rollback,
        audit::query_audit,
    ),
    components(schemas(
        crate::error::ErrorBody,
        health::HealthStatus,
        sessions::SessionInfo,
        sessions::CreateSessionRequest,
        sessions::IssuedSession,
        crate::extensions::ExtensionInfo,
        crate::extensions::ActionOutcome,
        plugins::PluginDetail,
        plugins::ActionRequest,
        configs::ConfigFileList,
        configs::SaveRequest,
        configs::RollbackRequest,
        crate::config_files::ConfigFile,
        crate::config_files::WriteOutcome,
        crate::config_files::RollbackOutcome,
        crate::config_files::SnapshotSummary,
        crate::audit::AuditAction,
        crate::audit::AuditRecord,
        audit::AuditPage,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "system", description = "Health and API metadata"),
        (name = "sessions", description = "Session issuance and inspection"),
        (name = "plugins", description = "Installed plugins and their lifecycle"),
        (name = "configs", description = "Plugin configuration files, backups and rollback"),
        (name = "audit", description = "Security audit trail")
    )
)]
pub struct ApiDoc;

/// Build the console router. Every route except health and the OpenAPI
/// document goes through the access gate.
pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let protected = Router::new()
        // Sessions
        .route(
            "/api/session",
            routing::get(sessions::current_session).delete(sessions::end_session),
        )
        .route("/api/sessions", routing::post(sessions::create_session))
        // Plugins
        .route("/api/plugins", routing::get(plugins::list_plugins))
        .route("/api/plugins/{name}", routing::get(plugins::get_plugin))
        .route(
            "/api/plugins/{name}/action",
            routing::post(plugins::plugin_action),
        )
        // Configuration files
        .route("/api/plugins/{name}/config", routing::get(configs::list_files))
        .route(
            "/api/plugins/{name}/config/file",
            routing::get(configs::read_file).post(configs::save_file),
        )
        .route(
            "/api/plugins/{name}/config/backups",
            routing::get(configs::list_backups),
        )
        .route(
            "/api/plugins/{name}/config/rollback",
            routing::post(configs::rollback),
        )
        // Audit
        .route("/api/audit", routing::get(audit::query_audit))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::access_gate,
        ))
        .layer(DefaultBodyLimit::max(max_body_bytes));

    Router::new()
        // Public routes (no auth required)
        .route("/api/health", routing::get(health::health))
        .route("/api/openapi.json", routing::get(openapi_spec))
        .merge(protected)
        .layer(cors)
        .with_state(state)
}

pub async fn serve(state: AppState, addr: SocketAddr, max_body_bytes: usize) -> std::io::Result<()> {
    let app = router(state, max_body_bytes);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("Plugin console listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}

async fn openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Run blocking file and SQLite work off the async workers.
pub(crate) async fn blocking<T, F>(f: F) -> ConsoleResult<T>
where
    F: FnOnce() -> ConsoleResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ConsoleError::Internal(format!("blocking task failed: {}", e)))?
}

/// Refuse non-admin sessions. The denial is audited like every other
/// forbidden attempt; `target` names what was being reached for.
pub(crate) fn require_admin(state: &AppState, principal: &Principal, target: &str) -> ConsoleResult<()> {
    if principal.session.is_admin() {
        return Ok(());
    }
    log::warn!(
        "User {} with role {} denied admin operation on {}",
        principal.username(),
        principal.role(),
        target
    );
    state.audit.record(
        AuditEntry::new(principal.username(), AuditAction::AccessDenied, target)
            .from_address(Some(principal.source_address))
            .failed()
            .with_detail("reason", "INSUFFICIENT_ROLE")
            .with_detail("role", principal.role()),
    );
    Err(ConsoleError::InsufficientRole(principal.role().to_string()))
}

/// With role groups enabled only the admin role may change anything;
/// without them every authenticated session may.
pub(crate) fn require_writer(state: &AppState, principal: &Principal, target: &str) -> ConsoleResult<()> {
    if state.use_role_groups {
        require_admin(state, principal, target)
    } else {
        Ok(())
    }
}
