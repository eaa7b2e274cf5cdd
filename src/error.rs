use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::auth::gate::DenyReason;

#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    #[error("access denied: {}", .0.code())]
    AccessDenied(DenyReason),

    #[error("role '{0}' may not perform this operation")]
    InsufficientRole(String),

    #[error("path escapes the plugin directory: {0}")]
    PathOutsideExtension(String),

    #[error("backup {backup_id} does not belong to plugin {owner}")]
    BackupOwnerMismatch { backup_id: i64, owner: String },

    #[error("Plugin not found: {0}")]
    ExtensionNotFound(String),

    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Backup not found: {0}")]
    BackupNotFound(i64),

    #[error("Missing 'path' parameter")]
    MissingPath,

    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

impl ConsoleError {
    pub fn status(&self) -> StatusCode {
        match self {
            ConsoleError::AccessDenied(reason) => reason.status(),
            ConsoleError::InsufficientRole(_)
            | ConsoleError::PathOutsideExtension(_)
            | ConsoleError::BackupOwnerMismatch { .. } => StatusCode::FORBIDDEN,
            ConsoleError::ExtensionNotFound(_)
            | ConsoleError::FileNotFound(_)
            | ConsoleError::BackupNotFound(_) => StatusCode::NOT_FOUND,
            ConsoleError::MissingPath
            | ConsoleError::InvalidAction(_)
            | ConsoleError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ConsoleError::Storage(_)
            | ConsoleError::Io(_)
            | ConsoleError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable reason code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            ConsoleError::AccessDenied(reason) => reason.code(),
            ConsoleError::InsufficientRole(_) => "INSUFFICIENT_ROLE",
            ConsoleError::PathOutsideExtension(_) => "PATH_OUTSIDE_PLUGIN_DIR",
            ConsoleError::BackupOwnerMismatch { .. } => "BACKUP_OWNER_MISMATCH",
            ConsoleError::ExtensionNotFound(_) => "PLUGIN_NOT_FOUND",
            ConsoleError::FileNotFound(_) => "FILE_NOT_FOUND",
            ConsoleError::BackupNotFound(_) => "BACKUP_NOT_FOUND",
            ConsoleError::MissingPath => "MISSING_PATH",
            ConsoleError::InvalidAction(_) => "INVALID_ACTION",
            ConsoleError::InvalidRequest(_) => "INVALID_REQUEST",
            ConsoleError::Storage(_) => "STORAGE_ERROR",
            ConsoleError::Io(_) => "IO_ERROR",
            ConsoleError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Message safe to show to a client. Internal failures never leak their
    /// cause (paths, SQL) past this point.
    pub fn public_message(&self) -> String {
        match self {
            ConsoleError::AccessDenied(reason) => reason.message().to_string(),
            ConsoleError::PathOutsideExtension(_) => {
                "Access denied - path outside plugin directory".to_string()
            }
            ConsoleError::BackupOwnerMismatch { .. } => {
                "Backup does not belong to this plugin".to_string()
            }
            ConsoleError::Storage(_)
            | ConsoleError::Io(_)
            | ConsoleError::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        }
    }

    pub fn is_internal(&self) -> bool {
        self.status().is_server_error()
    }
}

/// JSON body of every rejected request.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl IntoResponse for ConsoleError {
    fn into_response(self) -> Response {
        if self.is_internal() {
            log::error!("Request failed: {}", self);
        }
        let body = ErrorBody {
            error: self.code().to_string(),
            message: self.public_message(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<axum::extract::rejection::JsonRejection> for ConsoleError {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        ConsoleError::InvalidRequest(rejection.body_text())
    }
}

impl From<axum::extract::rejection::QueryRejection> for ConsoleError {
    fn from(rejection: axum::extract::rejection::QueryRejection) -> Self {
        ConsoleError::InvalidRequest(rejection.body_text())
    }
}

pub type ConsoleResult<T> = Result<T, ConsoleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_hide_their_cause() {
        let err = ConsoleError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "/srv/plugins/Secret/config.yml",
        ));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "IO_ERROR");
        assert!(!err.public_message().contains("/srv"));
    }

    #[test]
    fn denial_reasons_map_to_status() {
        let forbidden = ConsoleError::AccessDenied(DenyReason::IpNotAllowed);
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(forbidden.code(), "IP_NOT_ALLOWED");

        let missing = ConsoleError::AccessDenied(DenyReason::MissingToken);
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(missing.code(), "MISSING_TOKEN");
    }

    #[test]
    fn lookup_failures_are_not_found() {
        assert_eq!(
            ConsoleError::BackupNotFound(7).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ConsoleError::ExtensionNotFound("ExtA".into()).public_message(),
            "Plugin not found: ExtA"
        );
    }
}
