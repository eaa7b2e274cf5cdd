use std::net::IpAddr;

use serde::Serialize;

use super::ExtensionRegistry;
use crate::audit::{AuditAction, AuditEntry, AuditTrail};
use crate::error::{ConsoleError, ConsoleResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionAction {
    Enable,
    Disable,
    Reload,
}

impl ExtensionAction {
    pub fn parse(raw: &str) -> ConsoleResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "enable" => Ok(ExtensionAction::Enable),
            "disable" => Ok(ExtensionAction::Disable),
            "reload" => Ok(ExtensionAction::Reload),
            _ => Err(ConsoleError::InvalidAction(raw.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExtensionAction::Enable => "enable",
            ExtensionAction::Disable => "disable",
            ExtensionAction::Reload => "reload",
        }
    }

    fn audit_action(&self) -> AuditAction {
        match self {
            ExtensionAction::Enable => AuditAction::PluginEnable,
            ExtensionAction::Disable => AuditAction::PluginDisable,
            ExtensionAction::Reload => AuditAction::PluginReload,
        }
    }
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    pub success: bool,
    pub message: String,
    pub plugin: String,
    pub action: String,
}

/// Enable, disable or reload a plugin and audit the attempt.
///
/// Enabling an enabled plugin (or disabling a disabled one) succeeds without
/// touching it. Reloading a disabled plugin is refused.
pub fn perform_action(
    registry: &dyn ExtensionRegistry,
    audit: &AuditTrail,
    name: &str,
    action: ExtensionAction,
    actor: &str,
    source: Option<IpAddr>,
) -> ConsoleResult<ActionOutcome> {
    let plugin = registry
        .get(name)
        .ok_or_else(|| ConsoleError::ExtensionNotFound(name.to_string()))?;

    let result = match action {
        ExtensionAction::Enable if plugin.enabled => Ok((true, "Plugin is already enabled")),
        ExtensionAction::Enable => registry
            .enable(name)
            .map(|_| (true, "Plugin enabled successfully")),
        ExtensionAction::Disable if !plugin.enabled => Ok((true, "Plugin is already disabled")),
        ExtensionAction::Disable => registry
            .disable(name)
            .map(|_| (true, "Plugin disabled successfully")),
        ExtensionAction::Reload if !plugin.enabled => {
            Ok((false, "Cannot reload a disabled plugin"))
        }
        ExtensionAction::Reload => registry
            .reload(name)
            .map(|_| (true, "Plugin reloaded successfully")),
    };

    let (success, message) = match result {
        Ok((success, message)) => (success, message.to_string()),
        Err(e) => {
            log::error!("Failed to {} plugin {}: {}", action.as_str(), name, e);
            (false, format!("Failed to {} plugin", action.as_str()))
        }
    };

    audit.record(
        AuditEntry::new(actor, action.audit_action(), name)
            .from_address(source)
            .succeeded(success)
            .with_detail("action", action.as_str()),
    );

    Ok(ActionOutcome {
        success,
        message,
        plugin: name.to_string(),
        action: action.as_str().to_string(),
    })
}
