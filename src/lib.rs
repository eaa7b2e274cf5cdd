pub mod api;
pub mod audit;
pub mod auth;
pub mod config;
pub mod config_files;
pub mod error;
pub mod extensions;
pub mod storage;
pub(crate) mod util;

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use audit::store::AuditStore;
use audit::AuditTrail;
use auth::{AccessGate, Clock, IpAllowList, SessionStore, SystemClock, TokenAuthority};
use config::ConsoleConfig;
use config_files::{BackupStore, ConfigMutationManager};
use error::ConsoleResult;
use extensions::{DirectoryRegistry, ExtensionRegistry};

pub type AppState = Arc<Console>;

/// Everything a request handler can reach.
pub struct Console {
    pub gate: AccessGate,
    pub authority: Arc<TokenAuthority>,
    pub configs: ConfigMutationManager,
    pub registry: Arc<dyn ExtensionRegistry>,
    pub audit: AuditTrail,
    pub use_role_groups: bool,
    pub started_at: DateTime<Utc>,
}

impl Console {
    /// Wire the console over the plugins directory named in `config`.
    pub fn open(config: &ConsoleConfig) -> ConsoleResult<Self> {
        std::fs::create_dir_all(&config.extensions.plugins_dir)?;
        let registry = Arc::new(DirectoryRegistry::new(&config.extensions.plugins_dir));
        Self::with_registry(config, registry, Arc::new(SystemClock))
    }

    /// Wire the console over a host-provided registry and clock.
    pub fn with_registry(
        config: &ConsoleConfig,
        registry: Arc<dyn ExtensionRegistry>,
        clock: Arc<dyn Clock>,
    ) -> ConsoleResult<Self> {
        let db_path = &config.storage.sqlite_path;
        let audit = AuditTrail::new(Arc::new(AuditStore::open(db_path)?));
        let backups = BackupStore::open(db_path)?;

        let authority = Arc::new(TokenAuthority::new(
            config.auth.admin_token.clone(),
            SessionStore::new(clock),
        ));
        let gate = AccessGate::new(
            IpAllowList::new(config.web.allowed_ips.iter().copied()),
            authority.clone(),
            audit.clone(),
        );
        let configs = ConfigMutationManager::new(
            registry.clone(),
            backups,
            audit.clone(),
            config.storage.max_backups_per_file,
        );

        if config.web.allowed_ips.is_empty() {
            log::warn!("web.allowed_ips is empty: the console accepts requests from any address");
        } else {
            log::info!("Allowed IPs: {:?}", config.web.allowed_ips);
        }
        log::info!(
            "Role groups {}",
            if config.auth.use_role_groups { "enabled" } else { "disabled" }
        );

        Ok(Self {
            gate,
            authority,
            configs,
            registry,
            audit,
            use_role_groups: config.auth.use_role_groups,
            started_at: Utc::now(),
        })
    }
}

/// Open storage, start the session sweeper and serve until the listener fails.
pub async fn run(config: ConsoleConfig) -> Result<(), Box<dyn std::error::Error>> {
    let console = Arc::new(Console::open(&config)?);

    let sweeper = auth::token::spawn_sweeper(
        console.authority.clone(),
        config.auth.sweep_interval(),
    );

    let addr = SocketAddr::new(config.web.bind_address, config.web.port);
    let served = api::serve(console, addr, config.web.max_body_bytes).await;
    sweeper.abort();
    served?;
    Ok(())
}
