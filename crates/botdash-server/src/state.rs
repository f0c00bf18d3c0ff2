use std::sync::Arc;

use botdash_core::{
    config::Config,
    ports::{IdentitySource, PermissionSource},
    security::AccessVerifier,
    stats::StatsReader,
    store::ConfigStore,
    utils::AuditLogger,
};

use crate::session::SessionStore;

/// Shared handler state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub verifier: AccessVerifier,
    pub identity: Arc<dyn IdentitySource>,
    pub store: Arc<ConfigStore>,
    pub stats: StatsReader,
    pub sessions: Arc<SessionStore>,
    pub audit: Arc<AuditLogger>,
    pub cookie_secure: bool,
}

impl AppState {
    pub fn from_config(
        cfg: &Config,
        permissions: Arc<dyn PermissionSource>,
        identity: Arc<dyn IdentitySource>,
    ) -> Self {
        Self {
            verifier: AccessVerifier::new(permissions),
            identity,
            store: Arc::new(ConfigStore::with_dir(cfg.guild_config_dir.clone())),
            stats: StatsReader::new(cfg.stats_file.clone()),
            sessions: Arc::new(SessionStore::new(cfg.session_ttl)),
            audit: Arc::new(AuditLogger::new(
                cfg.audit_log_path.clone(),
                cfg.audit_log_json,
            )),
            cookie_secure: cfg.session_cookie_secure,
        }
    }
}
