use std::collections::HashSet;

use async_trait::async_trait;

use crate::{
    domain::{GuildId, UserGuild, UserIdentity},
    Result,
};

/// Hexagonal port for the platform that knows who may manage which guild.
///
/// Discord is the only implementation; tests use in-memory fakes.
#[async_trait]
pub trait PermissionSource: Send + Sync {
    /// Guilds the holder of `access_token` belongs to, with owner flag and permissions.
    async fn user_guilds(&self, access_token: &str) -> Result<Vec<UserGuild>>;

    /// Guilds the bot identity belongs to.
    async fn bot_guild_ids(&self) -> Result<HashSet<GuildId>>;
}

/// Resolves an OAuth access token to the user it was issued for.
#[async_trait]
pub trait IdentitySource: Send + Sync {
    async fn current_user(&self, access_token: &str) -> Result<UserIdentity>;
}

/// Key-value repository for JSON records.
///
/// `get` returns `Ok(None)` when the key was never written. Any other read
/// failure is an error.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn put(&self, key: &str, value: &str) -> Result<()>;
}
