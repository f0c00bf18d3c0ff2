use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::{
    domain::GuildId,
    guild_config::{GuildConfig, SettingsPatch},
    stats::GuildStats,
    Result,
};

/// The dashboard HTTP surface as seen by a client.
///
/// Write methods return the authoritative record the server persisted.
#[async_trait]
pub trait DashboardApi: Send + Sync {
    async fn fetch_config(&self, guild_id: &GuildId) -> Result<GuildConfig>;

    async fn update_settings(
        &self,
        guild_id: &GuildId,
        patch: &SettingsPatch,
    ) -> Result<GuildConfig>;

    async fn update_commands(
        &self,
        guild_id: &GuildId,
        patch: &BTreeMap<String, bool>,
    ) -> Result<GuildConfig>;

    async fn update_prompt(&self, guild_id: &GuildId, prompt: Option<&str>) -> Result<GuildConfig>;

    /// `Ok(None)` is the server's "no stats available" answer.
    async fn fetch_stats(&self, guild_id: &GuildId) -> Result<Option<GuildStats>>;
}
