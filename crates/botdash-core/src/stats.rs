//! Read side of the stats file the bot process publishes.

use std::{collections::HashMap, io::ErrorKind, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::GuildId;

/// Whole-process snapshot as written by the bot. Every field is optional.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BotStats {
    pub uptime: Option<String>,
    pub latency: Option<u64>,
    pub total_guilds: Option<u64>,
    pub guilds: HashMap<String, GuildUsage>,
    pub updated_at: Option<String>,
    pub total_messages: Option<u64>,
    pub total_tokens: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GuildUsage {
    pub messages_cached: u64,
    pub tokens_used: u64,
    pub last_activity: Option<String>,
}

/// The slice of [`BotStats`] one guild's dashboard shows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuildStats {
    pub uptime: String,
    /// Gateway latency in milliseconds.
    pub latency: u64,
    pub messages_cached: u64,
    pub tokens_used: u64,
    pub last_activity: Option<String>,
    pub updated_at: Option<String>,
}

impl BotStats {
    /// A guild without an entry gets zero counters and the bot-wide fields.
    pub fn for_guild(&self, guild_id: &GuildId) -> GuildStats {
        let usage = self
            .guilds
            .get(guild_id.as_str())
            .cloned()
            .unwrap_or_default();

        GuildStats {
            uptime: self.uptime.clone().unwrap_or_else(|| "Unknown".to_string()),
            latency: self.latency.unwrap_or(0),
            messages_cached: usage.messages_cached,
            tokens_used: usage.tokens_used,
            last_activity: usage.last_activity,
            updated_at: self.updated_at.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct StatsReader {
    path: PathBuf,
}

impl StatsReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `None` means "no stats available": the file is missing or unusable.
    pub async fn guild_stats(&self, guild_id: &GuildId) -> Option<GuildStats> {
        self.snapshot().await.map(|s| s.for_guild(guild_id))
    }

    pub async fn snapshot(&self) -> Option<BotStats> {
        let txt = match tokio::fs::read_to_string(&self.path).await {
            Ok(txt) => txt,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no bot stats file yet");
                return None;
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "failed to read bot stats: {e}");
                return None;
            }
        };

        match serde_json::from_str::<BotStats>(&txt) {
            Ok(stats) => Some(stats),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "invalid bot stats JSON: {e}");
                None
            }
        }
    }
}
