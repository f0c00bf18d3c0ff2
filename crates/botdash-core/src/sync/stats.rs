use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    domain::GuildId,
    stats::GuildStats,
    sync::{port::DashboardApi, state::CachedEntity},
    Result,
};

pub const DEFAULT_STATS_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// What a stats panel should render.
#[derive(Clone, Debug, PartialEq)]
pub enum StatsSnapshot {
    /// Nothing fetched yet.
    Loading,
    /// The bot has not published stats; show placeholders.
    NoData,
    Ready(GuildStats),
}

/// Read-only stats cache, refreshed on demand or by a background poller.
pub struct StatsSync {
    api: Arc<dyn DashboardApi>,
    interval: Duration,
    entries: Mutex<HashMap<GuildId, CachedEntity<Option<GuildStats>>>>,
}

impl StatsSync {
    pub fn new(api: Arc<dyn DashboardApi>) -> Self {
        Self::with_interval(api, DEFAULT_STATS_POLL_INTERVAL)
    }

    pub fn with_interval(api: Arc<dyn DashboardApi>, interval: Duration) -> Self {
        Self {
            api,
            interval,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn snapshot(&self, guild_id: &GuildId) -> StatsSnapshot {
        let entries = self.entries.lock().await;
        match entries.get(guild_id).and_then(|e| e.current()) {
            None => StatsSnapshot::Loading,
            Some(None) => StatsSnapshot::NoData,
            Some(Some(stats)) => StatsSnapshot::Ready(stats.clone()),
        }
    }

    pub async fn refresh(&self, guild_id: &GuildId) -> Result<StatsSnapshot> {
        {
            let mut entries = self.entries.lock().await;
            entries.entry(guild_id.clone()).or_default().begin_fetch();
        }

        let fetched = self.api.fetch_stats(guild_id).await;

        let mut entries = self.entries.lock().await;
        let entry = entries.entry(guild_id.clone()).or_default();
        match fetched {
            Ok(stats) => {
                let snap = match &stats {
                    Some(s) => StatsSnapshot::Ready(s.clone()),
                    None => StatsSnapshot::NoData,
                };
                entry.finish_fetch(stats);
                Ok(snap)
            }
            Err(e) => {
                entry.fail_fetch(e.to_string());
                Err(e)
            }
        }
    }

    /// Refresh `guild_id` now and then every poll interval until the handle is
    /// stopped or dropped. Failed polls keep the previous snapshot.
    pub fn start_polling(self: &Arc<Self>, guild_id: GuildId) -> PollHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let this = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = this.refresh(&guild_id).await {
                            tracing::debug!(guild_id = %guild_id, "stats poll failed: {e}");
                        }
                    }
                }
            }
        });

        PollHandle {
            cancel,
            handle: Some(handle),
        }
    }
}

/// Stops the poller when stopped explicitly or dropped.
pub struct PollHandle {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl PollHandle {
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(h) = self.handle.take() {
            let _ = h.await;
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
