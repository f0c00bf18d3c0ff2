use std::{
    collections::{BTreeMap, HashMap},
    future::Future,
    sync::Arc,
};

use tokio::sync::Mutex;

use crate::{
    domain::GuildId,
    guild_config::{GuildConfig, SettingsPatch},
    sync::{
        port::DashboardApi,
        state::{CachedEntity, SyncPhase},
    },
    Result,
};

/// Optimistic cache of guild configs keyed by guild id.
///
/// Writes show up in [`ConfigSync::current`] immediately. The server's answer
/// then either confirms them or they are rolled back to the last confirmed
/// record. Two writes in flight for the same guild are last-write-wins.
pub struct ConfigSync {
    api: Arc<dyn DashboardApi>,
    entries: Mutex<HashMap<GuildId, CachedEntity<GuildConfig>>>,
}

impl ConfigSync {
    pub fn new(api: Arc<dyn DashboardApi>) -> Self {
        Self {
            api,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn current(&self, guild_id: &GuildId) -> Option<GuildConfig> {
        let entries = self.entries.lock().await;
        entries.get(guild_id).and_then(|e| e.current().cloned())
    }

    pub async fn phase(&self, guild_id: &GuildId) -> SyncPhase {
        let entries = self.entries.lock().await;
        entries
            .get(guild_id)
            .map(|e| e.phase())
            .unwrap_or(SyncPhase::Idle)
    }

    pub async fn last_error(&self, guild_id: &GuildId) -> Option<String> {
        let entries = self.entries.lock().await;
        entries
            .get(guild_id)
            .and_then(|e| e.last_error().map(str::to_string))
    }

    /// Cached value if there is one, otherwise a fetch.
    pub async fn get(&self, guild_id: &GuildId) -> Result<GuildConfig> {
        if let Some(cfg) = self.current(guild_id).await {
            return Ok(cfg);
        }
        self.revalidate(guild_id).await
    }

    /// Fetch the authoritative record and make it the confirmed value.
    pub async fn revalidate(&self, guild_id: &GuildId) -> Result<GuildConfig> {
        self.with_entry(guild_id, |e| e.begin_fetch()).await;

        match self.api.fetch_config(guild_id).await {
            Ok(cfg) => {
                let out = cfg.clone();
                self.with_entry(guild_id, |e| e.finish_fetch(cfg)).await;
                Ok(out)
            }
            Err(e) => {
                let msg = e.to_string();
                self.with_entry(guild_id, |entry| entry.fail_fetch(msg)).await;
                Err(e)
            }
        }
    }

    pub async fn update_settings(
        &self,
        guild_id: &GuildId,
        patch: SettingsPatch,
    ) -> Result<GuildConfig> {
        let local = patch.clone();
        self.mutate(
            guild_id,
            move |cfg| local.apply_to(&mut cfg.settings),
            self.api.update_settings(guild_id, &patch),
        )
        .await
    }

    pub async fn update_commands(
        &self,
        guild_id: &GuildId,
        patch: BTreeMap<String, bool>,
    ) -> Result<GuildConfig> {
        let local = patch.clone();
        self.mutate(
            guild_id,
            move |cfg| cfg.commands.merge(&local),
            self.api.update_commands(guild_id, &patch),
        )
        .await
    }

    pub async fn update_prompt(
        &self,
        guild_id: &GuildId,
        prompt: Option<String>,
    ) -> Result<GuildConfig> {
        let local = prompt.clone().filter(|p| !p.trim().is_empty());
        self.mutate(
            guild_id,
            move |cfg| cfg.system_prompt = local,
            self.api.update_prompt(guild_id, prompt.as_deref()),
        )
        .await
    }

    async fn mutate<Fut>(
        &self,
        guild_id: &GuildId,
        local: impl FnOnce(&mut GuildConfig),
        write: Fut,
    ) -> Result<GuildConfig>
    where
        Fut: Future<Output = Result<GuildConfig>>,
    {
        // Optimistic updates layer on top of a confirmed value.
        let has_confirmed = {
            let entries = self.entries.lock().await;
            entries
                .get(guild_id)
                .is_some_and(|e| e.confirmed().is_some())
        };
        if !has_confirmed {
            self.revalidate(guild_id).await?;
        }

        self.with_entry(guild_id, |e| {
            if let Some(mut next) = e.current().cloned() {
                local(&mut next);
                e.apply_optimistic(next);
            }
        })
        .await;

        match write.await {
            Ok(written) => {
                // Reconcile with a fresh read; the write response is the fallback.
                let settled = match self.api.fetch_config(guild_id).await {
                    Ok(cfg) => cfg,
                    Err(e) => {
                        tracing::warn!(guild_id = %guild_id, "reconcile fetch failed: {e}");
                        written
                    }
                };
                let out = settled.clone();
                self.with_entry(guild_id, |e| e.confirm(settled)).await;
                Ok(out)
            }
            Err(err) => {
                let authoritative = match self.api.fetch_config(guild_id).await {
                    Ok(cfg) => Some(cfg),
                    Err(e) => {
                        tracing::warn!(guild_id = %guild_id, "re-fetch after failed write failed: {e}");
                        None
                    }
                };
                let msg = err.to_string();
                self.with_entry(guild_id, |e| e.roll_back(msg, authoritative))
                    .await;
                Err(err)
            }
        }
    }

    async fn with_entry<R>(
        &self,
        guild_id: &GuildId,
        f: impl FnOnce(&mut CachedEntity<GuildConfig>) -> R,
    ) -> R {
        let mut entries = self.entries.lock().await;
        f(entries.entry(guild_id.clone()).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{errors::Error, stats::GuildStats, utils::now_millis};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// In-memory server: applies writes for real unless told to fail.
    struct FakeApi {
        server: Mutex<GuildConfig>,
        fail_writes: AtomicBool,
        fetches: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    impl FakeApi {
        fn new(gate: Option<Arc<Notify>>) -> Self {
            Self {
                server: Mutex::new(GuildConfig::with_defaults(gid("42"), "Test Guild", now_millis())),
                fail_writes: AtomicBool::new(false),
                fetches: AtomicUsize::new(0),
                gate,
            }
        }

        async fn write(&self, f: impl FnOnce(&mut GuildConfig)) -> Result<GuildConfig> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(Error::External("dashboard returned 500".to_string()));
            }
            let mut server = self.server.lock().await;
            f(&mut server);
            server.stamp("1001", now_millis());
            Ok(server.clone())
        }
    }

    #[async_trait]
    impl DashboardApi for FakeApi {
        async fn fetch_config(&self, _guild_id: &GuildId) -> Result<GuildConfig> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.server.lock().await.clone())
        }

        async fn update_settings(
            &self,
            _guild_id: &GuildId,
            patch: &SettingsPatch,
        ) -> Result<GuildConfig> {
            self.write(|cfg| patch.apply_to(&mut cfg.settings)).await
        }

        async fn update_commands(
            &self,
            _guild_id: &GuildId,
            patch: &BTreeMap<String, bool>,
        ) -> Result<GuildConfig> {
            self.write(|cfg| cfg.commands.merge(patch)).await
        }

        async fn update_prompt(
            &self,
            _guild_id: &GuildId,
            prompt: Option<&str>,
        ) -> Result<GuildConfig> {
            let prompt = prompt.map(str::to_string);
            self.write(|cfg| cfg.system_prompt = prompt).await
        }

        async fn fetch_stats(&self, _guild_id: &GuildId) -> Result<Option<GuildStats>> {
            Ok(None)
        }
    }

    fn gid(raw: &str) -> GuildId {
        GuildId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn get_fetches_once_then_serves_cache() {
        let api = Arc::new(FakeApi::new(None));
        let sync = ConfigSync::new(api.clone());
        let g = gid("42");

        assert_eq!(sync.phase(&g).await, SyncPhase::Idle);
        sync.get(&g).await.unwrap();
        sync.get(&g).await.unwrap();
        assert_eq!(api.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(sync.phase(&g).await, SyncPhase::Fresh);

        sync.revalidate(&g).await.unwrap();
        assert_eq!(api.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn successful_write_is_confirmed_with_server_state() {
        let api = Arc::new(FakeApi::new(None));
        let sync = ConfigSync::new(api.clone());
        let g = gid("42");

        let patch = SettingsPatch {
            score_threshold: Some(9),
            ..Default::default()
        };
        let cfg = sync.update_settings(&g, patch).await.unwrap();
        assert_eq!(cfg.settings.score_threshold, 9);
        assert_eq!(cfg.updated_by, "1001");
        assert_eq!(sync.phase(&g).await, SyncPhase::Confirmed);
        assert_eq!(sync.current(&g).await.unwrap(), *api.server.lock().await);
    }

    #[tokio::test]
    async fn optimistic_value_is_visible_while_write_is_pending() {
        let gate = Arc::new(Notify::new());
        let api = Arc::new(FakeApi::new(Some(gate.clone())));
        let sync = Arc::new(ConfigSync::new(api.clone()));
        let g = gid("42");
        sync.get(&g).await.unwrap();

        let task = {
            let sync = sync.clone();
            let g = g.clone();
            tokio::spawn(async move {
                sync.update_commands(&g, BTreeMap::from([("beer".to_string(), false)]))
                    .await
            })
        };

        // Wait for the optimistic layer to appear.
        for _ in 0..100 {
            if sync.phase(&g).await == SyncPhase::OptimisticallyUpdated {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(sync.phase(&g).await, SyncPhase::OptimisticallyUpdated);
        assert!(!sync.current(&g).await.unwrap().is_command_enabled("beer"));
        assert!(api.server.lock().await.is_command_enabled("beer"));

        gate.notify_one();
        let cfg = task.await.unwrap().unwrap();
        assert!(!cfg.is_command_enabled("beer"));
        assert_eq!(sync.phase(&g).await, SyncPhase::Confirmed);
    }

    #[tokio::test]
    async fn failed_write_rolls_back_to_confirmed_value() {
        let api = Arc::new(FakeApi::new(None));
        let sync = ConfigSync::new(api.clone());
        let g = gid("42");
        let before = sync.get(&g).await.unwrap();

        api.fail_writes.store(true, Ordering::SeqCst);
        let err = sync
            .update_prompt(&g, Some("Talk like a pirate.".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::External(_)));

        assert_eq!(sync.phase(&g).await, SyncPhase::RolledBack);
        assert_eq!(sync.current(&g).await.unwrap(), before);
        assert!(sync.last_error(&g).await.unwrap().contains("500"));
        // Initial fetch + re-fetch after the failure.
        assert_eq!(api.fetches.load(Ordering::SeqCst), 2);
    }
}
