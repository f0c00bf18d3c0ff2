//! Per-guild configuration persistence.
//!
//! Records live behind the [`RecordStore`] port; the production backing is one
//! JSON file per guild in a directory the bot process also reads.

use std::{
    collections::{BTreeMap, HashMap},
    io::ErrorKind,
    path::PathBuf,
    sync::Arc,
};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    domain::GuildId,
    errors::Error,
    guild_config::{normalize_prompt, validate_command_patch, GuildConfig, SettingsPatch},
    ports::RecordStore,
    utils::now_millis,
    Result,
};

// ============== File backing ==============

/// One `<key>.json` file per record.
///
/// Writes go to a temp file that is renamed over the target, so a concurrent
/// reader sees either the old or the new record, never a partial one.
#[derive(Clone, Debug)]
pub struct FileRecordStore {
    dir: PathBuf,
}

impl FileRecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidPath {
                path: self.dir.join(key),
                reason: "record keys must be numeric guild ids".to_string(),
            });
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(txt) => Ok(Some(txt)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Persistence(format!(
                "read {}: {e}",
                path.display()
            ))),
        }
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let tmp = self
            .dir
            .join(format!(".{key}.json.tmp-{}", std::process::id()));

        let write = async {
            tokio::fs::create_dir_all(&self.dir).await?;
            tokio::fs::write(&tmp, value).await?;
            tokio::fs::rename(&tmp, &path).await
        };
        if let Err(e) = write.await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::Persistence(format!(
                "write {}: {e}",
                path.display()
            )));
        }
        Ok(())
    }
}

// ============== In-memory backing ==============

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<String, String>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.records.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.records
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// ============== Config store ==============

/// Serializes read-modify-write cycles per guild inside this process.
///
/// Entries nobody holds or waits on are pruned on the next acquire, so the
/// map only tracks guilds with a write in flight.
#[derive(Default)]
struct GuildLocks {
    inner: Mutex<HashMap<GuildId, Arc<Mutex<()>>>>,
}

impl GuildLocks {
    async fn lock_guild(&self, guild_id: &GuildId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.retain(|id, lock| id == guild_id || Arc::strong_count(lock) > 1);
            map.entry(guild_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Reads and writes [`GuildConfig`] records.
///
/// A missing or unparseable record is replaced by defaults; any other storage
/// failure is returned to the caller.
pub struct ConfigStore {
    records: Arc<dyn RecordStore>,
    locks: GuildLocks,
}

impl ConfigStore {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self {
            records,
            locks: GuildLocks::default(),
        }
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FileRecordStore::new(dir)))
    }

    pub async fn get_or_create(&self, guild_id: &GuildId, guild_name: &str) -> Result<GuildConfig> {
        let _guard = self.locks.lock_guild(guild_id).await;

        if let Some(mut cfg) = self.load(guild_id).await? {
            if cfg.guild_name.is_empty() {
                cfg.guild_name = guild_name.to_string();
            }
            return Ok(cfg);
        }

        let cfg = GuildConfig::with_defaults(guild_id.clone(), guild_name, now_millis());
        self.save(&cfg).await?;
        tracing::info!(guild_id = %guild_id, "created default guild config");
        Ok(cfg)
    }

    pub async fn update_settings(
        &self,
        guild_id: &GuildId,
        guild_name: &str,
        patch: &SettingsPatch,
        actor: &str,
    ) -> Result<GuildConfig> {
        patch.validate()?;
        self.mutate(guild_id, guild_name, actor, |cfg| {
            patch.apply_to(&mut cfg.settings)
        })
        .await
    }

    pub async fn update_commands(
        &self,
        guild_id: &GuildId,
        guild_name: &str,
        patch: &BTreeMap<String, bool>,
        actor: &str,
    ) -> Result<GuildConfig> {
        validate_command_patch(patch)?;
        self.mutate(guild_id, guild_name, actor, |cfg| cfg.commands.merge(patch))
            .await
    }

    /// Replace the custom prompt; `None` (or a blank prompt) restores the default.
    pub async fn update_prompt(
        &self,
        guild_id: &GuildId,
        guild_name: &str,
        prompt: Option<String>,
        actor: &str,
    ) -> Result<GuildConfig> {
        let prompt = normalize_prompt(prompt)?;
        self.mutate(guild_id, guild_name, actor, move |cfg| {
            cfg.system_prompt = prompt
        })
        .await
    }

    async fn mutate(
        &self,
        guild_id: &GuildId,
        guild_name: &str,
        actor: &str,
        apply: impl FnOnce(&mut GuildConfig),
    ) -> Result<GuildConfig> {
        let _guard = self.locks.lock_guild(guild_id).await;

        let now = now_millis();
        let mut cfg = match self.load(guild_id).await? {
            Some(cfg) => cfg,
            None => GuildConfig::with_defaults(guild_id.clone(), guild_name, now),
        };

        apply(&mut cfg);
        if !guild_name.trim().is_empty() {
            cfg.guild_name = guild_name.to_string();
        }
        cfg.stamp(actor, now);

        self.save(&cfg).await?;
        Ok(cfg)
    }

    async fn load(&self, guild_id: &GuildId) -> Result<Option<GuildConfig>> {
        let Some(txt) = self.records.get(guild_id.as_str()).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<GuildConfig>(&txt) {
            Ok(cfg) if &cfg.guild_id == guild_id => Ok(Some(cfg)),
            Ok(cfg) => {
                tracing::warn!(
                    guild_id = %guild_id,
                    stored = %cfg.guild_id,
                    "guild config belongs to another guild, using defaults"
                );
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(
                    guild_id = %guild_id,
                    "invalid JSON in guild config, using defaults: {e}"
                );
                Ok(None)
            }
        }
    }

    async fn save(&self, cfg: &GuildConfig) -> Result<()> {
        let txt = serde_json::to_string_pretty(cfg)?;
        self.records.put(cfg.guild_id.as_str(), &txt).await
    }
}
