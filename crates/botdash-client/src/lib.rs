//! reqwest implementation of the dashboard API port.
//!
//! Pair it with `botdash_core::sync::{ConfigSync, StatsSync}` to get the
//! optimistic config cache and the stats poller over HTTP.

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;

use botdash_core::{
    domain::GuildId,
    errors::Error,
    guild_config::{GuildConfig, SettingsPatch},
    stats::GuildStats,
    sync::DashboardApi,
    Result,
};

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Clone, Debug)]
pub struct HttpDashboardApi {
    http: reqwest::Client,
    base_url: String,
    session_id: String,
}

impl HttpDashboardApi {
    pub fn new(base_url: impl Into<String>, session_id: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("dashboard http client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session_id: session_id.into(),
        })
    }

    fn guild_url(&self, guild_id: &GuildId, tail: &str) -> String {
        format!("{}/api/guilds/{}/{}", self.base_url, guild_id, tail)
    }

    async fn send<T, B>(&self, method: Method, url: String, body: Option<&B>) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized + Sync,
    {
        let mut req = self
            .http
            .request(method, &url)
            .bearer_auth(&self.session_id);
        if let Some(b) = body {
            req = req.json(b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("dashboard request error: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let raw = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&raw)
                .map(|b| b.error)
                .unwrap_or_else(|_| raw.chars().take(200).collect());
            tracing::debug!(%url, status = status.as_u16(), "dashboard error: {message}");
            return Err(map_status(status, message));
        }

        resp.json::<T>()
            .await
            .map_err(|e| Error::External(format!("dashboard json error: {e}")))
    }
}

fn map_status(status: StatusCode, message: String) -> Error {
    match status {
        StatusCode::UNAUTHORIZED => Error::Unauthenticated,
        StatusCode::FORBIDDEN => Error::Forbidden(message),
        StatusCode::BAD_REQUEST => Error::Validation(message),
        _ => Error::External(format!("dashboard returned {status}: {message}")),
    }
}

#[async_trait]
impl DashboardApi for HttpDashboardApi {
    async fn fetch_config(&self, guild_id: &GuildId) -> Result<GuildConfig> {
        self.send::<_, ()>(Method::GET, self.guild_url(guild_id, "config"), None)
            .await
    }

    async fn update_settings(
        &self,
        guild_id: &GuildId,
        patch: &SettingsPatch,
    ) -> Result<GuildConfig> {
        self.send(Method::PATCH, self.guild_url(guild_id, "config"), Some(patch))
            .await
    }

    async fn update_commands(
        &self,
        guild_id: &GuildId,
        patch: &BTreeMap<String, bool>,
    ) -> Result<GuildConfig> {
        self.send(Method::PATCH, self.guild_url(guild_id, "commands"), Some(patch))
            .await
    }

    async fn update_prompt(&self, guild_id: &GuildId, prompt: Option<&str>) -> Result<GuildConfig> {
        let body = json!({ "systemPrompt": prompt });
        self.send(Method::PUT, self.guild_url(guild_id, "prompt"), Some(&body))
            .await
    }

    async fn fetch_stats(&self, guild_id: &GuildId) -> Result<Option<GuildStats>> {
        self.send::<_, ()>(Method::GET, self.guild_url(guild_id, "stats"), None)
            .await
    }
}

#[cfg(test)]
mod tests {
    // End-to-end: sync hook -> HTTP client -> axum server -> file store.

    use std::{
        collections::{BTreeMap, HashSet},
        path::PathBuf,
        sync::Arc,
        time::Duration,
    };

    use async_trait::async_trait;

    use botdash_core::{
        domain::{UserGuild, UserId, UserIdentity},
        ports::{IdentitySource, PermissionSource},
        security::AccessVerifier,
        stats::StatsReader,
        store::ConfigStore,
        sync::{ConfigSync, StatsSnapshot, StatsSync, SyncPhase},
        utils::AuditLogger,
    };
    use botdash_server::{build_router, session::SessionStore, AppState};

    use super::*;

    struct FakeDiscord;

    #[async_trait]
    impl PermissionSource for FakeDiscord {
        async fn user_guilds(&self, _access_token: &str) -> Result<Vec<UserGuild>> {
            Ok(vec![
                UserGuild {
                    id: GuildId::parse("42").unwrap(),
                    name: "Test Guild".to_string(),
                    icon: None,
                    owner: true,
                    permissions: "0".to_string(),
                },
                UserGuild {
                    id: GuildId::parse("7").unwrap(),
                    name: "Seven".to_string(),
                    icon: None,
                    owner: false,
                    permissions: "0".to_string(),
                },
            ])
        }

        async fn bot_guild_ids(&self) -> Result<HashSet<GuildId>> {
            Ok(HashSet::from([
                GuildId::parse("42").unwrap(),
                GuildId::parse("7").unwrap(),
            ]))
        }
    }

    #[async_trait]
    impl IdentitySource for FakeDiscord {
        async fn current_user(&self, _access_token: &str) -> Result<UserIdentity> {
            Ok(UserIdentity {
                id: UserId("1001".to_string()),
                username: "alice".to_string(),
            })
        }
    }

    fn temp_dir() -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "botdash-client-test-{}-{nanos}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Start a server and return its base URL plus a signed-in session id.
    async fn spawn_server() -> (String, String) {
        let dir = temp_dir();
        let fake = Arc::new(FakeDiscord);
        let state = AppState {
            verifier: AccessVerifier::new(fake.clone()),
            identity: fake,
            store: Arc::new(ConfigStore::with_dir(dir.join("guild_configs"))),
            stats: StatsReader::new(dir.join("bot_stats.json")),
            sessions: Arc::new(SessionStore::new(Duration::from_secs(60))),
            audit: Arc::new(AuditLogger::new(dir.join("audit.log"), true)),
            cookie_secure: false,
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, build_router(state)).await.unwrap();
        });
        let base = format!("http://{addr}");

        let resp = reqwest::Client::new()
            .post(format!("{base}/api/auth/session"))
            .json(&json!({ "accessToken": "good" }))
            .send()
            .await
            .unwrap();
        let body: serde_json::Value = resp.json().await.unwrap();
        let sid = body["sessionId"].as_str().unwrap().to_string();
        (base, sid)
    }

    fn gid(raw: &str) -> GuildId {
        GuildId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn status_codes_map_to_core_errors() {
        let (base, sid) = spawn_server().await;

        let anon = HttpDashboardApi::new(&base, "bogus").unwrap();
        assert!(matches!(
            anon.fetch_config(&gid("42")).await,
            Err(Error::Unauthenticated)
        ));

        let api = HttpDashboardApi::new(&base, sid).unwrap();
        assert!(matches!(
            api.fetch_config(&gid("7")).await,
            Err(Error::Forbidden(_))
        ));

        let bad = SettingsPatch {
            temperature: Some(2.0),
            ..Default::default()
        };
        assert!(matches!(
            api.update_settings(&gid("42"), &bad).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn config_sync_round_trips_through_the_server() {
        let (base, sid) = spawn_server().await;
        let api = Arc::new(HttpDashboardApi::new(&base, sid).unwrap());
        let sync = ConfigSync::new(api.clone());
        let g = gid("42");

        let initial = sync.get(&g).await.unwrap();
        assert_eq!(initial.updated_by, "system");

        let cfg = sync
            .update_commands(&g, BTreeMap::from([("clearCache".to_string(), false)]))
            .await
            .unwrap();
        assert!(!cfg.is_command_enabled("clearCache"));
        assert_eq!(cfg.updated_by, "1001");
        assert_eq!(sync.phase(&g).await, SyncPhase::Confirmed);

        let cfg = sync
            .update_prompt(&g, Some("Be brief.".to_string()))
            .await
            .unwrap();
        assert_eq!(cfg.system_prompt.as_deref(), Some("Be brief."));
        assert_eq!(api.fetch_config(&g).await.unwrap(), cfg);
    }

    #[tokio::test]
    async fn rejected_write_rolls_back_over_http() {
        let (base, sid) = spawn_server().await;
        let sync = ConfigSync::new(Arc::new(HttpDashboardApi::new(&base, sid).unwrap()));
        let g = gid("42");
        let before = sync.get(&g).await.unwrap();

        let err = sync
            .update_settings(
                &g,
                SettingsPatch {
                    score_threshold: Some(11),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(sync.phase(&g).await, SyncPhase::RolledBack);
        assert_eq!(sync.current(&g).await.unwrap(), before);
    }

    #[tokio::test]
    async fn stats_without_a_stats_file_are_no_data() {
        let (base, sid) = spawn_server().await;
        let stats = StatsSync::new(Arc::new(HttpDashboardApi::new(&base, sid).unwrap()));
        assert_eq!(
            stats.refresh(&gid("42")).await.unwrap(),
            StatsSnapshot::NoData
        );
    }
}
