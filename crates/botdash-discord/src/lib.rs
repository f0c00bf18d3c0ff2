//! Discord adapter (REST over reqwest).
//!
//! Implements the `botdash-core` permission and identity ports against the
//! Discord HTTP API. Two credentials are in play: the signed-in user's OAuth
//! bearer token and the bot's own token.

use std::{collections::HashSet, time::Duration};

use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use tokio::time::sleep;

use botdash_core::{
    config::Config,
    domain::{GuildId, UserGuild, UserId, UserIdentity},
    errors::Error,
    ports::{IdentitySource, PermissionSource},
    Result,
};

/// Discord returns at most this many guilds per page.
const GUILD_PAGE_LIMIT: usize = 200;
const MAX_RETRY_WAIT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy)]
enum Credential<'a> {
    User(&'a str),
    Bot(&'a str),
}

impl Credential<'_> {
    fn header(&self) -> String {
        match self {
            Credential::User(t) => format!("Bearer {t}"),
            Credential::Bot(t) => format!("Bot {t}"),
        }
    }

    fn who(&self) -> &'static str {
        match self {
            Credential::User(_) => "user",
            Credential::Bot(_) => "bot",
        }
    }
}

#[derive(Deserialize)]
struct RateLimitBody {
    retry_after: f64,
}

#[derive(Deserialize)]
struct BotGuild {
    id: GuildId,
}

#[derive(Deserialize)]
struct DiscordUser {
    id: String,
    username: String,
    #[serde(default)]
    global_name: Option<String>,
}

#[derive(Clone, Debug)]
pub struct DiscordClient {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
}

impl DiscordClient {
    pub fn new(
        api_base: impl Into<String>,
        bot_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("botdash/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("discord http client: {e}")))?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(
            cfg.discord_api_base.clone(),
            cfg.discord_bot_token.clone(),
            cfg.upstream_timeout,
        )
    }

    /// Walk `/users/@me/guilds` page by page with the `after` cursor.
    async fn all_guilds<T, F>(&self, cred: Credential<'_>, id_of: F) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> String,
    {
        let mut out = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let mut query = vec![("limit", GUILD_PAGE_LIMIT.to_string())];
            if let Some(a) = &after {
                query.push(("after", a.clone()));
            }
            let page: Vec<T> = self.get_json("/users/@me/guilds", cred, &query).await?;
            let full = page.len() >= GUILD_PAGE_LIMIT;
            after = page.last().map(&id_of);
            out.extend(page);
            if !full || after.is_none() {
                return Ok(out);
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        cred: Credential<'_>,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.api_base, path);
        let resp = self
            .with_retry(|| {
                self.http
                    .get(&url)
                    .header(reqwest::header::AUTHORIZATION, cred.header())
                    .query(query)
                    .send()
            })
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::map_status(cred, path, status, &body));
        }

        resp.json::<T>()
            .await
            .map_err(|e| Error::Upstream(format!("discord {path} returned malformed json: {e}")))
    }

    /// Send, and on a 429 wait out `retry_after` once before giving up.
    async fn with_retry<Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<reqwest::Response>
    where
        Fut: std::future::Future<Output = reqwest::Result<reqwest::Response>>,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            let resp = op()
                .await
                .map_err(|e| Error::Upstream(format!("discord request error: {e}")))?;
            if resp.status() != StatusCode::TOO_MANY_REQUESTS || attempts >= MAX_RETRIES {
                return Ok(resp);
            }
            attempts += 1;
            let wait = Self::retry_after(resp).await;
            tracing::debug!("discord rate limited, retrying in {wait:?}");
            sleep(wait).await;
        }
    }

    async fn retry_after(resp: reqwest::Response) -> Duration {
        let from_header = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok());
        let secs = match from_header {
            Some(s) => s,
            None => resp
                .json::<RateLimitBody>()
                .await
                .map(|b| b.retry_after)
                .unwrap_or(1.0),
        };
        Duration::try_from_secs_f64(secs.max(0.0))
            .unwrap_or(MAX_RETRY_WAIT)
            .min(MAX_RETRY_WAIT)
    }

    fn map_status(cred: Credential<'_>, path: &str, status: StatusCode, body: &str) -> Error {
        if status == StatusCode::UNAUTHORIZED && matches!(cred, Credential::User(_)) {
            return Error::Unauthenticated;
        }
        Error::Upstream(format!(
            "discord {path} ({} token) failed: {status} {}",
            cred.who(),
            body.chars().take(200).collect::<String>()
        ))
    }
}

#[async_trait]
impl PermissionSource for DiscordClient {
    async fn user_guilds(&self, access_token: &str) -> Result<Vec<UserGuild>> {
        self.all_guilds(Credential::User(access_token), |g: &UserGuild| {
            g.id.to_string()
        })
        .await
    }

    async fn bot_guild_ids(&self) -> Result<HashSet<GuildId>> {
        let guilds = self
            .all_guilds(Credential::Bot(&self.bot_token), |g: &BotGuild| {
                g.id.to_string()
            })
            .await?;
        Ok(guilds.into_iter().map(|g| g.id).collect())
    }
}

#[async_trait]
impl IdentitySource for DiscordClient {
    async fn current_user(&self, access_token: &str) -> Result<UserIdentity> {
        let u: DiscordUser = self
            .get_json("/users/@me", Credential::User(access_token), &[])
            .await?;
        Ok(UserIdentity {
            id: UserId(u.id),
            username: u.global_name.filter(|n| !n.trim().is_empty()).unwrap_or(u.username),
        })
    }
}
