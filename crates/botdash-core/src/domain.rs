use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{errors::Error, Result};

/// Discord guild (server) id: a numeric snowflake kept as a string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GuildId(String);

impl GuildId {
    /// Snowflakes are at most 20 decimal digits (u64::MAX).
    const MAX_LEN: usize = 20;

    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw.len() > Self::MAX_LEN || !raw.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(Error::Validation(format!("invalid guild id: {raw:?}")));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Discord user id (numeric snowflake, string form).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The signed-in user as reported by Discord `GET /users/@me`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: UserId,
    pub username: String,
}

/// An authenticated dashboard session.
///
/// Handlers only ever read it; the session store owns creation and expiry.
#[derive(Clone, Debug)]
pub struct Session {
    pub access_token: String,
    pub user: UserIdentity,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A guild the signed-in user belongs to (Discord `GET /users/@me/guilds`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserGuild {
    pub id: GuildId,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub owner: bool,
    /// Permission bitfield as Discord sends it: a decimal string.
    #[serde(default)]
    pub permissions: String,
}

/// A guild the caller has management rights in, flagged with bot presence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManageableGuild {
    pub id: GuildId,
    pub name: String,
    pub icon: Option<String>,
    pub has_bot: bool,
}
