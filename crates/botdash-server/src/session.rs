//! In-memory sessions.
//!
//! A session id maps to the caller's Discord access token and identity. Ids
//! are presented either as the `botdash_session` cookie or as a bearer token.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use botdash_core::{
    domain::{Session, UserIdentity},
    errors::Error,
};

use crate::{error::ApiError, state::AppState};

pub const SESSION_COOKIE: &str = "botdash_session";

pub struct SessionStore {
    ttl: Duration,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn create(&self, access_token: String, user: UserIdentity) -> (String, Session) {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::hours(1));
        let session = Session {
            access_token,
            user,
            expires_at: now + ttl,
        };
        let id = uuid::Uuid::new_v4().to_string();

        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, s| !s.is_expired_at(now));
        sessions.insert(id.clone(), session.clone());
        (id, session)
    }

    pub async fn get(&self, id: &str) -> Option<Session> {
        self.get_at(id, Utc::now()).await
    }

    async fn get_at(&self, id: &str, now: DateTime<Utc>) -> Option<Session> {
        let mut sessions = self.sessions.lock().await;
        match sessions.get(id) {
            Some(s) if s.is_expired_at(now) => {
                sessions.remove(id);
                None
            }
            other => other.cloned(),
        }
    }

    pub async fn remove(&self, id: &str) -> bool {
        self.sessions.lock().await.remove(id).is_some()
    }
}

/// Session id from the `Authorization: Bearer` header, else from the cookie.
pub fn session_id(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(id) = bearer {
        return Some(id.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == SESSION_COOKIE)
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn session_cookie(id: &str, max_age: Duration, secure: bool) -> String {
    let mut cookie = format!(
        "{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        max_age.as_secs()
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// The caller's live session. Rejects with 401.
pub struct AuthSession(pub Session);

#[async_trait]
impl FromRequestParts<AppState> for AuthSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let id = session_id(&parts.headers).ok_or(Error::Unauthenticated)?;
        let session = state
            .sessions
            .get(&id)
            .await
            .ok_or(Error::Unauthenticated)?;
        Ok(AuthSession(session))
    }
}
