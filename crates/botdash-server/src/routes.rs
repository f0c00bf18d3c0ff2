use std::collections::BTreeMap;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};

use botdash_core::{
    domain::{GuildId, ManageableGuild, Session},
    errors::Error,
    guild_config::{GuildConfig, SettingsPatch, DEFAULT_SYSTEM_PROMPT},
    security::AccessDecision,
    stats::GuildStats,
    utils::AuditEvent,
};

use crate::{
    error::ApiError,
    session::{session_cookie, session_id, AuthSession},
    state::AppState,
};

type ApiResult<T> = std::result::Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Guard
// ---------------------------------------------------------------------------

/// An authorized guild: the id from the path and its display name.
struct Guild {
    id: GuildId,
    name: String,
}

/// Runs before any guild-scoped read or write. Denials are 403, a failed
/// upstream lookup is 500; both are audited.
async fn authorize(state: &AppState, session: &Session, raw_id: &str) -> ApiResult<Guild> {
    let id = GuildId::parse(raw_id)?;
    let user = &session.user;

    match state.verifier.verify(&id, &session.access_token).await {
        Ok(AccessDecision::Authorized { guild_name }) => {
            state.audit.record(AuditEvent::auth(
                &user.id.0,
                &user.username,
                id.as_str(),
                true,
                None,
            ));
            Ok(Guild {
                id,
                name: guild_name,
            })
        }
        Ok(AccessDecision::Denied(reason)) => {
            tracing::info!(guild_id = %id, user_id = %user.id, "access denied: {}", reason.as_str());
            state.audit.record(AuditEvent::auth(
                &user.id.0,
                &user.username,
                id.as_str(),
                false,
                Some(reason.as_str()),
            ));
            Err(Error::Forbidden(reason.as_str().to_string()).into())
        }
        Err(e) => {
            state.audit.record(AuditEvent::error(
                &user.id.0,
                &user.username,
                Some(id.as_str()),
                &e.to_string(),
            ));
            Err(ApiError::with_context(e, "failed to verify guild access"))
        }
    }
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> ApiResult<T> {
    serde_json::from_slice(body)
        .map_err(|e| Error::Validation(format!("malformed request body: {e}")).into())
}

fn audit_change(state: &AppState, session: &Session, guild: &Guild, action: &str, change: Value) {
    state.audit.record(AuditEvent::config_change(
        &session.user.id.0,
        &session.user.username,
        guild.id.as_str(),
        action,
        change,
    ));
}

// ---------------------------------------------------------------------------
// Health + sessions
// ---------------------------------------------------------------------------

pub async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest {
    access_token: String,
}

pub async fn login(State(state): State<AppState>, body: Bytes) -> ApiResult<Response> {
    let req: LoginRequest = parse_body(&body)?;
    let token = req.access_token.trim();
    if token.is_empty() {
        return Err(Error::Validation("accessToken is required".to_string()).into());
    }

    let user = state
        .identity
        .current_user(token)
        .await
        .map_err(|e| ApiError::with_context(e, "failed to resolve discord user"))?;

    let (id, session) = state.sessions.create(token.to_string(), user).await;
    tracing::info!(user_id = %session.user.id, "session created");

    let cookie = session_cookie(&id, state.sessions.ttl(), state.cookie_secure);
    let body = json!({
        "sessionId": id,
        "user": session.user,
        "expiresAt": session.expires_at,
    });
    Ok(([(header::SET_COOKIE, cookie)], Json(body)).into_response())
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(id) = session_id(&headers) {
        state.sessions.remove(&id).await;
    }
    let expired = session_cookie("", std::time::Duration::ZERO, state.cookie_secure);
    (StatusCode::NO_CONTENT, [(header::SET_COOKIE, expired)]).into_response()
}

// ---------------------------------------------------------------------------
// Guilds
// ---------------------------------------------------------------------------

pub async fn list_guilds(
    State(state): State<AppState>,
    AuthSession(session): AuthSession,
) -> ApiResult<Json<Vec<ManageableGuild>>> {
    let guilds = state
        .verifier
        .manageable_guilds(&session.access_token)
        .await
        .map_err(|e| ApiError::with_context(e, "failed to fetch guilds"))?;
    Ok(Json(guilds))
}

pub async fn get_config(
    State(state): State<AppState>,
    AuthSession(session): AuthSession,
    Path(guild_id): Path<String>,
) -> ApiResult<Json<GuildConfig>> {
    let guild = authorize(&state, &session, &guild_id).await?;
    let cfg = state
        .store
        .get_or_create(&guild.id, &guild.name)
        .await
        .map_err(|e| ApiError::with_context(e, "failed to load guild config"))?;
    Ok(Json(cfg))
}

pub async fn patch_config(
    State(state): State<AppState>,
    AuthSession(session): AuthSession,
    Path(guild_id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<GuildConfig>> {
    let guild = authorize(&state, &session, &guild_id).await?;
    let patch: SettingsPatch = parse_body(&body)?;

    let cfg = state
        .store
        .update_settings(&guild.id, &guild.name, &patch, &session.user.id.0)
        .await
        .map_err(|e| ApiError::with_context(e, "failed to update settings"))?;

    audit_change(
        &state,
        &session,
        &guild,
        "update_settings",
        serde_json::to_value(&patch).unwrap_or(Value::Null),
    );
    Ok(Json(cfg))
}

pub async fn get_commands(
    State(state): State<AppState>,
    AuthSession(session): AuthSession,
    Path(guild_id): Path<String>,
) -> ApiResult<Json<BTreeMap<String, bool>>> {
    let guild = authorize(&state, &session, &guild_id).await?;
    let cfg = state
        .store
        .get_or_create(&guild.id, &guild.name)
        .await
        .map_err(|e| ApiError::with_context(e, "failed to load guild config"))?;
    Ok(Json(cfg.commands.0))
}

pub async fn patch_commands(
    State(state): State<AppState>,
    AuthSession(session): AuthSession,
    Path(guild_id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<GuildConfig>> {
    let guild = authorize(&state, &session, &guild_id).await?;
    let patch: BTreeMap<String, bool> = parse_body(&body)?;

    let cfg = state
        .store
        .update_commands(&guild.id, &guild.name, &patch, &session.user.id.0)
        .await
        .map_err(|e| ApiError::with_context(e, "failed to update commands"))?;

    audit_change(&state, &session, &guild, "update_commands", json!(patch));
    Ok(Json(cfg))
}

pub async fn get_prompt(
    State(state): State<AppState>,
    AuthSession(session): AuthSession,
    Path(guild_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let guild = authorize(&state, &session, &guild_id).await?;
    let cfg = state
        .store
        .get_or_create(&guild.id, &guild.name)
        .await
        .map_err(|e| ApiError::with_context(e, "failed to load guild config"))?;
    Ok(Json(json!({
        "systemPrompt": cfg.system_prompt,
        "defaultPrompt": DEFAULT_SYSTEM_PROMPT,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptBody {
    #[serde(default)]
    system_prompt: Option<String>,
}

pub async fn put_prompt(
    State(state): State<AppState>,
    AuthSession(session): AuthSession,
    Path(guild_id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<GuildConfig>> {
    let guild = authorize(&state, &session, &guild_id).await?;
    let PromptBody { system_prompt } = parse_body(&body)?;

    let cfg = state
        .store
        .update_prompt(&guild.id, &guild.name, system_prompt, &session.user.id.0)
        .await
        .map_err(|e| ApiError::with_context(e, "failed to update prompt"))?;

    audit_change(
        &state,
        &session,
        &guild,
        "update_prompt",
        json!({ "systemPrompt": cfg.system_prompt }),
    );
    Ok(Json(cfg))
}

pub async fn get_stats(
    State(state): State<AppState>,
    AuthSession(session): AuthSession,
    Path(guild_id): Path<String>,
) -> ApiResult<Json<Option<GuildStats>>> {
    let guild = authorize(&state, &session, &guild_id).await?;
    Ok(Json(state.stats.guild_stats(&guild.id).await))
}
