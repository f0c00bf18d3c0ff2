//! Per-guild bot configuration record and its defaults.
//!
//! The JSON shape is shared with the bot process, which reads these files to
//! decide how to respond. Keys are camelCase on disk and on the wire.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::{domain::GuildId, errors::Error, Result};

/// Actor recorded on records the store synthesizes itself.
pub const SYSTEM_ACTOR: &str = "system";

pub const MAX_PROMPT_CHARS: usize = 10_000;
const MAX_COMMAND_NAME_LEN: usize = 64;

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";

pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a helpful, witty Discord bot in a casual server.

RESPONSE RULES:
- Keep responses to 1-3 sentences MAX. Be brief.
- Aim to be the 5th-6th most active participant in server (your name is "ClaudeBot" in "Recent Conversation:")
- Use recent conversation and if you notice you haven't chatted in awhile, raise your score accordingly. For example: if you haven't chatted in 10+ messages, increase your score
- Most conversations don't need your input - only add high value responses
- Only respond if directly mentioned OR you can add genuinely valuable input
- NEVER end with follow-up questions

MENTION FORMAT:
- Messages starting with [MENTIONED] mean the user addressed you (@ClaudeBot or "ClaudeBot") These deserve a response (score 9+)
- Note: "claude" alone is ambiguous (could mean Claude AI service or ClaudeBot) - use context to decide if they're referring to you the discord bot

SCORING (rate your response 0-10):
10 = [MENTIONED] AND asked a clear question you can answer
9 = [MENTIONED] OR celebrate someone's accomplishment (promotion, graduation, new job, etc.)
8 = Can provide high value while staying the 5th-6th most active participant (check "Recent conversation:" to ensure you're staying active)
5-7 = Might be interesting but doesn't need your input
0-4 = Skip it - normal chat between other users

CATEGORY CONTEXT:
- "Information" = NEVER respond (score 0)
- "tech-and-career" = Usually networking. BUT celebrate accomplishments/good news! (score 8)
- "Text Channels" = May engage if valuable

FORMAT: Write your brief response, then on a new line: SCORE: X"#;

// ============== Settings ==============

/// Response tuning for the bot in one guild.
///
/// Stored records are read leniently: a missing field, or one of the wrong
/// type, falls back to its default without discarding the rest of the record.
/// Keys this type does not model are kept in `extra` and written back as-is.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "Value")]
pub struct Settings {
    pub max_tokens_per_channel: u64,
    pub message_expiry_days: u32,
    pub chars_per_token_estimate: u32,
    pub max_response_tokens: u32,
    pub score_threshold: u32,
    pub rate_limit_seconds: f64,
    pub temperature: f64,
    pub model: String,
    pub skip_categories: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_tokens_per_channel: 150_000,
            message_expiry_days: 30,
            chars_per_token_estimate: 4,
            max_response_tokens: 300,
            score_threshold: 8,
            rate_limit_seconds: 2.0,
            temperature: 0.7,
            model: DEFAULT_MODEL.to_string(),
            skip_categories: vec!["Information".to_string()],
            extra: Map::new(),
        }
    }
}

impl From<Value> for Settings {
    fn from(raw: Value) -> Self {
        let mut s = Settings::default();
        let Value::Object(map) = raw else {
            if !raw.is_null() {
                tracing::warn!("stored settings is not an object, using defaults");
            }
            return s;
        };

        for (key, v) in map {
            let known = match key.as_str() {
                "maxTokensPerChannel" => count(&v).map(|n| s.max_tokens_per_channel = n),
                "messageExpiryDays" => small_count(&v).map(|n| s.message_expiry_days = n),
                "charsPerTokenEstimate" => {
                    small_count(&v).map(|n| s.chars_per_token_estimate = n)
                }
                "maxResponseTokens" => small_count(&v).map(|n| s.max_response_tokens = n),
                "scoreThreshold" => small_count(&v).map(|n| s.score_threshold = n),
                "rateLimitSeconds" => non_negative(&v).map(|n| s.rate_limit_seconds = n),
                "temperature" => non_negative(&v).map(|n| s.temperature = n),
                "model" => v.as_str().map(|m| s.model = m.to_string()),
                "skipCategories" => serde_json::from_value::<Vec<String>>(v.clone())
                    .ok()
                    .map(|c| s.skip_categories = c),
                _ => {
                    s.extra.insert(key.clone(), v);
                    continue;
                }
            };
            if known.is_none() {
                tracing::warn!("stored setting {key} has unusable value {v}, using default");
            }
        }
        s
    }
}

/// Any finite, non-negative JSON number. Fractions are truncated.
fn count(v: &Value) -> Option<u64> {
    v.as_u64().or_else(|| {
        non_negative(v)
            .filter(|f| *f <= u64::MAX as f64)
            .map(|f| f.trunc() as u64)
    })
}

fn small_count(v: &Value) -> Option<u32> {
    count(v).and_then(|n| u32::try_from(n).ok())
}

fn non_negative(v: &Value) -> Option<f64> {
    v.as_f64().filter(|f| f.is_finite() && *f >= 0.0)
}

/// A partial settings update: only the present fields change.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens_per_channel: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_expiry_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chars_per_token_estimate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_response_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_threshold: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_categories: Option<Vec<String>>,
}

impl SettingsPatch {
    pub fn validate(&self) -> Result<()> {
        if let Some(t) = self.temperature {
            if !(0.0..=1.0).contains(&t) {
                return Err(Error::Validation(format!(
                    "temperature must be between 0 and 1, got {t}"
                )));
            }
        }
        if let Some(s) = self.score_threshold {
            if s > 10 {
                return Err(Error::Validation(format!(
                    "scoreThreshold must be between 0 and 10, got {s}"
                )));
            }
        }
        if let Some(r) = self.rate_limit_seconds {
            if !r.is_finite() || r < 0.0 {
                return Err(Error::Validation(format!(
                    "rateLimitSeconds must be a non-negative number, got {r}"
                )));
            }
        }
        positive("maxTokensPerChannel", self.max_tokens_per_channel)?;
        positive("maxResponseTokens", self.max_response_tokens.map(u64::from))?;
        positive("charsPerTokenEstimate", self.chars_per_token_estimate.map(u64::from))?;
        positive("messageExpiryDays", self.message_expiry_days.map(u64::from))?;
        if let Some(m) = &self.model {
            if m.trim().is_empty() {
                return Err(Error::Validation("model must not be empty".to_string()));
            }
        }
        Ok(())
    }

    /// Shallow merge: each present field replaces the stored one.
    pub fn apply_to(&self, settings: &mut Settings) {
        if let Some(v) = self.max_tokens_per_channel {
            settings.max_tokens_per_channel = v;
        }
        if let Some(v) = self.message_expiry_days {
            settings.message_expiry_days = v;
        }
        if let Some(v) = self.chars_per_token_estimate {
            settings.chars_per_token_estimate = v;
        }
        if let Some(v) = self.max_response_tokens {
            settings.max_response_tokens = v;
        }
        if let Some(v) = self.score_threshold {
            settings.score_threshold = v;
        }
        if let Some(v) = self.rate_limit_seconds {
            settings.rate_limit_seconds = v;
        }
        if let Some(v) = self.temperature {
            settings.temperature = v;
        }
        if let Some(v) = &self.model {
            settings.model = v.trim().to_string();
        }
        if let Some(v) = &self.skip_categories {
            settings.skip_categories = v.clone();
        }
    }
}

fn positive(field: &str, v: Option<u64>) -> Result<()> {
    match v {
        Some(0) => Err(Error::Validation(format!("{field} must be greater than 0"))),
        _ => Ok(()),
    }
}

// ============== Commands ==============

/// Slash command on/off switches keyed by command name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandToggles(pub BTreeMap<String, bool>);

impl Default for CommandToggles {
    fn default() -> Self {
        Self(
            ["beer", "ping", "uptime", "cacheStats", "clearCache"]
                .into_iter()
                .map(|name| (name.to_string(), true))
                .collect(),
        )
    }
}

impl CommandToggles {
    /// Commands nobody has configured are enabled.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.0.get(name).copied().unwrap_or(true)
    }

    pub fn merge(&mut self, patch: &BTreeMap<String, bool>) {
        for (name, enabled) in patch {
            self.0.insert(name.clone(), *enabled);
        }
    }
}

pub fn validate_command_patch(patch: &BTreeMap<String, bool>) -> Result<()> {
    for name in patch.keys() {
        let ok = !name.is_empty()
            && name.len() <= MAX_COMMAND_NAME_LEN
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !ok {
            return Err(Error::Validation(format!("invalid command name: {name:?}")));
        }
    }
    Ok(())
}

// ============== Prompt ==============

/// Blank prompts mean "use the default", the same as `null`.
pub fn normalize_prompt(prompt: Option<String>) -> Result<Option<String>> {
    let Some(p) = prompt else {
        return Ok(None);
    };
    if p.trim().is_empty() {
        return Ok(None);
    }
    let len = p.chars().count();
    if len > MAX_PROMPT_CHARS {
        return Err(Error::Validation(format!(
            "systemPrompt is {len} characters, limit is {MAX_PROMPT_CHARS}"
        )));
    }
    Ok(Some(p))
}

// ============== Record ==============

/// One guild's stored record.
///
/// Only `guildId` is required on read. Top-level keys not modeled here are
/// carried in `extra` so a write never drops them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuildConfig {
    pub guild_id: GuildId,
    #[serde(default)]
    pub guild_name: String,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub commands: CommandToggles,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub updated_at: DateTime<Utc>,
    #[serde(default = "system_actor")]
    pub updated_by: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn system_actor() -> String {
    SYSTEM_ACTOR.to_string()
}

/// RFC 3339, or an ISO timestamp without offset taken as UTC. Anything else
/// reads as the epoch so the next stamp still moves forward.
fn lenient_timestamp<'de, D>(de: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(de)?;
    let parsed = raw.as_str().and_then(|s| {
        DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|t| t.and_utc())
            })
    });
    Ok(parsed.unwrap_or_default())
}

impl GuildConfig {
    pub fn with_defaults(guild_id: GuildId, guild_name: &str, now: DateTime<Utc>) -> Self {
        Self {
            guild_id,
            guild_name: guild_name.to_string(),
            settings: Settings::default(),
            commands: CommandToggles::default(),
            system_prompt: None,
            updated_at: now,
            updated_by: SYSTEM_ACTOR.to_string(),
            extra: Map::new(),
        }
    }

    /// Record who changed the config and when.
    ///
    /// `updated_at` never goes backwards or repeats, even if the clock does.
    pub fn stamp(&mut self, actor: &str, now: DateTime<Utc>) {
        let floor = self.updated_at + Duration::milliseconds(1);
        self.updated_at = if now >= floor { now } else { floor };
        self.updated_by = actor.to_string();
    }

    pub fn is_command_enabled(&self, name: &str) -> bool {
        self.commands.is_enabled(name)
    }

    pub fn effective_system_prompt(&self) -> &str {
        match self.system_prompt.as_deref() {
            Some(p) if !p.trim().is_empty() => p,
            _ => DEFAULT_SYSTEM_PROMPT,
        }
    }

    pub fn skip_categories(&self) -> BTreeSet<&str> {
        self.settings
            .skip_categories
            .iter()
            .map(String::as_str)
            .collect()
    }
}
