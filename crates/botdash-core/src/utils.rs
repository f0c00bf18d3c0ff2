use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{errors::Error, Result};

// ============== Timestamp Helpers ==============

/// RFC3339 timestamp in UTC (for logs/telemetry).
pub fn iso_timestamp_utc() -> String {
    Utc::now().to_rfc3339()
}

/// Current time truncated to whole milliseconds, the precision we persist.
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::<Utc>::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

// ============== Audit Logging ==============

const AUDIT_MAX_TEXT: usize = 500;

#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorized: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditEvent {
    fn base(event: &str, user_id: &str, username: &str, guild_id: Option<&str>) -> Self {
        Self {
            timestamp: iso_timestamp_utc(),
            event: event.to_string(),
            user_id: Some(user_id.to_string()),
            username: Some(username.to_string()),
            guild_id: guild_id.map(|s| s.to_string()),
            authorized: None,
            reason: None,
            action: None,
            change: None,
            error: None,
        }
    }

    pub fn auth(
        user_id: &str,
        username: &str,
        guild_id: &str,
        authorized: bool,
        reason: Option<&str>,
    ) -> Self {
        Self {
            authorized: Some(authorized),
            reason: reason.map(|s| s.to_string()),
            ..Self::base("auth", user_id, username, Some(guild_id))
        }
    }

    pub fn config_change(
        user_id: &str,
        username: &str,
        guild_id: &str,
        action: &str,
        change: serde_json::Value,
    ) -> Self {
        Self {
            action: Some(action.to_string()),
            change: Some(change),
            ..Self::base("config_change", user_id, username, Some(guild_id))
        }
    }

    pub fn error(user_id: &str, username: &str, guild_id: Option<&str>, error: &str) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::base("error", user_id, username, guild_id)
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuditLogger {
    path: PathBuf,
    json: bool,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>, json: bool) -> Self {
        Self {
            path: path.into(),
            json,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, mut event: AuditEvent) -> Result<()> {
        if let Some(s) = &event.reason {
            event.reason = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }
        if let Some(s) = &event.error {
            event.error = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }
        if let Some(v) = &event.change {
            event.change = Some(truncate_json_strings(v, AUDIT_MAX_TEXT));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if self.json {
            let line = serde_json::to_string(&event)?;
            writeln!(file, "{line}")?;
            return Ok(());
        }

        // Plain text format for readability.
        let mut out = String::new();
        out.push('\n');
        out.push_str(&"=".repeat(60));

        let value = serde_json::to_value(&event)?;
        let Some(obj) = value.as_object() else {
            return Err(Error::External(
                "audit event is not a JSON object".to_string(),
            ));
        };
        for (k, v) in obj {
            out.push('\n');
            out.push_str(k);
            out.push_str(": ");
            out.push_str(&json_value_to_display(v));
        }
        out.push('\n');

        file.write_all(out.as_bytes())?;
        Ok(())
    }

    /// Audit failures must never fail the request that triggered them.
    pub fn record(&self, event: AuditEvent) {
        if let Err(e) = self.write(event) {
            tracing::warn!(path = %self.path.display(), "audit log write failed: {e}");
        }
    }
}

pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}

fn truncate_json_strings(v: &serde_json::Value, max_str_len: usize) -> serde_json::Value {
    match v {
        serde_json::Value::String(s) => serde_json::Value::String(truncate_text(s, max_str_len)),
        serde_json::Value::Array(xs) => serde_json::Value::Array(
            xs.iter()
                .map(|x| truncate_json_strings(x, max_str_len))
                .collect(),
        ),
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), truncate_json_strings(v, max_str_len)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn json_value_to_display(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.to_string(),
        other => serde_json::to_string(other).unwrap_or_else(|_| "<unprintable>".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn tmp_file(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_nanos();
        let pid = std::process::id();
        PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}.log"))
    }

    #[test]
    fn truncate_text_adds_ellipsis() {
        let s = "a".repeat(AUDIT_MAX_TEXT + 10);
        let t = truncate_text(&s, AUDIT_MAX_TEXT);
        assert!(t.ends_with("..."));
        assert_eq!(t.chars().count(), AUDIT_MAX_TEXT + 3);
        assert_eq!(truncate_text("short", AUDIT_MAX_TEXT), "short");
    }

    #[test]
    fn now_millis_has_no_sub_millisecond_part() {
        let t = now_millis();
        assert_eq!(t.timestamp_subsec_nanos() % 1_000_000, 0);
    }

    #[test]
    fn audit_truncates_prompt_changes() {
        let log = AuditLogger::new(tmp_file("botdash-audit-test"), true);
        let prompt = "p".repeat(AUDIT_MAX_TEXT + 50);
        let ev = AuditEvent::config_change(
            "1",
            "alice",
            "42",
            "prompt",
            serde_json::json!({ "systemPrompt": prompt }),
        );
        log.write(ev).unwrap();
        let written = std::fs::read_to_string(log.path()).unwrap();
        assert!(written.contains("..."));
        assert!(!written.contains(&prompt));

        let line: serde_json::Value = serde_json::from_str(written.trim()).unwrap();
        assert_eq!(line["event"], "config_change");
        assert_eq!(line["guild_id"], "42");
    }

    #[test]
    fn audit_plain_text_lists_fields() {
        let log = AuditLogger::new(tmp_file("botdash-audit-plain"), false);
        log.write(AuditEvent::auth("1", "alice", "7", false, Some("bot is not in this guild")))
            .unwrap();
        let written = std::fs::read_to_string(log.path()).unwrap();
        assert!(written.contains("authorized: false"));
        assert!(written.contains("reason: bot is not in this guild"));
    }
}
