use std::{
    env, fs,
    net::IpAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

pub const DEFAULT_DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// Typed configuration for the dashboard server.
///
/// Everything comes from the environment (after an optional `.env` file).
#[derive(Clone, Debug)]
pub struct Config {
    // Discord
    pub discord_bot_token: String,
    pub discord_api_base: String,
    pub upstream_timeout: Duration,

    // HTTP
    pub bind_addr: IpAddr,
    pub port: u16,
    pub dashboard_origin: Option<String>,

    // Sessions
    pub session_ttl: Duration,
    pub session_cookie_secure: bool,

    // Persistence shared with the bot process
    pub guild_config_dir: PathBuf,
    pub stats_file: PathBuf,

    // Audit
    pub audit_log_path: PathBuf,
    pub audit_log_json: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        // Required env vars
        let discord_bot_token = env_str("DISCORD_BOT_TOKEN")
            .and_then(non_empty)
            .ok_or_else(|| {
                Error::Config("DISCORD_BOT_TOKEN environment variable is required".to_string())
            })?;

        let discord_api_base = env_str("DISCORD_API_BASE")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_DISCORD_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();
        let upstream_timeout =
            Duration::from_millis(env_u64("UPSTREAM_TIMEOUT_MS").unwrap_or(10_000));

        let bind_addr = match env_str("DASHBOARD_BIND_ADDR").and_then(non_empty) {
            Some(raw) => raw.trim().parse::<IpAddr>().map_err(|e| {
                Error::Config(format!("DASHBOARD_BIND_ADDR is not an IP address: {e}"))
            })?,
            None => IpAddr::from([127, 0, 0, 1]),
        };
        let port = match env_str("DASHBOARD_PORT").and_then(non_empty) {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|e| Error::Config(format!("DASHBOARD_PORT is not a port: {e}")))?,
            None => 3000,
        };
        let dashboard_origin = env_str("DASHBOARD_ORIGIN").and_then(non_empty);

        let session_ttl = Duration::from_secs(env_u64("SESSION_TTL_SECS").unwrap_or(3600));
        let session_cookie_secure = env_bool("SESSION_COOKIE_SECURE").unwrap_or(false);

        let guild_config_dir =
            env_path("GUILD_CONFIG_DIR").unwrap_or_else(|| PathBuf::from("guild_configs"));
        let stats_file =
            env_path("BOT_STATS_FILE").unwrap_or_else(|| PathBuf::from("bot_stats.json"));

        // The bot reads from the same directory; make sure it exists before the first write.
        fs::create_dir_all(&guild_config_dir)?;

        let audit_log_path = PathBuf::from(
            env_str("AUDIT_LOG_PATH").unwrap_or("/tmp/botdash-audit.log".to_string()),
        );
        let audit_log_json = env_bool("AUDIT_LOG_JSON").unwrap_or(true);

        Ok(Self {
            discord_bot_token,
            discord_api_base,
            upstream_timeout,
            bind_addr,
            port,
            dashboard_origin,
            session_ttl,
            session_cookie_secure,
            guild_config_dir,
            stats_file,
            audit_log_path,
            audit_log_json,
        })
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let Some((key, val)) = parse_dotenv_line(raw) else {
            continue;
        };
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv_line(raw: &str) -> Option<(String, String)> {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").unwrap_or(line);

    let (k, v) = line.split_once('=')?;
    let key = k.trim();
    if key.is_empty() {
        return None;
    }

    let mut val = v.trim().to_string();
    // Strip optional surrounding quotes.
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        val = val[1..val.len() - 1].to_string();
    }

    Some((key.to_string(), val))
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| parse_bool(&s))
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotenv_lines_strip_quotes_and_comments() {
        assert_eq!(parse_dotenv_line("# comment"), None);
        assert_eq!(parse_dotenv_line("   "), None);
        assert_eq!(
            parse_dotenv_line("DISCORD_BOT_TOKEN=\"abc\""),
            Some(("DISCORD_BOT_TOKEN".to_string(), "abc".to_string()))
        );
        assert_eq!(
            parse_dotenv_line("export DASHBOARD_PORT = '8080'"),
            Some(("DASHBOARD_PORT".to_string(), "8080".to_string()))
        );
        assert_eq!(parse_dotenv_line("=novalue"), None);
    }

    #[test]
    fn bool_parsing_is_lenient() {
        for v in ["1", "true", "YES", " on "] {
            assert!(parse_bool(v), "{v:?}");
        }
        for v in ["0", "false", "off", ""] {
            assert!(!parse_bool(v), "{v:?}");
        }
    }
}
