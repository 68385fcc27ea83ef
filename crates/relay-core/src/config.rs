use std::{
    env, fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{domain::ChatId, errors::Error, Result};

/// Typed process configuration, read once from the environment at startup.
///
/// Runtime settings that the admin can change from chat live in
/// [`crate::settings::BotSettings`] instead.
#[derive(Clone, Debug)]
pub struct Config {
    // Identity
    pub admin_id: i64,

    // Credentials
    pub bot_token: Option<String>,
    pub session_file: PathBuf,
    pub session_data: Option<String>,

    // Local state
    pub config_file: PathBuf,
    pub db_path: PathBuf,
    pub log_file: PathBuf,

    // Liveness
    pub http_enabled: bool,
    pub http_addr: SocketAddr,
    pub keepalive_url: Option<String>,
    pub keepalive_interval: Duration,

    // Copy loop tuning
    pub find_scan_limit: u32,
    pub max_id_gap: u32,
    pub error_delay: Duration,
    pub flood_delay: Duration,
    pub probe_delay: Duration,
    pub save_every: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        // Required env vars (reported together).
        let mut missing = Vec::new();
        let admin_id = env_i64("ADMIN_ID").filter(|id| *id != 0);
        if admin_id.is_none() {
            missing.push("ADMIN_ID");
        }

        let bot_token = env_str("BOT_TOKEN")
            .and_then(non_empty)
            .or_else(|| env_str("SESSION_STRING").and_then(non_empty));
        let session_file = session_file_path(
            &env_str("SESSION_FILE").unwrap_or_else(|| "bot_session".to_string()),
        );
        let session_data = env_str("SESSION_DATA").and_then(non_empty);
        if bot_token.is_none() && session_data.is_none() && !session_file.exists() {
            missing.push("BOT_TOKEN (or SESSION_STRING / SESSION_DATA)");
        }

        let Some(admin_id) = admin_id.filter(|_| missing.is_empty()) else {
            return Err(Error::Config(format!(
                "missing environment variables: {}",
                missing.join(", ")
            )));
        };

        let config_file =
            PathBuf::from(env_str("CONFIG_FILE").unwrap_or("bot_config.json".to_string()));
        let db_path = PathBuf::from(env_str("DB_PATH").unwrap_or("forwarder.db".to_string()));
        let log_file = log_file_from_env();

        let http_enabled = env_bool("HTTP_ENABLED").unwrap_or(true);
        let host = env_str("HTTP_HOST").unwrap_or("0.0.0.0".to_string());
        let port = env_u64("PORT").unwrap_or(8080);
        let http_addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|e| Error::Config(format!("invalid HTTP_HOST/PORT {host}:{port}: {e}")))?;

        let keepalive_url = env_str("KEEPALIVE_URL")
            .and_then(non_empty)
            .or_else(|| env_str("RENDER_EXTERNAL_URL").and_then(non_empty))
            .map(|u| u.trim_end_matches('/').to_string());
        let keepalive_interval =
            Duration::from_secs(env_u64("KEEPALIVE_INTERVAL").unwrap_or(600).max(30));

        let find_scan_limit = env_u64("FIND_SCAN_LIMIT").unwrap_or(1000).clamp(1, 10_000) as u32;
        let max_id_gap = env_u64("MAX_ID_GAP").unwrap_or(100).clamp(1, 10_000) as u32;
        let error_delay = Duration::from_secs(env_u64("ERROR_DELAY").unwrap_or(5));
        let flood_delay = Duration::from_secs(env_u64("FLOOD_DELAY").unwrap_or(60));
        let probe_delay = Duration::from_millis(env_u64("PROBE_DELAY_MS").unwrap_or(250));
        let save_every = env_u64("SAVE_EVERY").unwrap_or(10).max(1);

        Ok(Self {
            admin_id,
            bot_token,
            session_file,
            session_data,
            config_file,
            db_path,
            log_file,
            http_enabled,
            http_addr,
            keepalive_url,
            keepalive_interval,
            find_scan_limit,
            max_id_gap,
            error_delay,
            flood_delay,
            probe_delay,
            save_every,
        })
    }

    pub fn admin_chat(&self) -> ChatId {
        ChatId(self.admin_id)
    }
}

/// Log file location; needed before [`Config::load`] so its errors are logged.
pub fn log_file_from_env() -> PathBuf {
    PathBuf::from(env_str("LOG_FILE").unwrap_or("bot.log".to_string()))
}

fn session_file_path(base: &str) -> PathBuf {
    if base.ends_with(".session") {
        PathBuf::from(base)
    } else {
        PathBuf::from(format!("{base}.session"))
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

/// Load `KEY=value` pairs from a `.env` file without overriding existing env.
pub fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, unquote(v.trim()));
    }
}

fn unquote(val: &str) -> &str {
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return &val[1..val.len() - 1];
    }
    val
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_i64(key: &str) -> Option<i64> {
    env_str(key).and_then(|s| s.trim().parse::<i64>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s.trim().to_string())
    }
}

#[cfg(test)]
pub(crate) fn test_config(dir: &Path) -> Config {
    Config {
        admin_id: 42,
        bot_token: Some("123:abc".to_string()),
        session_file: dir.join("bot_session.session"),
        session_data: None,
        config_file: dir.join("bot_config.json"),
        db_path: dir.join("forwarder.db"),
        log_file: dir.join("bot.log"),
        http_enabled: false,
        http_addr: "127.0.0.1:0".parse().unwrap(),
        keepalive_url: None,
        keepalive_interval: Duration::from_secs(600),
        find_scan_limit: 1000,
        max_id_gap: 5,
        error_delay: Duration::from_secs(5),
        flood_delay: Duration::from_secs(60),
        probe_delay: Duration::from_millis(250),
        save_every: 10,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_file_gets_extension_once() {
        assert_eq!(
            session_file_path("userbot_session"),
            PathBuf::from("userbot_session.session")
        );
        assert_eq!(
            session_file_path("/data/bot.session"),
            PathBuf::from("/data/bot.session")
        );
    }

    #[test]
    fn unquote_strips_matching_quotes_only() {
        assert_eq!(unquote("\"abc\""), "abc");
        assert_eq!(unquote("'abc'"), "abc");
        assert_eq!(unquote("\"abc'"), "\"abc'");
        assert_eq!(unquote("x"), "x");
    }

    #[test]
    fn dotenv_does_not_override_existing_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(
            &path,
            "# comment\nRELAY_TEST_DOTENV_A=\"from file\"\nexport RELAY_TEST_DOTENV_B=2\n",
        )
        .unwrap();
        env::set_var("RELAY_TEST_DOTENV_B", "1");

        load_dotenv_if_present(&path);

        assert_eq!(env::var("RELAY_TEST_DOTENV_A").unwrap(), "from file");
        assert_eq!(env::var("RELAY_TEST_DOTENV_B").unwrap(), "1");
    }
}
