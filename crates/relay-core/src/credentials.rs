//! Bot credential resolution.
//!
//! The credential comes from the environment when present; otherwise from an
//! on-disk session file, which may first be materialized from a base64 blob
//! (`SESSION_DATA`) so hosts without persistent disks can ship it as an env var.

use std::{fs, path::Path, sync::OnceLock};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use regex::Regex;
use tracing::{info, warn};

use crate::{config::Config, errors::Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialSource {
    Env,
    SessionFile,
}

#[derive(Clone)]
pub struct Credentials {
    pub token: String,
    pub source: CredentialSource,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{3,}:[A-Za-z0-9_-]{3,}$").expect("valid regex"))
}

pub fn resolve(cfg: &Config) -> Result<Credentials> {
    if let Some(token) = &cfg.bot_token {
        info!("Using bot credential from environment");
        return validated(token, CredentialSource::Env);
    }

    if !cfg.session_file.exists() {
        if let Some(blob) = &cfg.session_data {
            materialize_session_file(&cfg.session_file, blob)?;
            info!(path = %cfg.session_file.display(), "Session file created from SESSION_DATA");
        }
    }

    if cfg.session_file.exists() {
        info!(path = %cfg.session_file.display(), "Using file session");
        let txt = fs::read_to_string(&cfg.session_file)?;
        return validated(txt.trim(), CredentialSource::SessionFile);
    }

    warn!("No session found");
    Err(Error::Auth(
        "no credential: set BOT_TOKEN, SESSION_STRING or SESSION_DATA".to_string(),
    ))
}

fn validated(token: &str, source: CredentialSource) -> Result<Credentials> {
    let token = token.trim();
    if !token_re().is_match(token) {
        return Err(Error::Auth(
            "credential does not look like a bot token (<id>:<secret>)".to_string(),
        ));
    }
    Ok(Credentials {
        token: token.to_string(),
        source,
    })
}

fn materialize_session_file(path: &Path, blob: &str) -> Result<()> {
    let bytes = STANDARD
        .decode(blob.trim())
        .map_err(|e| Error::Auth(format!("SESSION_DATA is not valid base64: {e}")))?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes)?;
    Ok(())
}
