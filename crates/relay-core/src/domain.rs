use std::{fmt, str::FromStr, sync::OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

/// Telegram chat id (numeric). Channels use the `-100…` form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub i32);

/// A stable reference to a Telegram message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the admin referred to a channel in `/source` and `/dest`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelRef {
    Id(ChatId),
    /// Public username, stored with the leading `@`.
    Username(String),
}

fn username_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]{3,31}$").expect("valid regex"))
}

/// Bot API addresses channels as `-100<id>`; tools often print the bare id.
pub fn normalize_channel_id(id: i64) -> ChatId {
    if id > 0 {
        let s = format!("-100{id}");
        return ChatId(s.parse().unwrap_or(-id));
    }
    ChatId(id)
}

impl FromStr for ChannelRef {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let text = raw.trim();
        if text.is_empty() {
            return Err(Error::Invalid("empty channel reference".to_string()));
        }

        if let Ok(id) = text.parse::<i64>() {
            if id == 0 {
                return Err(Error::Invalid("channel id cannot be 0".to_string()));
            }
            return Ok(ChannelRef::Id(normalize_channel_id(id)));
        }

        let name = text
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_start_matches("t.me/")
            .trim_start_matches("telegram.me/")
            .trim_start_matches('@')
            .trim_end_matches('/');

        if username_re().is_match(name) {
            return Ok(ChannelRef::Username(format!("@{name}")));
        }

        Err(Error::Invalid(format!("not a channel id or username: {text}")))
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelRef::Id(id) => write!(f, "{id}"),
            ChannelRef::Username(name) => write!(f, "{name}"),
        }
    }
}

/// Resolved channel metadata shown back to the admin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: ChatId,
    pub title: Option<String>,
    pub username: Option<String>,
}

impl ChannelInfo {
    pub fn label(&self) -> String {
        let mut out = self.title.clone().unwrap_or_else(|| "Unknown".to_string());
        if let Some(u) = &self.username {
            out.push_str(&format!(" (@{u})"));
        }
        out.push_str(&format!("\nID: {}", self.id));
        out
    }
}
