//! Telegram HTML formatting for admin replies and notices.

use crate::{domain::ChatId, relay::StatusSnapshot};

/// Telegram's hard limit is 4096; leave room for tags.
pub const SAFE_MESSAGE_LEN: usize = 4000;

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn code(text: &str) -> String {
    format!("<code>{}</code>", escape_html(text))
}

pub fn on_off(flag: bool) -> &'static str {
    if flag {
        "ON ✅"
    } else {
        "OFF ❌"
    }
}

pub fn channel_or_unset(id: Option<ChatId>) -> String {
    id.map(|c| code(&c.to_string()))
        .unwrap_or_else(|| "Not set".to_string())
}

pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        return format!("{hours}h {mins}m {secs}s");
    }
    if mins > 0 {
        return format!("{mins}m {secs}s");
    }
    format!("{secs}s")
}

/// Full status report used by `/status`, the stats button and hourly notices.
pub fn format_status_html(s: &StatusSnapshot) -> String {
    let state = if s.running {
        "🟢 Running".to_string()
    } else {
        format!("🔴 Stopped ({})", s.status)
    };
    let skip = if s.skip_media_types.is_empty() {
        "none".to_string()
    } else {
        s.skip_media_types
            .iter()
            .map(|k| k.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };

    format!(
        "📊 <b>Bot Status</b>\n\n\
         <b>State:</b> {state}\n\
         <b>Source:</b> {}\n\
         <b>Destination:</b> {}\n\n\
         <b>Forwarded:</b> {}\n\
         <b>Last ID:</b> {}\n\
         <b>Highest seen ID:</b> {}\n\
         <b>Copy log entries:</b> {}\n\n\
         <b>Delay:</b> {}s | <b>Batch:</b> {} | <b>Batch delay:</b> {}s\n\
         <b>Skip:</b> {}\n\
         <b>Auto mode:</b> {}\n\
         <b>Notifications:</b> {} (every {}s)\n\
         <b>Keep-alive:</b> {}\n\
         <b>Uptime:</b> {}",
        channel_or_unset(s.source_channel),
        channel_or_unset(s.destination_channel),
        s.forwarded_count,
        s.last_forwarded_id,
        s.head_id,
        s.logged_copies,
        s.forward_delay,
        s.batch_size,
        s.batch_delay,
        escape_html(&skip),
        on_off(s.auto_mode),
        on_off(s.notifications),
        s.notify_interval,
        on_off(s.keep_alive),
        format_duration(s.uptime_secs),
    )
}

/// Split on line boundaries so each chunk fits in one message.
pub fn split_lines(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(16);
    let mut out = Vec::new();
    let mut chunk = String::new();
    for line in text.lines() {
        let line: String = if line.len() > limit {
            line.chars().take(limit - 3).chain("...".chars()).collect()
        } else {
            line.to_string()
        };
        if !chunk.is_empty() && chunk.len() + 1 + line.len() > limit {
            out.push(std::mem::take(&mut chunk));
        }
        if !chunk.is_empty() {
            chunk.push('\n');
        }
        chunk.push_str(&line);
    }
    if !chunk.is_empty() {
        out.push(chunk);
    }
    out
}
