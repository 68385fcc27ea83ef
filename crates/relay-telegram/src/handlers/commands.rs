use relay_core::{
    channels::MediaKind,
    domain::{ChannelRef, ChatId, MessageId},
    errors::Error,
    formatting::{code, escape_html, format_duration, format_status_html, on_off, split_lines, SAFE_MESSAGE_LEN},
    logging,
    recovery::PositionMatch,
    relay::{StartOutcome, StatusProvider},
    settings::SpeedPreset,
    Result,
};
use strum::VariantNames;
use tracing::{info, warn};

use super::menus;
use crate::router::AppState;

const LOG_LINES: usize = 20;
const DEFAULT_LAST: usize = 10;
const MAX_LAST: usize = 50;

pub(crate) struct CommandContext {
    pub chat: ChatId,
    /// Channel a replied-to or forwarded message came from.
    pub forwarded: Option<(i64, Option<String>)>,
}

/// Telegram may send `/cmd@botname arg1 ...`.
pub(crate) fn parse_command(text: &str) -> (String, String) {
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

fn parse_switch(arg: &str) -> Option<bool> {
    match arg.trim().to_lowercase().as_str() {
        "on" | "true" | "1" | "yes" | "enable" => Some(true),
        "off" | "false" | "0" | "no" | "disable" => Some(false),
        _ => None,
    }
}

fn parse_number(arg: &str, usage: &str) -> Result<i64> {
    arg.trim()
        .parse::<i64>()
        .map_err(|_| Error::Invalid(format!("usage: {usage}")))
}

pub(crate) async fn handle(state: &AppState, ctx: &CommandContext, text: &str) {
    let (cmd, arg) = parse_command(text);
    info!(command = %cmd, "Command received");
    if let Err(e) = run(state, ctx, &cmd, &arg).await {
        warn!(command = %cmd, "Command failed: {e}");
        let _ = state
            .messenger
            .send_html(ctx.chat, &format!("❌ {}", escape_html(&e.to_string())))
            .await;
    }
}

async fn reply(state: &AppState, ctx: &CommandContext, html: &str) -> Result<()> {
    state.messenger.send_html(ctx.chat, html).await?;
    Ok(())
}

async fn run(state: &AppState, ctx: &CommandContext, cmd: &str, arg: &str) -> Result<()> {
    let relay = &state.relay;
    let settings = relay.settings();

    match cmd {
        "start" | "menu" => {
            let status = relay.status().await;
            let mut html = menus::main_menu_text(&status);
            if cmd == "start" {
                html.push_str("\n\nUse the buttons below or /help for all commands.");
            }
            state
                .messenger
                .send_keyboard(ctx.chat, &html, menus::main_menu(&status))
                .await?;
            Ok(())
        }

        "help" => reply(state, ctx, HELP).await,

        "forward" => match relay.start_copy().await? {
            StartOutcome::Started { from_id } => {
                reply(
                    state,
                    ctx,
                    &format!("🚀 <b>Forwarding started</b>\n\nStarting from message ID {from_id}"),
                )
                .await
            }
            StartOutcome::AlreadyRunning => reply(state, ctx, "⚠️ Already running!").await,
        },

        "stop" | "stopforward" => {
            let html = if relay.stop_copy() {
                "⏹️ Stopping after the current message..."
            } else {
                "ℹ️ Forwarding is not running"
            };
            reply(state, ctx, html).await
        }

        "status" => {
            let status = relay.status().await;
            reply(state, ctx, &format_status_html(&status)).await
        }

        "progress" => {
            let status = relay.status().await;
            reply(state, ctx, &progress_report(&status)).await
        }

        "health" => {
            let status = relay.status().await;
            let db = match relay.progress().database().mapping_count().await {
                Ok(_) => "✅ OK".to_string(),
                Err(e) => format!("❌ {}", escape_html(&e.to_string())),
            };
            let http = if state.cfg.http_enabled {
                format!("✅ {}", code(&state.cfg.http_addr.to_string()))
            } else {
                "disabled".to_string()
            };
            let html = format!(
                "💚 <b>Health</b>\n\n\
                 <b>Uptime:</b> {}\n\
                 <b>Forwarding:</b> {}\n\
                 <b>Database:</b> {db}\n\
                 <b>HTTP:</b> {http}\n\
                 <b>Keep-alive:</b> {}",
                format_duration(status.uptime_secs),
                if status.running { "🟢 running" } else { "🔴 stopped" },
                on_off(status.keep_alive),
            );
            reply(state, ctx, &html).await
        }

        "logs" => {
            let lines = logging::tail_lines(&state.cfg.log_file, LOG_LINES)?;
            if lines.is_empty() {
                return reply(state, ctx, "📜 Log file is empty").await;
            }
            let body = lines.join("\n");
            for chunk in split_lines(&body, SAFE_MESSAGE_LEN - 32) {
                reply(state, ctx, &format!("<pre>{}</pre>", escape_html(&chunk))).await?;
            }
            Ok(())
        }

        "getid" => {
            let html = match &ctx.forwarded {
                Some((id, title)) => format!(
                    "📡 <b>{}</b>\nChannel ID: <code>{id}</code>",
                    escape_html(title.as_deref().unwrap_or("Unknown"))
                ),
                None => format!(
                    "💬 This chat ID: <code>{}</code>\n\nForward a channel post here (or reply /getid to one) to see the channel's ID.",
                    ctx.chat
                ),
            };
            reply(state, ctx, &html).await
        }

        "source" | "dest" => {
            if arg.is_empty() {
                return Err(Error::Invalid(format!(
                    "usage: /{cmd} <channel_id or @username>"
                )));
            }
            let channel: ChannelRef = arg.parse()?;
            let change = if cmd == "source" {
                relay.set_source(&channel).await?
            } else {
                relay.set_destination(&channel).await?
            };
            let label = if cmd == "source" { "Source" } else { "Destination" };
            let mut html = format!(
                "✅ <b>{label} set</b>\n\n{}",
                escape_html(&change.info.label())
            );
            if cmd == "source" && change.changed() && change.offset > 0 {
                html.push_str(&format!(
                    "\n\n⚠️ The resume offset is still {}. Use /reset confirm to start the new source from the beginning.",
                    change.offset
                ));
            }
            reply(state, ctx, &html).await
        }

        "auto" | "notify" | "keepalive" => {
            let current = settings.get().await;
            let value = match cmd {
                "auto" => current.auto_mode,
                "notify" => current.notifications,
                _ => current.keep_alive,
            };
            let Some(on) = parse_switch(arg) else {
                return reply(
                    state,
                    ctx,
                    &format!("Currently {}\n\nUsage: /{cmd} on|off", on_off(value)),
                )
                .await;
            };
            settings
                .update(|s| match cmd {
                    "auto" => s.auto_mode = on,
                    "notify" => s.notifications = on,
                    _ => s.keep_alive = on,
                })
                .await?;
            let name = match cmd {
                "auto" => "Auto mode",
                "notify" => "Notifications",
                _ => "Keep-alive",
            };
            reply(state, ctx, &format!("{name}: {}", on_off(on))).await
        }

        "delay" => {
            let n = parse_number(arg, "/delay <seconds>")?;
            let (v, _) = settings.update(|s| s.set_forward_delay(n)).await?;
            reply(state, ctx, &format!("⏱️ Delay set to {v}s per message")).await
        }

        "batchsize" => {
            let n = parse_number(arg, "/batchsize <10-200>")?;
            let (v, _) = settings.update(|s| s.set_batch_size(n)).await?;
            reply(state, ctx, &format!("📦 Batch size set to {v}")).await
        }

        "batchdelay" => {
            let n = parse_number(arg, "/batchdelay <seconds, min 30>")?;
            let (v, _) = settings.update(|s| s.set_batch_delay(n)).await?;
            reply(state, ctx, &format!("💤 Batch delay set to {v}s")).await
        }

        "notifyinterval" => {
            let n = parse_number(arg, "/notifyinterval <seconds, min 30>")?;
            let (v, _) = settings.update(|s| s.set_notify_interval(n)).await?;
            reply(state, ctx, &format!("🔔 Routine notices at most every {v}s")).await
        }

        "speed" => {
            let Ok(preset) = arg.parse::<SpeedPreset>() else {
                return reply(state, ctx, SPEED_HELP).await;
            };
            let (_, s) = settings.update(|s| s.apply_preset(preset)).await?;
            reply(
                state,
                ctx,
                &format!(
                    "{}\n\nDelay: {}s | Batch: {} | Batch delay: {}s",
                    preset.description(),
                    s.forward_delay,
                    s.batch_size,
                    s.batch_delay
                ),
            )
            .await
        }

        "skip" => {
            if arg.is_empty() {
                let current = settings.get().await.skip_media_types;
                let list = if current.is_empty() {
                    "none".to_string()
                } else {
                    current.iter().map(|k| k.to_string()).collect::<Vec<_>>().join(", ")
                };
                return reply(
                    state,
                    ctx,
                    &format!(
                        "🚫 Skipping: {list}\n\nUsage: /skip &lt;kinds...&gt; or /skip clear\nKinds: {}",
                        MediaKind::VARIANTS.join(", ")
                    ),
                )
                .await;
            }
            let kinds = if arg.eq_ignore_ascii_case("clear") {
                Vec::new()
            } else {
                parse_kinds(arg)?
            };
            let (_, s) = settings
                .update(|s| s.skip_media_types = kinds)
                .await?;
            let html = if s.skip_media_types.is_empty() {
                "✅ Skip list cleared".to_string()
            } else {
                format!(
                    "🚫 Skipping: {}",
                    s.skip_media_types
                        .iter()
                        .map(|k| k.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            };
            reply(state, ctx, &html).await
        }

        "reset" => {
            if !arg.eq_ignore_ascii_case("confirm") {
                return reply(
                    state,
                    ctx,
                    "⚠️ This resets the offset and the forwarded count to 0.\n\nSend /reset confirm to proceed.",
                )
                .await;
            }
            relay.reset().await?;
            reply(state, ctx, "🔄 Progress reset. The next run starts from message ID 1.").await
        }

        "setid" => {
            let id = parse_number(arg, "/setid <message_id>")?;
            let offset = relay.set_offset(id).await?;
            reply(
                state,
                ctx,
                &format!(
                    "✅ Offset set to {offset}\nNext message to copy: {}",
                    offset.saturating_add(1)
                ),
            )
            .await
        }

        "findpos" => {
            let mut it = arg.split_whitespace();
            let dest_id = it
                .next()
                .and_then(|s| s.parse::<i32>().ok())
                .ok_or_else(|| Error::Invalid("usage: /findpos <dest_msg_id> [start_id]".to_string()))?;
            let hint = match it.next() {
                Some(s) => Some(s.parse::<i32>().map_err(|_| {
                    Error::Invalid("usage: /findpos <dest_msg_id> [start_id]".to_string())
                })?),
                None => None,
            };

            reply(state, ctx, "🔍 Searching for the matching source message...").await?;
            let html = match relay.find_position(MessageId(dest_id), hint).await? {
                Some(PositionMatch::Logged { source_id }) => format!(
                    "✅ Found in the copy log: source ID {}\nOffset set; the next run starts at {}.",
                    source_id.0,
                    source_id.0.saturating_add(1)
                ),
                Some(PositionMatch::Scanned { source_id, scanned }) => format!(
                    "✅ Match found at source ID {} (scanned {scanned})\nOffset set; the next run starts at {}.",
                    source_id.0,
                    source_id.0.saturating_add(1)
                ),
                None => format!(
                    "❌ No matching message within the last {} source IDs.\nTry /findpos {dest_id} &lt;start_id&gt; or set it with /setid.",
                    state.cfg.find_scan_limit
                ),
            };
            reply(state, ctx, &html).await
        }

        "last" => {
            let n = if arg.is_empty() {
                DEFAULT_LAST
            } else {
                parse_number(arg, "/last [n]")?.clamp(1, MAX_LAST as i64) as usize
            };
            let rows = relay.recent_copies(n).await?;
            if rows.is_empty() {
                return reply(state, ctx, "📭 Nothing copied yet").await;
            }
            let mut html = format!("🧾 <b>Last {} copies</b>\n\n", rows.len());
            for r in rows {
                html.push_str(&format!(
                    "{} → {}  <i>{}</i>\n",
                    r.source_id.0,
                    r.destination_id.0,
                    escape_html(&r.copied_at)
                ));
            }
            reply(state, ctx, &html).await
        }

        _ => reply(state, ctx, "❓ Unknown command. Send /help for the list.").await,
    }
}

fn parse_kinds(arg: &str) -> Result<Vec<MediaKind>> {
    let mut kinds = Vec::new();
    for raw in arg.split(|c: char| c == ',' || c.is_whitespace()).filter(|s| !s.is_empty()) {
        let kind: MediaKind = raw.parse().map_err(|_| {
            Error::Invalid(format!(
                "unknown media kind '{raw}'; valid: {}",
                MediaKind::VARIANTS.join(", ")
            ))
        })?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    Ok(kinds)
}

fn progress_report(s: &relay_core::relay::StatusSnapshot) -> String {
    let remaining = (s.head_id - s.last_forwarded_id).max(0) as u64;
    let mut html = format!(
        "📈 <b>Progress</b>\n\n\
         <b>Forwarded:</b> {}\n\
         <b>Last ID:</b> {}\n\
         <b>Highest seen ID:</b> {}\n\
         <b>Status:</b> {}",
        s.forwarded_count, s.last_forwarded_id, s.head_id, s.status
    );
    if remaining > 0 {
        let batches = remaining / u64::from(s.batch_size.max(1));
        let eta = remaining
            .saturating_mul(s.forward_delay)
            .saturating_add(batches.saturating_mul(s.batch_delay));
        html.push_str(&format!(
            "\n<b>Remaining (approx.):</b> {remaining}\n<b>ETA:</b> ~{}",
            format_duration(eta)
        ));
    }
    if let Some(at) = &s.updated_at {
        html.push_str(&format!("\n<b>Updated:</b> {}", escape_html(at)));
    }
    html
}

const HELP: &str = "🤖 <b>Channel Relay</b>\n\n\
<b>Control</b>\n\
/menu - Button menu\n\
/forward - Start copying history\n\
/stop - Stop after the current message\n\
/status - Full status\n\
/progress - Progress and ETA\n\
/health - Health check\n\
/logs - Last log lines\n\n\
<b>Channels</b>\n\
/getid - Show a chat or forwarded channel ID\n\
/source &lt;id|@name&gt; - Set source channel\n\
/dest &lt;id|@name&gt; - Set destination channel\n\n\
<b>Settings</b>\n\
/auto on|off - Copy new posts live\n\
/notify on|off - Routine notifications\n\
/keepalive on|off - Heartbeat and self-ping\n\
/delay &lt;s&gt; - Delay per message\n\
/batchsize &lt;n&gt; - Messages per batch (10-200)\n\
/batchdelay &lt;s&gt; - Pause between batches\n\
/notifyinterval &lt;s&gt; - Minimum gap between routine notices\n\
/speed safe|balanced|fast|turbo - Presets\n\
/skip &lt;kinds&gt;|clear - Skip media kinds\n\n\
<b>Position</b>\n\
/setid &lt;id&gt; - Set the resume offset\n\
/findpos &lt;dest_id&gt; [start_id] - Recover the offset from a copied message\n\
/last [n] - Recently copied messages\n\
/reset confirm - Reset offset and count";

const SPEED_HELP: &str = "⚡ <b>Speed presets</b>\n\n\
/speed safe - 3s delay, 50 per batch, 300s pause\n\
/speed balanced - 2s delay, 100 per batch, 120s pause\n\
/speed fast - 1s delay, 150 per batch, 90s pause\n\
/speed turbo - 1s delay, 200 per batch, 60s pause";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{harness, ADMIN};

    fn ctx() -> CommandContext {
        CommandContext {
            chat: ChatId(ADMIN),
            forwarded: None,
        }
    }

    #[test]
    fn parses_bot_suffix_and_args() {
        assert_eq!(
            parse_command("/findpos@relay_bot 120  900"),
            ("findpos".to_string(), "120  900".to_string())
        );
        assert_eq!(parse_command("/STATUS"), ("status".to_string(), String::new()));
    }

    #[test]
    fn kinds_parse_with_commas_and_dedupe() {
        assert_eq!(
            parse_kinds("sticker, photo sticker").unwrap(),
            vec![MediaKind::Sticker, MediaKind::Photo]
        );
        assert!(parse_kinds("sticker gif").is_err());
    }

    #[tokio::test]
    async fn delay_is_clamped_and_persisted() {
        let h = harness().await;
        handle(&h.state, &ctx(), "/delay 0").await;
        assert_eq!(h.state.relay.settings().get().await.forward_delay, 1);
        assert!(h.messenger.last().await.contains("1s"));
    }

    #[tokio::test]
    async fn speed_preset_updates_all_values() {
        let h = harness().await;
        handle(&h.state, &ctx(), "/speed fast").await;
        let s = h.state.relay.settings().get().await;
        assert_eq!((s.forward_delay, s.batch_size, s.batch_delay), (1, 150, 90));

        handle(&h.state, &ctx(), "/speed warp").await;
        assert!(h.messenger.last().await.contains("Speed presets"));
    }

    #[tokio::test]
    async fn bad_arguments_reply_with_usage() {
        let h = harness().await;
        handle(&h.state, &ctx(), "/batchsize lots").await;
        assert!(h.messenger.last().await.contains("usage: /batchsize"));
    }

    #[tokio::test]
    async fn forward_without_channels_is_an_error_reply() {
        let h = harness().await;
        handle(&h.state, &ctx(), "/forward").await;
        assert!(h.messenger.last().await.starts_with("❌"));
        assert!(!h.state.relay.is_running());
    }

    #[tokio::test]
    async fn source_accepts_bare_id_and_normalizes() {
        let h = harness().await;
        handle(&h.state, &ctx(), "/source 2616886749").await;
        assert_eq!(
            h.state.relay.settings().get().await.source_channel,
            Some(ChatId(-1002616886749))
        );
        assert!(h.messenger.last().await.contains("Source set"));
    }

    #[tokio::test]
    async fn reset_needs_confirmation() {
        let h = harness().await;
        handle(&h.state, &ctx(), "/setid 500").await;
        handle(&h.state, &ctx(), "/reset").await;
        assert_eq!(h.state.relay.progress().snapshot().await.last_forwarded_id, 500);

        handle(&h.state, &ctx(), "/reset confirm").await;
        assert_eq!(h.state.relay.progress().snapshot().await.last_forwarded_id, 0);
    }

    #[tokio::test]
    async fn toggles_report_current_state_without_argument() {
        let h = harness().await;
        handle(&h.state, &ctx(), "/auto").await;
        assert!(h.messenger.last().await.contains("Usage: /auto on|off"));

        handle(&h.state, &ctx(), "/auto on").await;
        assert!(h.state.relay.settings().get().await.auto_mode);
        handle(&h.state, &ctx(), "/keepalive off").await;
        assert!(!h.state.relay.settings().get().await.keep_alive);
    }

    #[tokio::test]
    async fn skip_sets_and_clears() {
        let h = harness().await;
        handle(&h.state, &ctx(), "/skip sticker poll").await;
        assert_eq!(
            h.state.relay.settings().get().await.skip_media_types,
            vec![MediaKind::Sticker, MediaKind::Poll]
        );
        handle(&h.state, &ctx(), "/skip clear").await;
        assert!(h.state.relay.settings().get().await.skip_media_types.is_empty());
    }

    #[tokio::test]
    async fn getid_reports_forwarded_channel() {
        let h = harness().await;
        let ctx = CommandContext {
            chat: ChatId(ADMIN),
            forwarded: Some((-1007, Some("News".to_string()))),
        };
        handle(&h.state, &ctx, "/getid").await;
        let last = h.messenger.last().await;
        assert!(last.contains("-1007"));
        assert!(last.contains("News"));
    }

    #[test]
    fn progress_report_estimates_remaining() {
        let mut s = crate::handlers::test_support::snapshot();
        s.head_id = 200;
        s.last_forwarded_id = 100;
        s.forward_delay = 2;
        s.batch_size = 50;
        s.batch_delay = 60;
        let html = progress_report(&s);
        assert!(html.contains("Remaining (approx.):</b> 100"));
        // 100 * 2s + 2 batches * 60s = 320s
        assert!(html.contains("5m 20s"));
    }

    #[test]
    fn progress_report_survives_absurd_pacing() {
        let mut s = crate::handlers::test_support::snapshot();
        s.head_id = i32::MAX;
        s.forward_delay = u64::MAX;
        s.batch_delay = u64::MAX;
        s.batch_size = 1;
        assert!(progress_report(&s).contains("ETA"));
    }

    #[tokio::test]
    async fn setid_at_the_top_of_the_range_reports_next_id() {
        let h = harness().await;
        handle(&h.state, &ctx(), "/setid 99999999999").await;
        assert!(h.messenger.last().await.contains(&format!("Next message to copy: {}", i32::MAX)));
    }
}
