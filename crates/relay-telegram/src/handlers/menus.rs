use relay_core::{
    formatting::{channel_or_unset, on_off},
    messaging::types::{InlineButton, InlineKeyboard},
    relay::StatusSnapshot,
};

pub fn main_menu(status: &StatusSnapshot) -> InlineKeyboard {
    InlineKeyboard::default()
        .row(vec![
            InlineButton::new("📊 Status", "status"),
            InlineButton::new("📈 Stats", "stats"),
        ])
        .row(vec![
            InlineButton::new("📥 Set Source", "set_source"),
            InlineButton::new("📤 Set Destination", "set_dest"),
        ])
        .row(vec![if status.running {
            InlineButton::new("⏹️ Stop", "stop")
        } else {
            InlineButton::new("▶️ Start", "start")
        }])
        .row(vec![
            InlineButton::new(format!("🤖 Auto: {}", on_off(status.auto_mode)), "toggle_auto"),
            InlineButton::new("⚙️ Settings", "settings"),
        ])
        .row(vec![InlineButton::new("🔄 Refresh", "refresh")])
}

pub fn main_menu_text(status: &StatusSnapshot) -> String {
    let state = if status.running {
        "🟢 Running"
    } else {
        "🔴 Stopped"
    };
    format!(
        "🤖 <b>Channel Relay</b>\n\n\
         <b>Status:</b> {state}\n\
         <b>Source:</b> {}\n\
         <b>Destination:</b> {}\n\
         <b>Forwarded:</b> {}\n\
         <b>Last ID:</b> {}",
        channel_or_unset(status.source_channel),
        channel_or_unset(status.destination_channel),
        status.forwarded_count,
        status.last_forwarded_id,
    )
}

pub fn settings_menu(status: &StatusSnapshot) -> InlineKeyboard {
    InlineKeyboard::default()
        .row(vec![
            InlineButton::new(format!("⏱️ Delay: {}s", status.forward_delay), "set_delay"),
            InlineButton::new(format!("📦 Batch: {}", status.batch_size), "set_batch"),
        ])
        .row(vec![InlineButton::new(
            format!("💤 Batch delay: {}s", status.batch_delay),
            "set_batch_delay",
        )])
        .row(vec![
            InlineButton::new(
                format!("🔔 Notify: {}", on_off(status.notifications)),
                "toggle_notify",
            ),
            InlineButton::new(
                format!("💓 Keep-alive: {}", on_off(status.keep_alive)),
                "toggle_keepalive",
            ),
        ])
        .row(vec![InlineButton::new("⬅️ Back", "back")])
}

pub fn settings_text(status: &StatusSnapshot) -> String {
    format!(
        "⚙️ <b>Settings</b>\n\n\
         <b>Delay:</b> {}s per message\n\
         <b>Batch size:</b> {}\n\
         <b>Batch delay:</b> {}s\n\
         <b>Notify interval:</b> {}s\n\n\
         Change values with /delay, /batchsize, /batchdelay, /notifyinterval or /speed.",
        status.forward_delay, status.batch_size, status.batch_delay, status.notify_interval,
    )
}

pub fn back_only() -> InlineKeyboard {
    InlineKeyboard::default().row(vec![InlineButton::new("⬅️ Back", "back")])
}
