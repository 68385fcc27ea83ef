use tracing::{info, warn};

use relay_core::{
    domain::MessageRef,
    formatting::{format_status_html, on_off},
    messaging::types::InlineKeyboard,
    relay::{StartOutcome, StatusProvider},
    Result,
};

use super::menus;
use crate::router::AppState;

/// What a button press produces: an optional menu redraw and the toast text.
struct Reply {
    view: Option<(String, InlineKeyboard)>,
    toast: Option<String>,
    alert: bool,
}

impl Reply {
    fn view(html: String, keyboard: InlineKeyboard) -> Self {
        Self {
            view: Some((html, keyboard)),
            toast: None,
            alert: false,
        }
    }

    fn toast(mut self, text: impl Into<String>) -> Self {
        self.toast = Some(text.into());
        self
    }

    fn alert(text: impl Into<String>) -> Self {
        Self {
            view: None,
            toast: Some(text.into()),
            alert: true,
        }
    }
}

pub(crate) async fn handle(
    state: &AppState,
    callback_id: &str,
    message: Option<MessageRef>,
    data: &str,
) {
    info!(action = data, "Button pressed");
    let reply = match dispatch(state, data).await {
        Ok(r) => r,
        Err(e) => {
            warn!(action = data, "Button action failed: {e}");
            Reply::alert(format!("❌ {e}"))
        }
    };

    if let (Some((html, keyboard)), Some(msg)) = (reply.view, message) {
        if let Err(e) = state.messenger.edit_html(msg, &html, Some(keyboard)).await {
            warn!("Failed to redraw menu: {e}");
        }
    }

    // Telegram keeps the button spinner until the query is answered.
    if let Err(e) = state
        .messenger
        .answer_callback(callback_id, reply.toast.as_deref(), reply.alert)
        .await
    {
        warn!("Failed to answer callback: {e}");
    }
}

async fn main_view(state: &AppState) -> Reply {
    let status = state.relay.status().await;
    Reply::view(menus::main_menu_text(&status), menus::main_menu(&status))
}

async fn settings_view(state: &AppState) -> Reply {
    let status = state.relay.status().await;
    Reply::view(menus::settings_text(&status), menus::settings_menu(&status))
}

async fn dispatch(state: &AppState, data: &str) -> Result<Reply> {
    let relay = &state.relay;
    let settings = relay.settings();

    let reply = match data {
        "refresh" | "back" => main_view(state).await,

        "status" | "stats" => {
            let status = relay.status().await;
            Reply::view(format_status_html(&status), menus::back_only())
        }

        "set_source" => Reply::view(
            "📥 <b>Set source channel</b>\n\n\
             Send /source &lt;channel_id or @username&gt;\n\n\
             Tip: forward any post from the channel here to see its ID."
                .to_string(),
            menus::back_only(),
        ),

        "set_dest" => Reply::view(
            "📤 <b>Set destination channel</b>\n\n\
             Send /dest &lt;channel_id or @username&gt;\n\n\
             The bot must be an admin of the destination channel."
                .to_string(),
            menus::back_only(),
        ),

        "start" => {
            let toast = match relay.start_copy().await? {
                StartOutcome::Started { from_id } => format!("🚀 Started from ID {from_id}"),
                StartOutcome::AlreadyRunning => "⚠️ Already running!".to_string(),
            };
            main_view(state).await.toast(toast)
        }

        "stop" => {
            let toast = if relay.stop_copy() {
                "⏹️ Stopping..."
            } else {
                "ℹ️ Not running"
            };
            main_view(state).await.toast(toast)
        }

        "toggle_auto" => {
            let (on, _) = settings
                .update(|s| {
                    s.auto_mode = !s.auto_mode;
                    s.auto_mode
                })
                .await?;
            main_view(state).await.toast(format!("Auto mode: {}", on_off(on)))
        }

        "toggle_notify" => {
            let (on, _) = settings
                .update(|s| {
                    s.notifications = !s.notifications;
                    s.notifications
                })
                .await?;
            settings_view(state)
                .await
                .toast(format!("Notifications: {}", on_off(on)))
        }

        "toggle_keepalive" => {
            let (on, _) = settings
                .update(|s| {
                    s.keep_alive = !s.keep_alive;
                    s.keep_alive
                })
                .await?;
            settings_view(state)
                .await
                .toast(format!("Keep-alive: {}", on_off(on)))
        }

        "settings" => settings_view(state).await,

        "set_delay" => Reply::alert("Send /delay <seconds> (minimum 1)"),
        "set_batch" => Reply::alert("Send /batchsize <10-200>"),
        "set_batch_delay" => Reply::alert("Send /batchdelay <seconds> (minimum 30)"),

        other => {
            warn!(action = other, "Unknown button");
            Reply::alert("Unknown action")
        }
    };
    Ok(reply)
}
