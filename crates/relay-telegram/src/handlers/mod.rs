//! Telegram update handlers.
//!
//! Every handler checks the admin first; the command and button logic works on
//! `relay-core` types only, so it can be driven without a live bot in tests.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message},
};
use tracing::{debug, warn};

use relay_core::{
    domain::{ChatId, MessageId, MessageRef, UserId},
    formatting::escape_html,
    security::is_authorized,
};

use crate::{router::AppState, snapshot_of};

mod callback;
mod commands;
pub mod menus;
#[cfg(test)]
mod test_support;

pub async fn handle_callback(q: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    let data = q.data.clone().unwrap_or_default();
    let message = q.message.as_ref().map(|m| MessageRef {
        chat_id: ChatId(m.chat.id.0),
        message_id: MessageId(m.id.0),
    });
    let user = Some(UserId(q.from.id.0 as i64));

    on_callback(&state, user, &q.id, message, &data).await;
    Ok(())
}

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let user = msg.from().map(|u| UserId(u.id.0 as i64));
    let forwarded = forwarded_channel(&msg)
        .or_else(|| msg.reply_to_message().and_then(forwarded_channel));

    on_message(&state, user, ChatId(msg.chat.id.0), forwarded, msg.text()).await;
    Ok(())
}

pub(crate) async fn on_callback(
    state: &AppState,
    user: Option<UserId>,
    callback_id: &str,
    message: Option<MessageRef>,
    data: &str,
) {
    if !is_authorized(user, state.cfg.admin_id) {
        warn!(user_id = ?user, "Unauthorized button press");
        let _ = state
            .messenger
            .answer_callback(callback_id, Some("Unauthorized"), true)
            .await;
        return;
    }

    callback::handle(state, callback_id, message, data).await;
}

pub(crate) async fn on_message(
    state: &AppState,
    user: Option<UserId>,
    chat: ChatId,
    forwarded: Option<(i64, Option<String>)>,
    text: Option<&str>,
) {
    if !is_authorized(user, state.cfg.admin_id) {
        debug!(chat_id = chat.0, "Ignoring message from non-admin");
        return;
    }

    if let Some(text) = text.filter(|t| t.starts_with('/')) {
        let ctx = commands::CommandContext { chat, forwarded };
        commands::handle(state, &ctx, text).await;
        return;
    }

    // A post forwarded from a channel: tell the admin its id.
    if let Some((id, title)) = forwarded {
        let html = format!(
            "📡 <b>Channel detected</b>\n\n{}\nID: <code>{id}</code>\n\nUse /source {id} or /dest {id}",
            escape_html(title.as_deref().unwrap_or("Unknown")),
        );
        let _ = state.messenger.send_html(chat, &html).await;
    }
}

pub async fn handle_channel_post(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let chat = ChatId(msg.chat.id.0);
    let post = snapshot_of(&msg);
    let id = post.id;
    if let Err(e) = state.relay.handle_channel_post(chat, post).await {
        warn!(chat = %chat, id, "Live copy failed: {e}");
    }
    Ok(())
}

fn forwarded_channel(msg: &Message) -> Option<(i64, Option<String>)> {
    let chat = msg.forward_from_chat()?;
    Some((chat.id.0, chat.title().map(str::to_string)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{harness, ADMIN};

    const STRANGER: i64 = 7;

    #[tokio::test]
    async fn non_admin_messages_are_ignored() {
        let h = harness().await;
        on_message(
            &h.state,
            Some(UserId(STRANGER)),
            ChatId(STRANGER),
            Some((-1007, Some("News".to_string()))),
            Some("/reset confirm"),
        )
        .await;
        on_message(&h.state, None, ChatId(STRANGER), None, Some("/status")).await;

        assert!(h.messenger.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn non_admin_button_press_gets_unauthorized_alert() {
        let h = harness().await;
        on_callback(&h.state, Some(UserId(STRANGER)), "cb1", None, "toggle_auto").await;

        assert!(!h.state.relay.settings().get().await.auto_mode);
        assert_eq!(
            h.messenger.last_answer().await,
            Some((Some("Unauthorized".to_string()), true))
        );
    }

    #[tokio::test]
    async fn admin_commands_and_forwards_are_handled() {
        let h = harness().await;
        on_message(&h.state, Some(UserId(ADMIN)), ChatId(ADMIN), None, Some("/help")).await;
        assert!(h.messenger.last().await.contains("/forward"));

        on_message(
            &h.state,
            Some(UserId(ADMIN)),
            ChatId(ADMIN),
            Some((-1007, Some("News".to_string()))),
            None,
        )
        .await;
        let last = h.messenger.last().await;
        assert!(last.contains("Channel detected"));
        assert!(last.contains("/source -1007"));
    }
}
