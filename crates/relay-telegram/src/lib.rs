//! Telegram adapter (teloxide).
//!
//! Implements the `relay-core` messaging and channel ports over the Bot API.

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup, ParseMode, Recipient},
    RequestError,
};

use tokio::time::sleep;
use tracing::debug;

pub mod handlers;
pub mod router;

use relay_core::{
    channels::{ChannelPort, MediaKind, MessageSnapshot},
    domain::{ChannelInfo, ChannelRef, ChatId, MessageId, MessageRef},
    errors::Error,
    messaging::{port::MessagingPort, types::InlineKeyboard},
    Result,
};

fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
    teloxide::types::ChatId(chat_id.0)
}

fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
    teloxide::types::MessageId(message_id.0)
}

pub(crate) fn map_err(e: RequestError) -> Error {
    match e {
        RequestError::RetryAfter(secs) => Error::RateLimited {
            retry_after: Some(secs),
        },
        RequestError::Api(api) => {
            let text = api.to_string();
            if text.to_lowercase().contains("chat not found") {
                Error::NotFound(text)
            } else {
                Error::Telegram(text)
            }
        }
        other => Error::Telegram(other.to_string()),
    }
}

/// The source id does not exist (deleted, service message, or never used).
fn is_missing_message(e: &RequestError) -> bool {
    let RequestError::Api(api) = e else {
        return false;
    };
    let text = api.to_string().to_lowercase();
    text.contains("message to copy not found")
        || text.contains("message to forward not found")
        || text.contains("message_id_invalid")
        || text.contains("message can't be copied")
        || text.contains("message not found")
}

fn keyboard_markup(keyboard: InlineKeyboard) -> InlineKeyboardMarkup {
    let rows: Vec<Vec<InlineKeyboardButton>> = keyboard
        .rows
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|b| InlineKeyboardButton::callback(b.label, b.callback_data))
                .collect()
        })
        .collect();
    InlineKeyboardMarkup::new(rows)
}

/// Text and media kind of a Telegram message.
pub fn snapshot_of(msg: &Message) -> MessageSnapshot {
    MessageSnapshot {
        id: msg.id.0,
        text: msg.text().or_else(|| msg.caption()).map(str::to_string),
        media: media_kind_of(msg),
    }
}

pub fn media_kind_of(msg: &Message) -> Option<MediaKind> {
    if msg.photo().is_some() {
        Some(MediaKind::Photo)
    } else if msg.video().is_some() {
        Some(MediaKind::Video)
    } else if msg.animation().is_some() {
        Some(MediaKind::Animation)
    } else if msg.document().is_some() {
        Some(MediaKind::Document)
    } else if msg.audio().is_some() {
        Some(MediaKind::Audio)
    } else if msg.voice().is_some() {
        Some(MediaKind::Voice)
    } else if msg.sticker().is_some() {
        Some(MediaKind::Sticker)
    } else if msg.video_note().is_some() {
        Some(MediaKind::VideoNote)
    } else if msg.poll().is_some() {
        Some(MediaKind::Poll)
    } else if msg.contact().is_some() {
        Some(MediaKind::Contact)
    } else if msg.location().is_some() {
        Some(MediaKind::Location)
    } else if msg.text().is_none() {
        Some(MediaKind::Other)
    } else {
        None
    }
}

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(RequestError::RetryAfter(secs)) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    sleep(secs).await;
                }
                Err(other) => return Err(map_err(other)),
            }
        }
    }
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        let msg = self
            .with_retry(|| {
                self.bot
                    .send_message(tg_chat(chat_id), html.to_string())
                    .parse_mode(ParseMode::Html)
            })
            .await?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn send_keyboard(
        &self,
        chat_id: ChatId,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        let markup = keyboard_markup(keyboard);
        let msg = self
            .with_retry(|| {
                self.bot
                    .send_message(tg_chat(chat_id), html.to_string())
                    .parse_mode(ParseMode::Html)
                    .reply_markup(markup.clone())
            })
            .await?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn edit_html(
        &self,
        msg: MessageRef,
        html: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<()> {
        let markup = keyboard.map(keyboard_markup);
        let res = self
            .with_retry(|| {
                let req = self
                    .bot
                    .edit_message_text(tg_chat(msg.chat_id), tg_msg_id(msg.message_id), html.to_string())
                    .parse_mode(ParseMode::Html);
                match markup.clone() {
                    Some(m) => req.reply_markup(m),
                    None => req,
                }
            })
            .await;

        match res {
            Ok(_) => Ok(()),
            // Refreshing a menu that did not change is not an error.
            Err(Error::Telegram(t)) if t.contains("message is not modified") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        alert: bool,
    ) -> Result<()> {
        self.with_retry(|| {
            let mut req = self.bot.answer_callback_query(callback_id.to_string());
            if let Some(t) = text {
                req = req.text(t.to_string());
            }
            req.show_alert(alert)
        })
        .await?;
        Ok(())
    }
}

/// Channel port over the Bot API.
///
/// The Bot API cannot read arbitrary channel messages, so `fetch_message`
/// forwards the message silently into `scratch_chat`, reads the forwarded copy
/// and deletes it again. The bot must be an admin of both channels.
#[derive(Clone)]
pub struct TelegramChannels {
    bot: Bot,
    scratch_chat: ChatId,
}

impl TelegramChannels {
    pub fn new(bot: Bot, scratch_chat: ChatId) -> Self {
        Self { bot, scratch_chat }
    }
}

#[async_trait]
impl ChannelPort for TelegramChannels {
    async fn resolve(&self, channel: &ChannelRef) -> Result<ChannelInfo> {
        let recipient = match channel {
            ChannelRef::Id(id) => Recipient::Id(tg_chat(*id)),
            ChannelRef::Username(name) => Recipient::ChannelUsername(name.clone()),
        };
        let chat = self.bot.get_chat(recipient).await.map_err(map_err)?;
        Ok(ChannelInfo {
            id: ChatId(chat.id.0),
            title: chat.title().map(str::to_string),
            username: chat.username().map(str::to_string),
        })
    }

    async fn copy_message(
        &self,
        source: ChatId,
        id: MessageId,
        destination: ChatId,
    ) -> Result<Option<MessageId>> {
        match self
            .bot
            .copy_message(tg_chat(destination), tg_chat(source), tg_msg_id(id))
            .await
        {
            Ok(new_id) => Ok(Some(MessageId(new_id.0))),
            Err(e) if is_missing_message(&e) => {
                debug!(id = id.0, "Source message missing");
                Ok(None)
            }
            Err(e) => Err(map_err(e)),
        }
    }

    async fn fetch_message(&self, chat: ChatId, id: MessageId) -> Result<Option<MessageSnapshot>> {
        let forwarded = match self
            .bot
            .forward_message(tg_chat(self.scratch_chat), tg_chat(chat), tg_msg_id(id))
            .disable_notification(true)
            .await
        {
            Ok(m) => m,
            Err(e) if is_missing_message(&e) => return Ok(None),
            Err(e) => return Err(map_err(e)),
        };

        let mut snapshot = snapshot_of(&forwarded);
        snapshot.id = id.0;

        if let Err(e) = self
            .bot
            .delete_message(tg_chat(self.scratch_chat), forwarded.id)
            .await
        {
            debug!("Failed to delete probe message: {e}");
        }
        Ok(Some(snapshot))
    }
}
