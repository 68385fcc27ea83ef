//! In-memory port fakes shared by unit tests.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    channels::{ChannelPort, MessageSnapshot},
    domain::{ChannelInfo, ChannelRef, ChatId, MessageId, MessageRef},
    errors::Error,
    messaging::{port::MessagingPort, types::InlineKeyboard},
    Result,
};

#[derive(Clone, Debug)]
pub struct Sent {
    pub chat_id: ChatId,
    pub html: String,
    pub keyboard: Option<InlineKeyboard>,
}

#[derive(Default)]
pub struct FakeMessenger {
    pub sent: Mutex<Vec<Sent>>,
    pub edits: Mutex<Vec<(MessageRef, String)>>,
    pub callbacks: Mutex<Vec<(String, Option<String>, bool)>>,
    pub fail: std::sync::atomic::AtomicBool,
}

impl FakeMessenger {
    pub async fn texts(&self) -> Vec<String> {
        self.sent.lock().await.iter().map(|s| s.html.clone()).collect()
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::Telegram("send failed".to_string()));
        }
        Ok(())
    }

    async fn push(&self, chat_id: ChatId, html: &str, keyboard: Option<InlineKeyboard>) -> MessageRef {
        let mut sent = self.sent.lock().await;
        sent.push(Sent {
            chat_id,
            html: html.to_string(),
            keyboard,
        });
        MessageRef {
            chat_id,
            message_id: MessageId(sent.len() as i32),
        }
    }
}

#[async_trait]
impl MessagingPort for FakeMessenger {
    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.check()?;
        Ok(self.push(chat_id, html, None).await)
    }

    async fn send_keyboard(
        &self,
        chat_id: ChatId,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        self.check()?;
        Ok(self.push(chat_id, html, Some(keyboard)).await)
    }

    async fn edit_html(
        &self,
        msg: MessageRef,
        html: &str,
        _keyboard: Option<InlineKeyboard>,
    ) -> Result<()> {
        self.check()?;
        self.edits.lock().await.push((msg, html.to_string()));
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        alert: bool,
    ) -> Result<()> {
        self.callbacks.lock().await.push((
            callback_id.to_string(),
            text.map(str::to_string),
            alert,
        ));
        Ok(())
    }
}

/// A channel world: messages per chat, scripted copy failures, and a copy log.
#[derive(Default)]
pub struct FakeChannels {
    pub messages: Mutex<HashMap<(i64, i32), MessageSnapshot>>,
    pub infos: Mutex<HashMap<String, ChannelInfo>>,
    /// Errors returned (front first) by the next copies of a given source id.
    pub copy_errors: Mutex<HashMap<i32, VecDeque<Error>>>,
    pub copies: Mutex<Vec<(ChatId, MessageId, ChatId)>>,
    pub fetches: Mutex<u32>,
    next_dest_id: Mutex<i32>,
}

impl FakeChannels {
    pub async fn put(&self, chat: ChatId, msg: MessageSnapshot) {
        self.messages.lock().await.insert((chat.0, msg.id), msg);
    }

    pub async fn put_text(&self, chat: ChatId, id: i32, text: &str) {
        self.put(
            chat,
            MessageSnapshot {
                id,
                text: Some(text.to_string()),
                media: None,
            },
        )
        .await;
    }

    pub async fn fail_copy(&self, id: i32, err: Error) {
        self.copy_errors
            .lock()
            .await
            .entry(id)
            .or_default()
            .push_back(err);
    }

    /// Scripted copy errors not yet returned.
    pub async fn pending_copy_errors(&self) -> usize {
        self.copy_errors.lock().await.values().map(VecDeque::len).sum()
    }

    pub async fn copied_ids(&self) -> Vec<i32> {
        self.copies.lock().await.iter().map(|(_, id, _)| id.0).collect()
    }
}

#[async_trait]
impl ChannelPort for FakeChannels {
    async fn resolve(&self, channel: &ChannelRef) -> Result<ChannelInfo> {
        let key = channel.to_string();
        if let Some(info) = self.infos.lock().await.get(&key) {
            return Ok(info.clone());
        }
        match channel {
            ChannelRef::Id(id) => Ok(ChannelInfo {
                id: *id,
                title: Some(format!("Channel {id}")),
                username: None,
            }),
            ChannelRef::Username(name) => Err(Error::NotFound(format!("chat {name}"))),
        }
    }

    async fn copy_message(
        &self,
        source: ChatId,
        id: MessageId,
        destination: ChatId,
    ) -> Result<Option<MessageId>> {
        if let Some(queue) = self.copy_errors.lock().await.get_mut(&id.0) {
            if let Some(err) = queue.pop_front() {
                return Err(err);
            }
        }

        let Some(msg) = self.messages.lock().await.get(&(source.0, id.0)).cloned() else {
            return Ok(None);
        };

        let new_id = {
            let mut next = self.next_dest_id.lock().await;
            *next += 1;
            *next
        };
        self.messages.lock().await.insert(
            (destination.0, new_id),
            MessageSnapshot { id: new_id, ..msg },
        );
        self.copies.lock().await.push((source, id, destination));
        Ok(Some(MessageId(new_id)))
    }

    async fn fetch_message(&self, chat: ChatId, id: MessageId) -> Result<Option<MessageSnapshot>> {
        *self.fetches.lock().await += 1;
        Ok(self.messages.lock().await.get(&(chat.0, id.0)).cloned())
    }
}
