//! Fakes for driving the handlers without a bot.

use std::{path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Mutex;

use relay_core::{
    channels::{ChannelPort, MessageSnapshot},
    config::Config,
    domain::{ChannelInfo, ChannelRef, ChatId, MessageId, MessageRef},
    errors::Error,
    messaging::{port::MessagingPort, types::InlineKeyboard},
    notify::Notifier,
    progress::{ProgressStatus, ProgressTracker},
    relay::{Relay, StatusSnapshot},
    settings::SettingsStore,
    storage::Database,
    Result,
};

use crate::router::AppState;

pub(crate) const ADMIN: i64 = 42;

#[derive(Default)]
pub(crate) struct RecordingMessenger {
    pub sent: Mutex<Vec<(String, Option<InlineKeyboard>)>>,
    pub edits: Mutex<Vec<(String, Option<InlineKeyboard>)>>,
    pub answers: Mutex<Vec<(Option<String>, bool)>>,
}

impl RecordingMessenger {
    pub async fn last(&self) -> String {
        self.sent
            .lock()
            .await
            .last()
            .map(|(html, _)| html.clone())
            .unwrap_or_default()
    }

    pub async fn last_edit(&self) -> Option<(String, Option<InlineKeyboard>)> {
        self.edits.lock().await.last().cloned()
    }

    pub async fn last_answer(&self) -> Option<(Option<String>, bool)> {
        self.answers.lock().await.last().cloned()
    }
}

#[async_trait]
impl MessagingPort for RecordingMessenger {
    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        let mut sent = self.sent.lock().await;
        sent.push((html.to_string(), None));
        Ok(MessageRef {
            chat_id,
            message_id: MessageId(sent.len() as i32),
        })
    }

    async fn send_keyboard(
        &self,
        chat_id: ChatId,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        let mut sent = self.sent.lock().await;
        sent.push((html.to_string(), Some(keyboard)));
        Ok(MessageRef {
            chat_id,
            message_id: MessageId(sent.len() as i32),
        })
    }

    async fn edit_html(
        &self,
        _msg: MessageRef,
        html: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<()> {
        self.edits.lock().await.push((html.to_string(), keyboard));
        Ok(())
    }

    async fn answer_callback(
        &self,
        _callback_id: &str,
        text: Option<&str>,
        alert: bool,
    ) -> Result<()> {
        self.answers
            .lock()
            .await
            .push((text.map(str::to_string), alert));
        Ok(())
    }
}

/// Channels that resolve by id and hold no messages.
pub(crate) struct EmptyChannels;

#[async_trait]
impl ChannelPort for EmptyChannels {
    async fn resolve(&self, channel: &ChannelRef) -> Result<ChannelInfo> {
        match channel {
            ChannelRef::Id(id) => Ok(ChannelInfo {
                id: *id,
                title: Some(format!("Channel {id}")),
                username: None,
            }),
            ChannelRef::Username(name) => Err(Error::NotFound(name.clone())),
        }
    }

    async fn copy_message(
        &self,
        _source: ChatId,
        _id: MessageId,
        _destination: ChatId,
    ) -> Result<Option<MessageId>> {
        Ok(None)
    }

    async fn fetch_message(&self, _chat: ChatId, _id: MessageId) -> Result<Option<MessageSnapshot>> {
        Ok(None)
    }
}

pub(crate) struct Harness {
    pub state: AppState,
    pub messenger: Arc<RecordingMessenger>,
    _dir: TempDir,
}

fn config(dir: PathBuf) -> Config {
    Config {
        admin_id: ADMIN,
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
        find_scan_limit: 50,
        max_id_gap: 3,
        error_delay: Duration::from_secs(1),
        flood_delay: Duration::from_secs(1),
        probe_delay: Duration::from_millis(1),
        save_every: 10,
    }
}

pub(crate) async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let cfg = Arc::new(config(dir.path().to_path_buf()));
    let messenger = Arc::new(RecordingMessenger::default());

    let settings = Arc::new(SettingsStore::load(cfg.config_file.clone()));
    let db = Database::open_in_memory().await.unwrap();
    let progress = Arc::new(ProgressTracker::load(db, cfg.save_every, None).await.unwrap());
    let notifier = Arc::new(Notifier::new(
        messenger.clone(),
        cfg.admin_chat(),
        Arc::clone(&settings),
    ));
    let relay = Arc::new(Relay::new(
        Arc::clone(&cfg),
        settings,
        progress,
        Arc::new(EmptyChannels),
        notifier,
    ));

    Harness {
        state: AppState {
            cfg,
            relay,
            messenger: messenger.clone(),
        },
        messenger,
        _dir: dir,
    }
}

pub(crate) fn snapshot() -> StatusSnapshot {
    StatusSnapshot {
        running: false,
        status: ProgressStatus::Idle,
        source_channel: None,
        destination_channel: None,
        last_forwarded_id: 0,
        forwarded_count: 0,
        head_id: 0,
        updated_at: None,
        auto_mode: false,
        keep_alive: true,
        notifications: true,
        forward_delay: 3,
        batch_size: 50,
        batch_delay: 300,
        notify_interval: 600,
        skip_media_types: vec![],
        logged_copies: 0,
        uptime_secs: 0,
    }
}
