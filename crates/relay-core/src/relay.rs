//! The relay service: owns the copy task and everything it touches.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use crate::{
    channels::{ChannelPort, MediaKind, MessageSnapshot},
    config::Config,
    copier::{Copier, CopyReport, LoopTuning},
    domain::{ChannelInfo, ChannelRef, ChatId, MessageId},
    errors::Error,
    formatting::escape_html,
    notify::Notifier,
    progress::{ProgressStatus, ProgressTracker},
    recovery::{self, PositionMatch, PositionQuery},
    settings::SettingsStore,
    storage::CopyRecord,
    Result,
};

/// Everything `/status` and the HTTP surface report.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub running: bool,
    pub status: ProgressStatus,
    pub source_channel: Option<ChatId>,
    pub destination_channel: Option<ChatId>,
    pub last_forwarded_id: i32,
    pub forwarded_count: u64,
    pub head_id: i32,
    pub updated_at: Option<String>,
    pub auto_mode: bool,
    pub keep_alive: bool,
    pub notifications: bool,
    pub forward_delay: u64,
    pub batch_size: u32,
    pub batch_delay: u64,
    pub notify_interval: u64,
    pub skip_media_types: Vec<MediaKind>,
    pub logged_copies: u64,
    pub uptime_secs: u64,
}

#[async_trait]
pub trait StatusProvider: Send + Sync {
    async fn status(&self) -> StatusSnapshot;
}

/// Result of pointing `/source` or `/dest` at a channel.
#[derive(Clone, Debug)]
pub struct ChannelChange {
    pub info: ChannelInfo,
    pub previous: Option<ChatId>,
    /// Offset in effect after the change.
    pub offset: i32,
}

impl ChannelChange {
    pub fn changed(&self) -> bool {
        self.previous.is_some_and(|p| p != self.info.id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Started { from_id: i32 },
    AlreadyRunning,
}

pub struct Relay {
    cfg: Arc<Config>,
    settings: Arc<SettingsStore>,
    progress: Arc<ProgressTracker>,
    channels: Arc<dyn ChannelPort>,
    notifier: Arc<Notifier>,
    /// Cleared to ask the copy loop to stop.
    running: AtomicBool,
    /// Set while a copy task exists, until it has fully exited.
    active: AtomicBool,
    started_at: Instant,
}

impl Relay {
    pub fn new(
        cfg: Arc<Config>,
        settings: Arc<SettingsStore>,
        progress: Arc<ProgressTracker>,
        channels: Arc<dyn ChannelPort>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            cfg,
            settings,
            progress,
            channels,
            notifier,
            running: AtomicBool::new(false),
            active: AtomicBool::new(false),
            started_at: Instant::now(),
        }
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.progress
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Mark a `running` record left by a crashed process as `interrupted`.
    pub async fn recover_interrupted(&self) -> Result<bool> {
        let p = self.progress.snapshot().await;
        if p.status != ProgressStatus::Running {
            return Ok(false);
        }
        warn!(
            last_forwarded_id = p.last_forwarded_id,
            "Previous run was interrupted"
        );
        self.progress.set_status(ProgressStatus::Interrupted).await?;
        Ok(true)
    }

    /// Spawn the copy task unless one is already running.
    pub async fn start_copy(self: &Arc<Self>) -> Result<StartOutcome> {
        let settings = self.settings.get().await;
        let (Some(source), Some(destination)) =
            (settings.source_channel, settings.destination_channel)
        else {
            return Err(Error::Invalid(
                "set both source and destination channels first".to_string(),
            ));
        };

        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(StartOutcome::AlreadyRunning);
        }
        self.running.store(true, Ordering::SeqCst);

        let prepared = async {
            self.progress
                .bind_channels(Some(source), Some(destination))
                .await?;
            self.progress.set_status(ProgressStatus::Running).await
        }
        .await;
        if let Err(e) = prepared {
            self.running.store(false, Ordering::SeqCst);
            self.active.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let from_id = self
            .progress
            .snapshot()
            .await
            .last_forwarded_id
            .max(0)
            .saturating_add(1);
        info!(%source, %destination, from_id, "Starting copy task");

        let relay = Arc::clone(self);
        tokio::spawn(async move {
            relay.run_copy_task(source, destination).await;
        });

        Ok(StartOutcome::Started { from_id })
    }

    /// Ask the copy task to stop after its current step. Returns whether it was running.
    pub fn stop_copy(&self) -> bool {
        let was = self.running.swap(false, Ordering::SeqCst) && self.is_running();
        if was {
            info!("Stop requested");
        }
        was
    }

    async fn run_copy_task(&self, source: ChatId, destination: ChatId) {
        let copier = Copier::new(
            Arc::clone(&self.channels),
            Arc::clone(&self.settings),
            Arc::clone(&self.progress),
            Arc::clone(&self.notifier),
            LoopTuning::from_config(&self.cfg),
        );

        let result = copier.run(source, destination, &self.running).await;
        self.running.store(false, Ordering::SeqCst);

        let (status, notice) = match &result {
            Ok(report) if report.cancelled => (
                ProgressStatus::Stopped,
                self.summary("⏹️ <b>Forwarding stopped</b>", report).await,
            ),
            Ok(report) => (
                ProgressStatus::Completed,
                self.summary("✅ <b>Forwarding complete!</b>", report).await,
            ),
            Err(e) => {
                error!("Copy task failed: {e}");
                (
                    ProgressStatus::Error,
                    format!(
                        "❌ <b>Forwarding error</b>\n\n<code>{}</code>",
                        escape_html(&e.to_string())
                    ),
                )
            }
        };

        if let Err(e) = self.progress.set_status(status).await {
            error!("Failed to save progress: {e}");
        }
        self.active.store(false, Ordering::SeqCst);
        self.notifier.important(&notice).await;
    }

    async fn summary(&self, title: &str, report: &CopyReport) -> String {
        let p = self.progress.snapshot().await;
        format!(
            "{title}\n\nThis run: {} copied, {} skipped, {} failed\nTotal forwarded: {}\nLast ID: {}",
            report.copied, report.skipped, report.failed, p.forwarded_count, p.last_forwarded_id
        )
    }

    /// A new post appeared in some channel the bot can see.
    ///
    /// Returns the destination id when the post was copied live.
    pub async fn handle_channel_post(
        &self,
        chat: ChatId,
        post: MessageSnapshot,
    ) -> Result<Option<MessageId>> {
        let settings = self.settings.get().await;
        let Some(source) = settings.source_channel.filter(|s| *s == chat) else {
            return Ok(None);
        };
        let id = MessageId(post.id);
        self.progress.observe_head(id).await;

        let Some(destination) = settings.destination_channel else {
            return Ok(None);
        };
        if !settings.auto_mode || self.is_running() {
            return Ok(None);
        }

        let pacing = settings.pacing();
        sleep(pacing.forward_delay).await;
        if post.is_skipped_by(&pacing.skip) {
            info!(id = post.id, "Live post skipped by media filter");
            return Ok(None);
        }

        let Some(new_id) = self.channels.copy_message(source, id, destination).await? else {
            return Ok(None);
        };

        self.progress
            .bind_channels(Some(source), Some(destination))
            .await?;
        self.progress.record_copy(id, new_id).await?;
        self.progress.flush().await?;
        info!(source_id = post.id, destination_id = new_id.0, "Auto-forwarded message");
        Ok(Some(new_id))
    }

    pub async fn set_source(&self, channel: &ChannelRef) -> Result<ChannelChange> {
        self.change_channel(channel, true).await
    }

    pub async fn set_destination(&self, channel: &ChannelRef) -> Result<ChannelChange> {
        self.change_channel(channel, false).await
    }

    async fn change_channel(&self, channel: &ChannelRef, source: bool) -> Result<ChannelChange> {
        if self.is_running() {
            return Err(Error::Invalid(
                "stop forwarding before changing channels".to_string(),
            ));
        }
        let info = self.channels.resolve(channel).await?;
        let (previous, updated) = self
            .settings
            .update(|s| {
                let slot = if source {
                    &mut s.source_channel
                } else {
                    &mut s.destination_channel
                };
                slot.replace(info.id)
            })
            .await?;
        self.progress
            .bind_channels(updated.source_channel, updated.destination_channel)
            .await?;

        info!(channel = %info.id, source, "Channel set");
        Ok(ChannelChange {
            info,
            previous,
            offset: self.progress.snapshot().await.last_forwarded_id,
        })
    }

    pub async fn set_offset(&self, id: i64) -> Result<i32> {
        if self.is_running() {
            return Err(Error::Invalid("stop forwarding before moving the offset".to_string()));
        }
        self.progress.set_offset(id).await
    }

    pub async fn reset(&self) -> Result<()> {
        if self.is_running() {
            return Err(Error::Invalid("stop forwarding before resetting".to_string()));
        }
        self.progress.reset().await
    }

    /// Find where `destination_id` came from and resume right after it.
    pub async fn find_position(
        &self,
        destination_id: MessageId,
        start_hint: Option<i32>,
    ) -> Result<Option<PositionMatch>> {
        if self.is_running() {
            return Err(Error::Invalid("stop forwarding before searching".to_string()));
        }
        let settings = self.settings.get().await;
        let (Some(source), Some(destination)) =
            (settings.source_channel, settings.destination_channel)
        else {
            return Err(Error::Invalid(
                "set both source and destination channels first".to_string(),
            ));
        };

        let p = self.progress.snapshot().await;
        let start_from = start_hint.unwrap_or(p.head_id.max(p.last_forwarded_id));
        let query = PositionQuery {
            source,
            destination,
            destination_id,
            start_from,
            scan_limit: self.cfg.find_scan_limit,
            probe_delay: self.cfg.probe_delay,
            flood_delay: self.cfg.flood_delay,
        };

        let found =
            recovery::find_position(self.channels.as_ref(), self.progress.database(), &query)
                .await?;
        if let Some(m) = found {
            self.progress.set_offset(m.source_id().0 as i64).await?;
            self.progress.observe_head(m.source_id()).await;
        }
        Ok(found)
    }

    pub async fn recent_copies(&self, limit: usize) -> Result<Vec<CopyRecord>> {
        self.progress.database().recent_mappings(limit).await
    }
}

#[async_trait]
impl StatusProvider for Relay {
    async fn status(&self) -> StatusSnapshot {
        let s = self.settings.get().await;
        let p = self.progress.snapshot().await;
        let logged_copies = match self.progress.database().mapping_count().await {
            Ok(n) => n,
            Err(e) => {
                warn!("Failed to count copy log: {e}");
                0
            }
        };

        StatusSnapshot {
            running: self.is_running(),
            status: p.status,
            source_channel: s.source_channel,
            destination_channel: s.destination_channel,
            last_forwarded_id: p.last_forwarded_id,
            forwarded_count: p.forwarded_count,
            head_id: p.head_id,
            updated_at: p.updated_at,
            auto_mode: s.auto_mode,
            keep_alive: s.keep_alive,
            notifications: s.notifications,
            forward_delay: s.forward_delay,
            batch_size: s.batch_size,
            batch_delay: s.batch_delay,
            notify_interval: s.notify_interval,
            skip_media_types: s.skip_media_types,
            logged_copies,
            uptime_secs: self.uptime().as_secs(),
        }
    }
}
