//! The sequential copy loop.
//!
//! Walks source ids upward from the saved offset and re-sends each one into
//! the destination. Pacing is re-read from the settings on every iteration so
//! admin changes apply mid-run. Stopping is cooperative: the running flag is
//! polled once per iteration, after any in-flight send or sleep completes.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::{
    channels::ChannelPort,
    config::Config,
    domain::{ChatId, MessageId},
    errors::Error,
    notify::Notifier,
    progress::ProgressTracker,
    settings::SettingsStore,
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct LoopTuning {
    /// Consecutive missing ids past the head that end the run. The same
    /// number of consecutive send failures aborts it.
    pub max_id_gap: u32,
    pub error_delay: Duration,
    /// Wait used when a rate limit carries no retry hint.
    pub flood_delay: Duration,
    /// Pause after probing an id that turned out not to exist.
    pub probe_delay: Duration,
}

impl LoopTuning {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            max_id_gap: cfg.max_id_gap.max(1),
            error_delay: cfg.error_delay,
            flood_delay: cfg.flood_delay,
            probe_delay: cfg.probe_delay,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CopyReport {
    pub copied: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Last source id copied in this run (0 if none).
    pub last_id: i32,
    pub cancelled: bool,
}

pub struct Copier {
    channels: Arc<dyn ChannelPort>,
    settings: Arc<SettingsStore>,
    progress: Arc<ProgressTracker>,
    notifier: Arc<Notifier>,
    tuning: LoopTuning,
}

impl Copier {
    pub fn new(
        channels: Arc<dyn ChannelPort>,
        settings: Arc<SettingsStore>,
        progress: Arc<ProgressTracker>,
        notifier: Arc<Notifier>,
        tuning: LoopTuning,
    ) -> Self {
        Self {
            channels,
            settings,
            progress,
            notifier,
            tuning,
        }
    }

    /// Copy until the source is exhausted or `running` is cleared.
    ///
    /// Storage failures are returned as errors, as is a run of `max_id_gap`
    /// consecutive send failures. Isolated send failures are counted in the
    /// report.
    pub async fn run(
        &self,
        source: ChatId,
        destination: ChatId,
        running: &AtomicBool,
    ) -> Result<CopyReport> {
        let mut report = CopyReport::default();
        let mut next = self
            .progress
            .snapshot()
            .await
            .last_forwarded_id
            .max(0)
            .saturating_add(1);
        let mut misses: u32 = 0;
        let mut failures: u32 = 0;
        let mut in_batch: u32 = 0;

        info!(%source, %destination, start_id = next, "Copy loop started");

        loop {
            if !running.load(Ordering::SeqCst) {
                report.cancelled = true;
                break;
            }

            let head = self.progress.snapshot().await.head_id;
            if next > head && misses >= self.tuning.max_id_gap {
                info!(head, misses, "No more source messages");
                break;
            }

            let pacing = self.settings.get().await.pacing();
            let id = MessageId(next);

            if !pacing.skip.is_empty() {
                match self.channels.fetch_message(source, id).await {
                    Ok(None) => {
                        misses += 1;
                        next = next.saturating_add(1);
                        sleep(self.tuning.probe_delay).await;
                        continue;
                    }
                    Ok(Some(snap)) if snap.is_skipped_by(&pacing.skip) => {
                        debug!(id = next, media = ?snap.media, "Skipping message");
                        report.skipped += 1;
                        misses = 0;
                        self.progress.observe_head(id).await;
                        next = next.saturating_add(1);
                        sleep(self.tuning.probe_delay).await;
                        continue;
                    }
                    Ok(Some(_)) => {}
                    Err(Error::RateLimited { retry_after }) => {
                        self.flood_wait(retry_after).await;
                        continue;
                    }
                    Err(e) => warn!(id = next, "Could not inspect message, copying anyway: {e}"),
                }
            }

            match self.channels.copy_message(source, id, destination).await {
                Ok(Some(new_id)) => {
                    misses = 0;
                    failures = 0;
                    self.progress.record_copy(id, new_id).await?;
                    report.copied += 1;
                    report.last_id = next;
                    next = next.saturating_add(1);
                    in_batch += 1;
                    debug!(source_id = id.0, destination_id = new_id.0, "Copied");

                    sleep(pacing.forward_delay).await;

                    if in_batch >= pacing.batch_size {
                        in_batch = 0;
                        let p = self.progress.snapshot().await;
                        info!(
                            forwarded = p.forwarded_count,
                            pause_secs = pacing.batch_delay.as_secs(),
                            "Batch complete, pausing"
                        );
                        self.notifier
                            .routine(&format!(
                                "⏸️ <b>Batch complete</b>\n\nForwarded: {}\nLast ID: {}\nResting {}s before the next batch",
                                p.forwarded_count,
                                p.last_forwarded_id,
                                pacing.batch_delay.as_secs()
                            ))
                            .await;
                        sleep(pacing.batch_delay).await;
                    }
                }
                Ok(None) => {
                    misses += 1;
                    next = next.saturating_add(1);
                    sleep(self.tuning.probe_delay).await;
                }
                Err(Error::RateLimited { retry_after }) => {
                    self.flood_wait(retry_after).await;
                }
                Err(e) => {
                    error!(id = next, "Error forwarding message: {e}");
                    report.failed += 1;
                    failures += 1;
                    if next > head {
                        misses += 1;
                    }
                    if failures >= self.tuning.max_id_gap {
                        return Err(Error::Telegram(format!(
                            "giving up after {failures} consecutive send failures, last at ID {next}: {e}"
                        )));
                    }
                    next = next.saturating_add(1);
                    sleep(self.tuning.error_delay).await;
                }
            }
        }

        info!(
            copied = report.copied,
            skipped = report.skipped,
            failed = report.failed,
            cancelled = report.cancelled,
            "Copy loop finished"
        );
        Ok(report)
    }

    async fn flood_wait(&self, retry_after: Option<Duration>) {
        let wait = retry_after.unwrap_or(self.tuning.flood_delay) + self.tuning.error_delay;
        warn!(wait_secs = wait.as_secs(), "Rate limited, waiting");
        sleep(wait).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channels::{MediaKind, MessageSnapshot},
        storage::Database,
        testing::{FakeChannels, FakeMessenger},
    };

    const SRC: ChatId = ChatId(-1001);
    const DST: ChatId = ChatId(-1002);

    struct Harness {
        _dir: tempfile::TempDir,
        channels: Arc<FakeChannels>,
        messenger: Arc<FakeMessenger>,
        settings: Arc<SettingsStore>,
        progress: Arc<ProgressTracker>,
        copier: Copier,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let channels = Arc::new(FakeChannels::default());
        let messenger = Arc::new(FakeMessenger::default());
        let settings = Arc::new(SettingsStore::load(dir.path().join("bot_config.json")));
        let db = Database::open_in_memory().await.unwrap();
        let progress = Arc::new(ProgressTracker::load(db, 10, None).await.unwrap());
        progress.bind_channels(Some(SRC), Some(DST)).await.unwrap();
        let notifier = Arc::new(Notifier::new(messenger.clone(), ChatId(42), settings.clone()));
        let copier = Copier::new(
            channels.clone(),
            settings.clone(),
            progress.clone(),
            notifier,
            LoopTuning {
                max_id_gap: 3,
                error_delay: Duration::from_secs(5),
                flood_delay: Duration::from_secs(60),
                probe_delay: Duration::from_millis(250),
            },
        );
        Harness {
            _dir: dir,
            channels,
            messenger,
            settings,
            progress,
            copier,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn copies_from_offset_and_stops_after_gap() {
        let h = harness().await;
        for id in [1, 2, 3, 5, 6] {
            h.channels.put_text(SRC, id, &format!("post {id}")).await;
        }
        h.progress.set_offset(1).await.unwrap();

        let running = AtomicBool::new(true);
        let report = h.copier.run(SRC, DST, &running).await.unwrap();

        assert_eq!(h.channels.copied_ids().await, vec![2, 3, 5, 6]);
        assert_eq!(report.copied, 4);
        assert_eq!(report.last_id, 6);
        assert!(!report.cancelled);

        let p = h.progress.snapshot().await;
        assert_eq!(p.last_forwarded_id, 6);
        assert_eq!(p.forwarded_count, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn gap_below_head_does_not_end_the_run() {
        let h = harness().await;
        h.channels.put_text(SRC, 1, "first").await;
        h.channels.put_text(SRC, 10, "after a long gap").await;
        h.progress.observe_head(MessageId(10)).await;

        let running = AtomicBool::new(true);
        h.copier.run(SRC, DST, &running).await.unwrap();

        assert_eq!(h.channels.copied_ids().await, vec![1, 10]);
    }

    #[tokio::test(start_paused = true)]
    async fn cleared_flag_stops_before_next_copy() {
        let h = harness().await;
        h.channels.put_text(SRC, 1, "x").await;
        let running = AtomicBool::new(false);
        let report = h.copier.run(SRC, DST, &running).await.unwrap();
        assert!(report.cancelled);
        assert!(h.channels.copied_ids().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_retries_same_id_after_wait() {
        let h = harness().await;
        h.channels.put_text(SRC, 1, "a").await;
        h.channels.put_text(SRC, 2, "b").await;
        h.channels
            .fail_copy(
                2,
                Error::RateLimited {
                    retry_after: Some(Duration::from_secs(30)),
                },
            )
            .await;

        let start = tokio::time::Instant::now();
        let running = AtomicBool::new(true);
        let report = h.copier.run(SRC, DST, &running).await.unwrap();

        assert_eq!(h.channels.copied_ids().await, vec![1, 2]);
        assert_eq!(report.failed, 0);
        // 30s flood wait + 5s error delay on top of normal pacing.
        assert!(start.elapsed() >= Duration::from_secs(35));
    }

    #[tokio::test(start_paused = true)]
    async fn other_errors_count_and_move_on() {
        let h = harness().await;
        for id in 1..=3 {
            h.channels.put_text(SRC, id, "m").await;
        }
        h.channels
            .fail_copy(2, Error::Telegram("CHAT_WRITE_FORBIDDEN".to_string()))
            .await;

        let running = AtomicBool::new(true);
        let report = h.copier.run(SRC, DST, &running).await.unwrap();

        assert_eq!(h.channels.copied_ids().await, vec![1, 3]);
        assert_eq!(report.failed, 1);
        assert_eq!(report.copied, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_send_failure_aborts_the_run() {
        let h = harness().await;
        for id in 1..=3 {
            h.channels.put_text(SRC, id, "m").await;
        }
        for id in 1..=2000 {
            h.channels
                .fail_copy(id, Error::Telegram("CHAT_WRITE_FORBIDDEN".to_string()))
                .await;
        }

        let running = AtomicBool::new(true);
        let err = h.copier.run(SRC, DST, &running).await.unwrap_err();

        assert!(err.to_string().contains("CHAT_WRITE_FORBIDDEN"));
        // max_id_gap is 3 in this harness.
        assert_eq!(2000 - h.channels.pending_copy_errors().await, 3);
        assert_eq!(h.progress.snapshot().await.last_forwarded_id, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn offset_at_the_top_of_the_id_range_does_not_overflow() {
        let h = harness().await;
        h.progress
            .set_offset(crate::progress::MAX_OFFSET as i64)
            .await
            .unwrap();

        let running = AtomicBool::new(true);
        let report = h.copier.run(SRC, DST, &running).await.unwrap();

        assert_eq!(report.copied, 0);
        assert!(!report.cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn skip_list_filters_media_without_advancing_offset() {
        let h = harness().await;
        h.channels.put_text(SRC, 1, "text").await;
        h.channels
            .put(
                SRC,
                MessageSnapshot {
                    id: 2,
                    text: None,
                    media: Some(MediaKind::Sticker),
                },
            )
            .await;
        h.channels.put_text(SRC, 3, "more").await;
        h.settings
            .update(|s| s.skip_media_types = vec![MediaKind::Sticker])
            .await
            .unwrap();

        let running = AtomicBool::new(true);
        let report = h.copier.run(SRC, DST, &running).await.unwrap();

        assert_eq!(h.channels.copied_ids().await, vec![1, 3]);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_pause_sends_routine_notice() {
        let h = harness().await;
        for id in 1..=12 {
            h.channels.put_text(SRC, id, "m").await;
        }
        h.settings
            .update(|s| {
                s.set_batch_size(10);
                s.set_batch_delay(30);
                s.set_forward_delay(1);
            })
            .await
            .unwrap();

        let start = tokio::time::Instant::now();
        let running = AtomicBool::new(true);
        h.copier.run(SRC, DST, &running).await.unwrap();

        let texts = h.messenger.texts().await;
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("Batch complete"));
        assert!(start.elapsed() >= Duration::from_secs(12 + 30));
    }
}
