//! Resume position and counters, kept in memory and flushed to SQLite.

use serde::Serialize;
use strum::{Display, EnumString};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    domain::{ChatId, MessageId},
    settings::LegacyCounters,
    storage::{CopyRecord, Database},
    Result,
};

/// Highest settable offset; the next id to copy must still fit in an `i32`.
pub const MAX_OFFSET: i32 = i32::MAX - 1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display, EnumString, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    #[default]
    Idle,
    Running,
    Stopped,
    Completed,
    /// A `running` record found at startup: the previous process died mid-copy.
    Interrupted,
    Error,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub source_channel: Option<ChatId>,
    pub destination_channel: Option<ChatId>,
    /// Forward offset: the last source id copied.
    pub last_forwarded_id: i32,
    pub forwarded_count: u64,
    /// Highest source id seen so far.
    pub head_id: i32,
    pub status: ProgressStatus,
    /// RFC 3339, UTC.
    pub updated_at: Option<String>,
}

struct TrackerState {
    progress: Progress,
    unsaved: u64,
}

/// Owns the live [`Progress`] and decides when to persist it.
pub struct ProgressTracker {
    db: Database,
    save_every: u64,
    state: Mutex<TrackerState>,
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

impl ProgressTracker {
    /// Load the stored record; an empty table is seeded from `legacy` when given.
    pub async fn load(
        db: Database,
        save_every: u64,
        legacy: Option<LegacyCounters>,
    ) -> Result<Self> {
        let progress = match db.load_progress().await? {
            Some(p) => p,
            None => {
                let mut p = Progress::default();
                if let Some(l) = legacy {
                    info!(
                        forwarded_count = l.forwarded_count,
                        last_forwarded_id = l.last_forwarded_id,
                        "Seeding progress from legacy settings file"
                    );
                    p.forwarded_count = l.forwarded_count;
                    p.last_forwarded_id = l.last_forwarded_id;
                    p.head_id = l.last_forwarded_id;
                    p.updated_at = Some(now_rfc3339());
                    db.save_progress(&p).await?;
                }
                p
            }
        };

        Ok(Self {
            db,
            save_every: save_every.max(1),
            state: Mutex::new(TrackerState {
                progress,
                unsaved: 0,
            }),
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub async fn snapshot(&self) -> Progress {
        self.state.lock().await.progress.clone()
    }

    /// Record one successful copy. Persists every `save_every` copies.
    pub async fn record_copy(&self, source_id: MessageId, destination_id: MessageId) -> Result<()> {
        let (to_save, mapping) = {
            let mut st = self.state.lock().await;
            let now = now_rfc3339();
            let p = &mut st.progress;
            p.forwarded_count += 1;
            p.last_forwarded_id = source_id.0;
            p.head_id = p.head_id.max(source_id.0);
            p.updated_at = Some(now.clone());

            let mapping = match (p.source_channel, p.destination_channel) {
                (Some(src), Some(dst)) => Some(CopyRecord {
                    source_channel: src,
                    source_id,
                    destination_channel: dst,
                    destination_id,
                    copied_at: now,
                }),
                _ => None,
            };

            st.unsaved += 1;
            let to_save = if st.unsaved >= self.save_every {
                st.unsaved = 0;
                Some(st.progress.clone())
            } else {
                None
            };
            (to_save, mapping)
        };

        if let Some(m) = mapping {
            self.db.record_mapping(&m).await?;
        }
        if let Some(p) = to_save {
            debug!(last_forwarded_id = p.last_forwarded_id, "Progress saved");
            self.db.save_progress(&p).await?;
        }
        Ok(())
    }

    /// Raise the head id (never lowers it). Not persisted on its own.
    pub async fn observe_head(&self, id: MessageId) {
        let mut st = self.state.lock().await;
        if id.0 > st.progress.head_id {
            st.progress.head_id = id.0;
        }
    }

    /// Manual offset override, clamped to `0..=MAX_OFFSET`.
    pub async fn set_offset(&self, id: i64) -> Result<i32> {
        let offset = id.clamp(0, MAX_OFFSET as i64) as i32;
        self.mutate(|p| p.last_forwarded_id = offset).await?;
        Ok(offset)
    }

    /// Offset and count back to zero.
    pub async fn reset(&self) -> Result<()> {
        self.mutate(|p| {
            p.last_forwarded_id = 0;
            p.forwarded_count = 0;
            p.status = ProgressStatus::Idle;
        })
        .await
    }

    pub async fn set_status(&self, status: ProgressStatus) -> Result<()> {
        self.mutate(|p| p.status = status).await
    }

    pub async fn bind_channels(
        &self,
        source: Option<ChatId>,
        destination: Option<ChatId>,
    ) -> Result<()> {
        self.mutate(|p| {
            p.source_channel = source;
            p.destination_channel = destination;
        })
        .await
    }

    /// Persist whatever is in memory now.
    pub async fn flush(&self) -> Result<()> {
        self.mutate(|_| ()).await
    }

    async fn mutate(&self, f: impl FnOnce(&mut Progress)) -> Result<()> {
        let snapshot = {
            let mut st = self.state.lock().await;
            f(&mut st.progress);
            st.progress.updated_at = Some(now_rfc3339());
            st.unsaved = 0;
            st.progress.clone()
        };
        self.db.save_progress(&snapshot).await
    }
}
