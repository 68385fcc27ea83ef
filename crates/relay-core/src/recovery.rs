//! Resume-position recovery.
//!
//! Given a message already in the destination, find the source message it was
//! copied from. The copy log answers directly when it has the row; otherwise
//! source ids are scanned downward and compared by a content fingerprint.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{
    channels::{ChannelPort, MessageSnapshot},
    domain::{ChatId, MessageId},
    errors::Error,
    storage::Database,
    Result,
};

/// What two copies of the same post have in common.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fingerprint {
    pub text: String,
    pub has_media: bool,
}

impl Fingerprint {
    pub fn of(msg: &MessageSnapshot) -> Self {
        let text = msg
            .text
            .as_deref()
            .unwrap_or("")
            .replace("\r\n", "\n")
            .trim()
            .to_string();
        Self {
            text,
            has_media: msg.has_media(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PositionMatch {
    /// Found in the copy log.
    Logged { source_id: MessageId },
    /// Found by scanning; `scanned` ids were probed.
    Scanned { source_id: MessageId, scanned: u32 },
}

impl PositionMatch {
    pub fn source_id(&self) -> MessageId {
        match self {
            PositionMatch::Logged { source_id } | PositionMatch::Scanned { source_id, .. } => {
                *source_id
            }
        }
    }
}

pub struct PositionQuery {
    pub source: ChatId,
    pub destination: ChatId,
    pub destination_id: MessageId,
    /// Highest source id to start scanning from.
    pub start_from: i32,
    pub scan_limit: u32,
    pub probe_delay: Duration,
    pub flood_delay: Duration,
}

/// `Ok(None)` when nothing in the scanned window matches.
pub async fn find_position(
    channels: &dyn ChannelPort,
    db: &Database,
    q: &PositionQuery,
) -> Result<Option<PositionMatch>> {
    if let Some(rec) = db.mapping_for_destination(q.destination, q.destination_id).await? {
        if rec.source_channel == q.source {
            info!(source_id = rec.source_id.0, "Position found in copy log");
            return Ok(Some(PositionMatch::Logged {
                source_id: rec.source_id,
            }));
        }
    }

    let target = channels
        .fetch_message(q.destination, q.destination_id)
        .await?
        .ok_or_else(|| {
            Error::NotFound(format!("destination message {}", q.destination_id.0))
        })?;
    if target.is_empty() {
        return Err(Error::Invalid(
            "destination message has no text or media to match".to_string(),
        ));
    }
    if q.start_from < 1 {
        return Err(Error::Invalid(
            "no start point known; pass a source id to scan down from".to_string(),
        ));
    }

    let wanted = Fingerprint::of(&target);
    let lowest = (q.start_from as i64 - q.scan_limit as i64 + 1).max(1) as i32;
    let mut scanned = 0u32;
    let mut id = q.start_from;

    info!(from = q.start_from, to = lowest, "Scanning source for matching message");

    while id >= lowest {
        match channels.fetch_message(q.source, MessageId(id)).await {
            Ok(Some(msg)) => {
                scanned += 1;
                if Fingerprint::of(&msg) == wanted {
                    info!(source_id = id, scanned, "Position found by scan");
                    return Ok(Some(PositionMatch::Scanned {
                        source_id: MessageId(id),
                        scanned,
                    }));
                }
            }
            Ok(None) => scanned += 1,
            Err(Error::RateLimited { retry_after }) => {
                let wait = retry_after.unwrap_or(q.flood_delay);
                warn!(wait_secs = wait.as_secs(), "Rate limited while scanning");
                sleep(wait).await;
                continue;
            }
            Err(e) => {
                debug!(id, "Scan fetch failed: {e}");
                scanned += 1;
            }
        }
        id -= 1;
        sleep(q.probe_delay).await;
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{channels::MediaKind, storage::CopyRecord, testing::FakeChannels};

    const SRC: ChatId = ChatId(-1001);
    const DST: ChatId = ChatId(-1002);

    fn query(dest_id: i32, start_from: i32) -> PositionQuery {
        PositionQuery {
            source: SRC,
            destination: DST,
            destination_id: MessageId(dest_id),
            start_from,
            scan_limit: 1000,
            probe_delay: Duration::from_millis(250),
            flood_delay: Duration::from_secs(60),
        }
    }

    #[test]
    fn fingerprint_normalizes_line_endings_and_whitespace() {
        let a = MessageSnapshot {
            id: 1,
            text: Some("  hello\r\nworld \n".to_string()),
            media: Some(MediaKind::Photo),
        };
        let b = MessageSnapshot {
            id: 2,
            text: Some("hello\nworld".to_string()),
            media: Some(MediaKind::Video),
        };
        assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));

        let c = MessageSnapshot {
            media: None,
            ..b.clone()
        };
        assert_ne!(Fingerprint::of(&b), Fingerprint::of(&c));
    }

    #[tokio::test]
    async fn copy_log_answers_without_scanning() {
        let channels = FakeChannels::default();
        let db = Database::open_in_memory().await.unwrap();
        db.record_mapping(&CopyRecord {
            source_channel: SRC,
            source_id: MessageId(77),
            destination_channel: DST,
            destination_id: MessageId(5),
            copied_at: "2026-01-01T00:00:00Z".to_string(),
        })
        .await
        .unwrap();

        let m = find_position(&channels, &db, &query(5, 100)).await.unwrap();
        assert_eq!(
            m,
            Some(PositionMatch::Logged {
                source_id: MessageId(77)
            })
        );
        assert_eq!(*channels.fetches.lock().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn scan_finds_newest_matching_source_message() {
        let channels = FakeChannels::default();
        let db = Database::open_in_memory().await.unwrap();
        channels.put_text(SRC, 10, "repeat").await;
        channels.put_text(SRC, 11, "other").await;
        channels.put_text(SRC, 12, "repeat").await;
        channels.put_text(SRC, 13, "newest").await;
        channels.put_text(DST, 3, "repeat\r\n").await;

        let m = find_position(&channels, &db, &query(3, 13)).await.unwrap();
        assert_eq!(m.map(|m| m.source_id()), Some(MessageId(12)));
    }

    #[tokio::test(start_paused = true)]
    async fn scan_window_is_bounded() {
        let channels = FakeChannels::default();
        let db = Database::open_in_memory().await.unwrap();
        channels.put_text(SRC, 1, "old").await;
        channels.put_text(DST, 3, "old").await;

        let mut q = query(3, 50);
        q.scan_limit = 10;
        assert_eq!(find_position(&channels, &db, &q).await.unwrap(), None);
        // 1 destination fetch + 10 source probes.
        assert_eq!(*channels.fetches.lock().await, 11);
    }

    #[tokio::test]
    async fn empty_or_missing_destination_is_rejected() {
        let channels = FakeChannels::default();
        let db = Database::open_in_memory().await.unwrap();
        channels.put_text(DST, 4, "   ").await;

        assert!(matches!(
            find_position(&channels, &db, &query(4, 10)).await,
            Err(Error::Invalid(_))
        ));
        assert!(matches!(
            find_position(&channels, &db, &query(99, 10)).await,
            Err(Error::NotFound(_))
        ));
    }
}
