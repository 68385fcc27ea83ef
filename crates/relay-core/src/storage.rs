//! SQLite record tables for the resume position and the copy log.
//!
//! All operations go through the single tokio-rusqlite background thread.

use std::path::Path;

use rusqlite::{params, OptionalExtension};
use tracing::info;

use crate::{
    domain::{ChatId, MessageId},
    errors::Error,
    progress::{Progress, ProgressStatus},
    Result,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS progress (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    source_channel INTEGER,
    destination_channel INTEGER,
    last_forwarded_id INTEGER NOT NULL DEFAULT 0,
    forwarded_count INTEGER NOT NULL DEFAULT 0,
    head_id INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'idle',
    updated_at TEXT
);
CREATE TABLE IF NOT EXISTS message_map (
    source_channel INTEGER NOT NULL,
    source_id INTEGER NOT NULL,
    destination_channel INTEGER NOT NULL,
    destination_id INTEGER NOT NULL,
    copied_at TEXT NOT NULL,
    PRIMARY KEY (source_channel, source_id)
);
CREATE INDEX IF NOT EXISTS idx_message_map_destination
    ON message_map(destination_channel, destination_id);
";

/// One row of the copy log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CopyRecord {
    pub source_channel: ChatId,
    pub source_id: MessageId,
    pub destination_channel: ChatId,
    pub destination_id: MessageId,
    pub copied_at: String,
}

fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> Error {
    Error::Storage(e.to_string())
}

#[derive(Clone)]
pub struct Database {
    conn: tokio_rusqlite::Connection,
}

impl Database {
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(|e| Error::Storage(format!("open {}: {e}", path.display())))?;
        let db = Self { conn };
        db.migrate().await?;
        info!(path = %path.display(), "Database ready");
        Ok(db)
    }

    pub async fn open_in_memory() -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open_in_memory()
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;
        let db = Self { conn };
        db.migrate().await?;
        Ok(db)
    }

    /// Simulates a broken database for failure-path tests.
    #[cfg(test)]
    pub(crate) async fn drop_copy_log(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch("DROP TABLE message_map;")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    async fn migrate(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    /// The stored progress row, or `None` before the first save.
    pub async fn load_progress(&self) -> Result<Option<Progress>> {
        let row = self
            .conn
            .call(|conn| {
                let row = conn
                    .query_row(
                        "SELECT source_channel, destination_channel, last_forwarded_id, \
                         forwarded_count, head_id, status, updated_at \
                         FROM progress WHERE id = 1",
                        [],
                        |row| {
                            Ok((
                                row.get::<_, Option<i64>>(0)?,
                                row.get::<_, Option<i64>>(1)?,
                                row.get::<_, i32>(2)?,
                                row.get::<_, i64>(3)?,
                                row.get::<_, i32>(4)?,
                                row.get::<_, String>(5)?,
                                row.get::<_, Option<String>>(6)?,
                            ))
                        },
                    )
                    .optional()?;
                Ok(row)
            })
            .await
            .map_err(map_tr_err)?;

        Ok(row.map(|(src, dst, last, count, head, status, updated_at)| Progress {
            source_channel: src.map(ChatId),
            destination_channel: dst.map(ChatId),
            last_forwarded_id: last,
            forwarded_count: count.max(0) as u64,
            head_id: head,
            status: status.parse().unwrap_or(ProgressStatus::Idle),
            updated_at,
        }))
    }

    pub async fn save_progress(&self, p: &Progress) -> Result<()> {
        let src = p.source_channel.map(|c| c.0);
        let dst = p.destination_channel.map(|c| c.0);
        let last = p.last_forwarded_id;
        let count = p.forwarded_count as i64;
        let head = p.head_id;
        let status = p.status.to_string();
        let updated_at = p.updated_at.clone();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO progress (id, source_channel, destination_channel, \
                     last_forwarded_id, forwarded_count, head_id, status, updated_at) \
                     VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                     ON CONFLICT(id) DO UPDATE SET \
                     source_channel = excluded.source_channel, \
                     destination_channel = excluded.destination_channel, \
                     last_forwarded_id = excluded.last_forwarded_id, \
                     forwarded_count = excluded.forwarded_count, \
                     head_id = excluded.head_id, \
                     status = excluded.status, \
                     updated_at = excluded.updated_at",
                    params![src, dst, last, count, head, status, updated_at],
                )?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    /// Upsert a copy-log row keyed by the source message.
    pub async fn record_mapping(&self, rec: &CopyRecord) -> Result<()> {
        let rec = rec.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO message_map (source_channel, source_id, destination_channel, \
                     destination_id, copied_at) VALUES (?1, ?2, ?3, ?4, ?5) \
                     ON CONFLICT(source_channel, source_id) DO UPDATE SET \
                     destination_channel = excluded.destination_channel, \
                     destination_id = excluded.destination_id, \
                     copied_at = excluded.copied_at",
                    params![
                        rec.source_channel.0,
                        rec.source_id.0,
                        rec.destination_channel.0,
                        rec.destination_id.0,
                        rec.copied_at,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    /// Most recent copies first.
    pub async fn recent_mappings(&self, limit: usize) -> Result<Vec<CopyRecord>> {
        let limit = limit as i64;
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT source_channel, source_id, destination_channel, destination_id, \
                     copied_at FROM message_map \
                     ORDER BY copied_at DESC, source_id DESC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map(params![limit], row_to_record)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(map_tr_err)
    }

    /// The copy-log row that produced `destination_id` in `destination`.
    pub async fn mapping_for_destination(
        &self,
        destination: ChatId,
        destination_id: MessageId,
    ) -> Result<Option<CopyRecord>> {
        self.conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT source_channel, source_id, destination_channel, destination_id, \
                         copied_at FROM message_map \
                         WHERE destination_channel = ?1 AND destination_id = ?2 \
                         ORDER BY copied_at DESC LIMIT 1",
                        params![destination.0, destination_id.0],
                        row_to_record,
                    )
                    .optional()?;
                Ok(row)
            })
            .await
            .map_err(map_tr_err)
    }

    pub async fn mapping_count(&self) -> Result<u64> {
        self.conn
            .call(|conn| {
                let n: i64 = conn.query_row("SELECT COUNT(*) FROM message_map", [], |row| {
                    row.get(0)
                })?;
                Ok(n.max(0) as u64)
            })
            .await
            .map_err(map_tr_err)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<CopyRecord> {
    Ok(CopyRecord {
        source_channel: ChatId(row.get(0)?),
        source_id: MessageId(row.get(1)?),
        destination_channel: ChatId(row.get(2)?),
        destination_id: MessageId(row.get(3)?),
        copied_at: row.get(4)?,
    })
}
