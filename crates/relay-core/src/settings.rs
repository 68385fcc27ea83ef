//! Runtime settings persisted to a JSON file.
//!
//! The admin can change any of these at any time, including while a copy is
//! running; the copy loop re-reads [`Pacing`] on every iteration.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Deserializer, Serialize};
use strum::{Display, EnumString};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::{channels::MediaKind, domain::ChatId, Result};

pub const MIN_FORWARD_DELAY: u64 = 1;
pub const MIN_BATCH_SIZE: u32 = 10;
pub const MAX_BATCH_SIZE: u32 = 200;
pub const MIN_BATCH_DELAY: u64 = 30;
pub const MIN_NOTIFY_INTERVAL: u64 = 30;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotSettings {
    pub source_channel: Option<ChatId>,
    pub destination_channel: Option<ChatId>,
    /// Seconds between copies.
    pub forward_delay: u64,
    pub batch_size: u32,
    /// Seconds to rest after each batch.
    pub batch_delay: u64,
    /// Minimum seconds between routine admin notifications.
    pub notify_interval: u64,
    #[serde(deserialize_with = "lenient_media_kinds")]
    pub skip_media_types: Vec<MediaKind>,
    pub auto_mode: bool,
    pub keep_alive: bool,
    pub notifications: bool,

    // Counters written by older versions; read once, never written back.
    #[serde(skip_serializing)]
    pub is_running: Option<bool>,
    #[serde(skip_serializing)]
    pub forwarded_count: Option<u64>,
    #[serde(skip_serializing)]
    pub last_forwarded_id: Option<i32>,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            source_channel: None,
            destination_channel: None,
            forward_delay: 3,
            batch_size: 50,
            batch_delay: 300,
            notify_interval: 600,
            skip_media_types: Vec::new(),
            auto_mode: false,
            keep_alive: true,
            notifications: true,
            is_running: None,
            forwarded_count: None,
            last_forwarded_id: None,
        }
    }
}

fn lenient_media_kinds<'de, D>(de: D) -> std::result::Result<Vec<MediaKind>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<String>::deserialize(de)?;
    Ok(raw.iter().filter_map(|s| s.parse().ok()).collect())
}

/// Copy-loop pacing, snapshotted from the settings once per iteration.
#[derive(Clone, Debug, PartialEq)]
pub struct Pacing {
    pub forward_delay: Duration,
    pub batch_size: u32,
    pub batch_delay: Duration,
    pub skip: Vec<MediaKind>,
}

impl BotSettings {
    pub fn pacing(&self) -> Pacing {
        Pacing {
            forward_delay: Duration::from_secs(self.forward_delay),
            batch_size: self.batch_size.max(1),
            batch_delay: Duration::from_secs(self.batch_delay),
            skip: self.skip_media_types.clone(),
        }
    }

    pub fn set_forward_delay(&mut self, secs: i64) -> u64 {
        self.forward_delay = (secs.max(MIN_FORWARD_DELAY as i64)) as u64;
        self.forward_delay
    }

    pub fn set_batch_size(&mut self, size: i64) -> u32 {
        self.batch_size = size.clamp(MIN_BATCH_SIZE as i64, MAX_BATCH_SIZE as i64) as u32;
        self.batch_size
    }

    pub fn set_batch_delay(&mut self, secs: i64) -> u64 {
        self.batch_delay = (secs.max(MIN_BATCH_DELAY as i64)) as u64;
        self.batch_delay
    }

    pub fn set_notify_interval(&mut self, secs: i64) -> u64 {
        self.notify_interval = (secs.max(MIN_NOTIFY_INTERVAL as i64)) as u64;
        self.notify_interval
    }

    pub fn apply_preset(&mut self, preset: SpeedPreset) {
        let (delay, size, rest) = preset.values();
        self.forward_delay = delay;
        self.batch_size = size;
        self.batch_delay = rest;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SpeedPreset {
    Safe,
    Balanced,
    Fast,
    Turbo,
}

impl SpeedPreset {
    /// (forward delay s, batch size, batch delay s)
    pub fn values(self) -> (u64, u32, u64) {
        match self {
            SpeedPreset::Safe => (3, 50, 300),
            SpeedPreset::Balanced => (2, 100, 120),
            SpeedPreset::Fast => (1, 150, 90),
            SpeedPreset::Turbo => (1, 200, 60),
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            SpeedPreset::Safe => "🐢 Safe Mode - Slowest, safest",
            SpeedPreset::Balanced => "⚖️ Balanced - Good speed, very safe",
            SpeedPreset::Fast => "🚀 Fast - High speed, small risk",
            SpeedPreset::Turbo => "⚡ Turbo - Maximum speed, moderate risk",
        }
    }
}

/// Legacy counters found in an old settings file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LegacyCounters {
    pub forwarded_count: u64,
    pub last_forwarded_id: i32,
}

/// JSON-backed settings store. Every update is written through to disk.
pub struct SettingsStore {
    path: PathBuf,
    state: Mutex<BotSettings>,
}

impl SettingsStore {
    /// Load from `path`; a missing or unreadable file yields defaults.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = match read_settings_file(&path) {
            Ok(Some(s)) => {
                info!(path = %path.display(), "Config loaded from file");
                s
            }
            Ok(None) => {
                info!("Using default config");
                BotSettings::default()
            }
            Err(e) => {
                error!(path = %path.display(), "Error loading config: {e}");
                BotSettings::default()
            }
        };
        Self {
            path,
            state: Mutex::new(settings),
        }
    }

    pub async fn get(&self) -> BotSettings {
        self.state.lock().await.clone()
    }

    /// Mutate and persist. Returns the updated settings.
    ///
    /// Memory only changes once the file write succeeded.
    pub async fn update<R>(&self, f: impl FnOnce(&mut BotSettings) -> R) -> Result<(R, BotSettings)> {
        let mut st = self.state.lock().await;
        let mut next = st.clone();
        let out = f(&mut next);
        write_settings_file(&self.path, &next)?;
        *st = next.clone();
        Ok((out, next))
    }

    /// Take the counters an older version left in the file (once).
    pub async fn take_legacy_counters(&self) -> Option<LegacyCounters> {
        let mut st = self.state.lock().await;
        let count = st.forwarded_count.take();
        let last = st.last_forwarded_id.take();
        st.is_running = None;
        if count.is_none() && last.is_none() {
            return None;
        }
        Some(LegacyCounters {
            forwarded_count: count.unwrap_or(0),
            last_forwarded_id: last.unwrap_or(0).max(0),
        })
    }
}

fn read_settings_file(path: &Path) -> Result<Option<BotSettings>> {
    if !path.exists() {
        return Ok(None);
    }
    let txt = fs::read_to_string(path)?;
    if txt.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&txt)?))
}

fn write_settings_file(path: &Path, settings: &BotSettings) -> Result<()> {
    let txt = serde_json::to_string_pretty(settings)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, txt)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
