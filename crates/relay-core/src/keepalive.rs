//! Heartbeat task: log, self-ping, and an hourly status report.

use std::{sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    formatting::format_status_html,
    notify::Notifier,
    relay::StatusProvider,
    settings::SettingsStore,
};

const REPORT_EVERY: Duration = Duration::from_secs(3600);
const PING_TIMEOUT: Duration = Duration::from_secs(10);

pub struct KeepAlive {
    status: Arc<dyn StatusProvider>,
    settings: Arc<SettingsStore>,
    notifier: Arc<Notifier>,
    ping_url: Option<String>,
    interval: Duration,
    http: reqwest::Client,
}

impl KeepAlive {
    pub fn new(
        status: Arc<dyn StatusProvider>,
        settings: Arc<SettingsStore>,
        notifier: Arc<Notifier>,
        base_url: Option<String>,
        interval: Duration,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(PING_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            status,
            settings,
            notifier,
            ping_url: base_url.map(|u| format!("{}/ping", u.trim_end_matches('/'))),
            interval,
            http,
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), "Keep-alive started");
            let mut last_report = Instant::now();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.interval) => {}
                }
                if self.tick(last_report).await {
                    last_report = Instant::now();
                }
            }
            info!("Keep-alive stopped");
        })
    }

    /// One heartbeat. Returns whether an hourly report was sent.
    async fn tick(&self, last_report: Instant) -> bool {
        if !self.settings.get().await.keep_alive {
            debug!("Keep-alive disabled, skipping heartbeat");
            return false;
        }

        let snapshot = self.status.status().await;
        info!(
            forwarded = snapshot.forwarded_count,
            running = snapshot.running,
            "Keep-alive heartbeat"
        );

        if let Some(url) = &self.ping_url {
            match self.http.get(url).send().await {
                Ok(resp) => debug!(status = %resp.status(), "Self-ping ok"),
                Err(e) => warn!("Self-ping failed: {e}"),
            }
        }

        if last_report.elapsed() < REPORT_EVERY {
            return false;
        }
        let html = format!("⏰ <b>Hourly status</b>\n\n{}", format_status_html(&snapshot));
        self.notifier.routine(&html).await
    }
}
