//! Admin notifications.
//!
//! Important notices (start, stop, completion, errors) always go out. Routine
//! ones (batch pauses, hourly reports) respect the `notifications` toggle and
//! are spaced at least `notify_interval` apart.

use std::{sync::Arc, time::Duration};

use tokio::{sync::Mutex, time::Instant};
use tracing::warn;

use crate::{domain::ChatId, messaging::port::MessagingPort, settings::SettingsStore};

pub struct Notifier {
    messenger: Arc<dyn MessagingPort>,
    admin: ChatId,
    settings: Arc<SettingsStore>,
    last_routine: Mutex<Option<Instant>>,
}

impl Notifier {
    pub fn new(messenger: Arc<dyn MessagingPort>, admin: ChatId, settings: Arc<SettingsStore>) -> Self {
        Self {
            messenger,
            admin,
            settings,
            last_routine: Mutex::new(None),
        }
    }

    /// Send regardless of toggles. Returns whether the message was delivered.
    pub async fn important(&self, html: &str) -> bool {
        self.deliver(html).await
    }

    /// Send if notifications are on and the routine interval has passed.
    pub async fn routine(&self, html: &str) -> bool {
        let settings = self.settings.get().await;
        if !settings.notifications {
            return false;
        }

        let interval = Duration::from_secs(settings.notify_interval);
        {
            let mut last = self.last_routine.lock().await;
            let now = Instant::now();
            if let Some(prev) = *last {
                if now.duration_since(prev) < interval {
                    return false;
                }
            }
            *last = Some(now);
        }

        self.deliver(html).await
    }

    async fn deliver(&self, html: &str) -> bool {
        match self.messenger.send_html(self.admin, html).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to notify admin: {e}");
                false
            }
        }
    }
}
