use std::{path::Path, sync::Arc};

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use relay_core::{
    config::{self, Config},
    credentials,
    keepalive::KeepAlive,
    logging,
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
    },
    notify::Notifier,
    progress::ProgressTracker,
    relay::{Relay, StatusProvider},
    settings::SettingsStore,
    storage::Database,
};
use relay_http::HttpState;
use relay_telegram::{
    handlers::menus,
    router::{self, AppState},
    TelegramChannels, TelegramMessenger,
};

const SERVICE: &str = "channel-relay";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::load_dotenv_if_present(Path::new(".env"));
    logging::init("relay", &config::log_file_from_env())?;

    if let Err(e) = run().await {
        error!("Fatal: {e:#}");
        return Err(e);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let cfg = Arc::new(Config::load()?);
    let creds = credentials::resolve(&cfg)?;
    let (bot, me) = router::connect(&creds.token).await?;

    let db = Database::open(&cfg.db_path)
        .await
        .with_context(|| format!("failed to open database {}", cfg.db_path.display()))?;
    let settings = Arc::new(SettingsStore::load(cfg.config_file.clone()));
    let legacy = settings.take_legacy_counters().await;
    let progress = Arc::new(ProgressTracker::load(db, cfg.save_every, legacy).await?);

    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        Arc::new(TelegramMessenger::new(bot.clone())),
        ThrottleConfig::default(),
    ));
    let notifier = Arc::new(Notifier::new(
        Arc::clone(&messenger),
        cfg.admin_chat(),
        Arc::clone(&settings),
    ));
    let relay = Arc::new(Relay::new(
        Arc::clone(&cfg),
        Arc::clone(&settings),
        progress,
        Arc::new(TelegramChannels::new(bot.clone(), cfg.admin_chat())),
        Arc::clone(&notifier),
    ));

    let interrupted = relay.recover_interrupted().await?;

    let cancel = CancellationToken::new();
    let status: Arc<dyn StatusProvider> = relay.clone();

    let http = cfg.http_enabled.then(|| {
        let state = HttpState {
            status: Arc::clone(&status),
            service: SERVICE,
            version: env!("CARGO_PKG_VERSION"),
        };
        let addr = cfg.http_addr;
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = relay_http::serve(addr, state, cancel).await {
                error!("HTTP server failed: {e}");
            }
        })
    });

    let keepalive = KeepAlive::new(
        status,
        settings,
        Arc::clone(&notifier),
        cfg.keepalive_url.clone(),
        cfg.keepalive_interval,
    )
    .spawn(cancel.clone());

    let snapshot = relay.status().await;
    let mut greeting = format!(
        "🤖 <b>Bot started</b> as @{}\n\n{}",
        me.username(),
        menus::main_menu_text(&snapshot)
    );
    if interrupted {
        greeting.push_str(&format!(
            "\n\n⚠️ The previous run was interrupted at ID {}. Press Start to resume.",
            snapshot.last_forwarded_id
        ));
    }
    if let Err(e) = messenger
        .send_keyboard(cfg.admin_chat(), &greeting, menus::main_menu(&snapshot))
        .await
    {
        error!("Failed to send startup notice: {e}");
    }

    info!(service = SERVICE, "Started");
    let state = Arc::new(AppState {
        cfg: Arc::clone(&cfg),
        relay: Arc::clone(&relay),
        messenger,
    });
    let polled = router::run_polling(bot, state).await;

    info!("Shutting down");
    relay.stop_copy();
    if let Err(e) = relay.progress().flush().await {
        error!("Failed to save progress on shutdown: {e}");
    }
    cancel.cancel();
    let _ = keepalive.await;
    if let Some(h) = http {
        let _ = h.await;
    }
    polled
}
