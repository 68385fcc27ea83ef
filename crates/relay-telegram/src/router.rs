use std::sync::Arc;

use anyhow::Context;
use teloxide::{dispatching::Dispatcher, dptree, prelude::*, types::Me};
use tracing::info;

use relay_core::{config::Config, messaging::port::MessagingPort, relay::Relay};

use crate::handlers;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub relay: Arc<Relay>,
    pub messenger: Arc<dyn MessagingPort>,
}

/// Create the bot client and check the credential with `getMe`.
pub async fn connect(token: &str) -> anyhow::Result<(Bot, Me)> {
    let bot = Bot::new(token);
    let me = bot
        .get_me()
        .await
        .context("Not authorized: getMe failed, check the bot credential")?;
    info!(username = %me.username(), "Connected to Telegram");
    Ok((bot, me))
}

/// Run the update dispatcher until Ctrl-C.
pub async fn run_polling(bot: Bot, state: Arc<AppState>) -> anyhow::Result<()> {
    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message))
        .branch(Update::filter_channel_post().endpoint(handlers::handle_channel_post));

    info!("Polling for updates");
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .default_handler(|_| async {})
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
