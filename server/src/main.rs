//! phabrelay binary: connect Telegram, start the Phabricator bridge and the Icinga webhook.
//! Settings come from settings.json (see PHABRELAY_SETTINGS); log level from RUST_LOG.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use phabrelay::config::{self, Config};
use phabrelay::im::daemon::OutboundHub;
use phabrelay::im::telegram::{self, TelegramTransport};
use phabrelay::im::worker::{run_worker, InboundMessage};
use phabrelay::im::ChatNetworks;
use phabrelay::phab::conduit::HttpConnector;
use phabrelay::phab::PhabBridge;

const INBOUND_QUEUE: usize = 256;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Arc::new(config::ensure_loaded().clone());
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))
}

async fn run(config: Arc<Config>) -> anyhow::Result<()> {
    let networks = ChatNetworks::new();

    let bot = match config.telegram_bot_token.as_deref() {
        Some(token) => match telegram::connect(token).await {
            Ok(bot) => {
                networks.register(OutboundHub::new(Arc::new(TelegramTransport::new(bot.clone()))));
                Some(bot)
            }
            Err(e) => {
                warn!(error = %e, "telegram unavailable, running without a chat network");
                None
            }
        },
        None => {
            warn!("telegram.bot_token not set, running without a chat network");
            None
        }
    };
    for channel_id in config.channels.keys() {
        networks.mark_joined(channel_id);
    }

    let connector = Arc::new(HttpConnector::new().context("building HTTP client")?);
    let bridge = PhabBridge::new(Arc::clone(&config), networks.clone(), connector);
    bridge.warm_up().await;

    let (inbound_tx, inbound_rx) = mpsc::channel::<InboundMessage>(INBOUND_QUEUE);
    tokio::spawn(run_worker(inbound_rx, Arc::clone(&bridge)));
    bridge.spawn_poller(config.poll_tick);

    let addr: SocketAddr = config
        .alerts_listen
        .parse()
        .with_context(|| format!("alerts.listen {:?} is not a socket address", config.alerts_listen))?;
    let alerts = tokio::spawn(phabrelay_server::run_alert_server(addr, networks.clone()));

    match bot {
        Some(bot) => {
            telegram::run_telegram_receiver(bot, networks, inbound_tx).await;
            info!("telegram receiver stopped, exiting");
            Ok(())
        }
        None => {
            drop(inbound_tx);
            alerts.await?
        }
    }
}
