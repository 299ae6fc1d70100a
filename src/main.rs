use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use arus::application::dispatcher::{LogSink, OrderEventSink, UpdateDispatcher};
use arus::application::session::{
    BackoffPolicy, PrivateSession, PublicConfig, PublicSession, ReconnectionSupervisor,
    SessionConfig,
};
use arus::config::AppConfig;
use arus::domain::repositories::exchange_rest::ExchangeRest;
use arus::infrastructure::credentials::EnvCredentials;
use arus::infrastructure::rest_client::HttpExchangeRest;
use arus::persistence::bots::BotRepository;
use arus::persistence::keys::KeyBuilder;
use arus::persistence::orders::OrderRepository;
use arus::persistence::positions::PositionRepository;
use arus::persistence::store::{KeyedStore, MemoryStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arus=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();
    info!(
        rest = %config.rest_base_url,
        public_ws = %config.public_ws_url,
        private_ws = %config.private_ws_url,
        "starting arus"
    );

    let store: Arc<dyn KeyedStore> = Arc::new(MemoryStore::new());
    let keys = KeyBuilder::new(config.key_prefix.clone());
    let orders = OrderRepository::new(store.clone(), keys.clone());
    let positions = PositionRepository::new(store.clone(), keys.clone());
    let bots = BotRepository::new(store.clone(), keys.clone());

    let credentials = Arc::new(EnvCredentials::default());
    let rest: Arc<dyn ExchangeRest> =
        Arc::new(HttpExchangeRest::new(config.rest_base_url.clone(), credentials));

    let sink: Arc<dyn OrderEventSink> = Arc::new(LogSink);
    let dispatcher = Arc::new(UpdateDispatcher::new(orders, positions, bots, sink));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let policy = BackoffPolicy {
        initial: config.reconnect_initial_delay,
        max: config.reconnect_max_delay,
        multiplier: 2.0,
    };

    // public market data feed: retried indefinitely
    let (public, public_disconnects) = PublicSession::new(PublicConfig {
        ping_interval: config.heartbeat_interval,
        ..PublicConfig::new(config.public_ws_url.clone())
    });
    public.subscribe("market:summary-24h").await.ok();
    if let Err(e) = public.connect().await {
        warn!(error = %e, "initial public feed connection failed; retrying in background");
    }
    tokio::spawn(
        ReconnectionSupervisor::new(public.clone(), policy.clone(), None, shutdown_rx.clone())
            .run(public_disconnects),
    );

    // private per-account feed: bounded attempt budget
    let (private, private_disconnects) = PrivateSession::new(
        SessionConfig {
            heartbeat_interval: config.heartbeat_interval,
            ..SessionConfig::new(config.private_ws_url.clone(), config.private_channel.clone())
        },
        rest,
        dispatcher,
    );
    match private.connect().await {
        Ok(()) => {
            if let Err(e) = private.wait_for_handshake(config.handshake_timeout).await {
                error!(error = %e, "private feed handshake failed");
            }
        }
        Err(e) => warn!(error = %e, "initial private feed connection failed; retrying in background"),
    }
    tokio::spawn(
        ReconnectionSupervisor::new(
            private.clone(),
            policy,
            Some(config.private_max_attempts),
            shutdown_rx,
        )
        .run(private_disconnects),
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    let _ = shutdown_tx.send(true);
    private.close().await;
    public.close().await;
    Ok(())
}
