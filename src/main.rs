//! Commerce core - HTTP service

use std::sync::Arc;

use anyhow::{bail, Result};
use commerce_core::clock::{Clock, SystemClock};
use commerce_core::config::{Config, PaymentMode};
use commerce_core::gateway::{GatewayRegistry, OfflineGateway, SandboxGateway, StripeGateway};
use commerce_core::http::{router, AppState};
use commerce_core::notify::{spawn_dispatcher, EventPublisher, LogSink, NatsSink, NotificationSink};
use commerce_core::services::{Deps, Services};
use commerce_core::store::PgStore;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();

    let db = PgPoolOptions::new().max_connections(config.database_max_connections).connect(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let gateways = payment_gateways(&config, clock.clone())?;
    let sink: Arc<dyn NotificationSink> = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Arc::new(NatsSink::new(client, config.notify_subject_prefix.clone())),
            Err(err) => {
                tracing::warn!(error = %err, "NATS unavailable, notifications go to the log");
                Arc::new(LogSink)
            }
        },
        None => Arc::new(LogSink),
    };
    let (events, queue) = EventPublisher::new(config.notify_queue_capacity);
    spawn_dispatcher(queue, sink);

    let services = Services::new(Deps {
        store: Arc::new(PgStore::new(db)),
        gateways: Arc::new(gateways),
        clock,
        events,
        defaults: config.store_defaults.clone(),
    });
    tokio::spawn(services.maintenance.clone().run(config.sweep_interval));

    let app = router(AppState { services: Arc::new(services) });
    tracing::info!("commerce core listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?, app).await?;
    Ok(())
}

fn payment_gateways(config: &Config, clock: Arc<dyn Clock>) -> Result<GatewayRegistry> {
    let mut registry = GatewayRegistry::new(config.gateway_timeout).with(Arc::new(OfflineGateway::new()));
    match (&config.stripe, config.payment_mode) {
        (Some(stripe), _) => registry = registry.with(Arc::new(StripeGateway::new(stripe, clock)?)),
        (None, PaymentMode::Live) => bail!("PAYMENT_MODE=live requires STRIPE_API_KEY"),
        (None, PaymentMode::Test) => {}
    }
    if config.payment_mode == PaymentMode::Test {
        tracing::info!("payment mode test: sandbox gateway enabled");
        registry = registry.with(Arc::new(SandboxGateway::new()));
    }
    Ok(registry)
}
