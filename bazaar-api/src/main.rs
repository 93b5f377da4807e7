use anyhow::Context;
use bazaar_api::{app, AppState, AuthConfig};
use bazaar_core::PaymentProviderRegistry;
use bazaar_order::telemetry::{EventPublisher, NoopPublisher};
use bazaar_store::{Config, DbClient, EventProducer, PgOrderStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bazaar_api=debug,bazaar_order=debug,bazaar_core=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Bazaar API on port {}", config.server.port);

    // Database
    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;
    let rules = db
        .fetch_business_rules(config.business_rules.clone())
        .await
        .context("Failed to load business rules")?;
    tracing::info!(tax_rate = %rules.tax_rate, shipping_fee = %rules.shipping_fee, "Business rules loaded");

    // Events
    let publisher: Arc<dyn EventPublisher> = if config.kafka.enabled {
        Arc::new(EventProducer::new(&config.kafka.brokers).context("Failed to create Kafka producer")?)
    } else {
        tracing::warn!("Kafka disabled, domain events will not be published");
        Arc::new(NoopPublisher)
    };

    // Payment providers
    let registry = PaymentProviderRegistry::from_config(&config.payments).context("Failed to build payment providers")?;
    let methods: Vec<String> = registry.available().into_iter().map(|p| p.id).collect();
    tracing::info!("Payment methods available: {:?}", methods);

    let store = Arc::new(PgOrderStore::new(db.pool.clone(), rules.default_low_stock_threshold));
    let state = AppState::build(
        store,
        registry,
        rules.pricing_policy(),
        Duration::from_secs(config.payments.timeout_seconds),
        publisher,
        AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
    )?;

    let app = app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
