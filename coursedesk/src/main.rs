use std::sync::Arc;

use actix_web::{middleware::Logger, App, HttpServer};
use anyhow::{anyhow, Result};
use coursedesk::application::Application;
use coursedesk::config::{Config, EventStoreKind};
use coursedesk::domain::DomainEvent;
use coursedesk::gateway::{ClickPayGateway, Gateways, HyperPayGateway};
use coursedesk::http::{self, AdminKey};
use coursedesk::listeners::{EnrollmentIssuer, NotificationDispatcher};
use coursedesk::notifier::{LogNotifier, Notifier};
use coursedesk::storage::{FileStorage, LocalFileStorage};
use coursedesk::telemetry;
use coursedesk_events::serde::Json;
use coursedesk_events::{EventStore, InMemoryEventListener, InMemoryEventStore, ListenerConfig};
use coursedesk_postgres::{PgEventListener, PgEventStore};
use sqlx::postgres::{PgConnectOptions, PgPool};
use tokio::signal;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    telemetry::init();

    let storage: Arc<dyn FileStorage> = Arc::new(LocalFileStorage::new(&config.storage_root));
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let listener_config = ListenerConfig::poller(config.listener_poll)
        .with_batch_size(config.listener_batch_size);

    match config.event_store {
        EventStoreKind::Memory => {
            tracing::warn!("events are kept in memory and lost on shutdown");
            let event_store = InMemoryEventStore::<DomainEvent>::new();
            let app = application(&config, event_store.clone(), storage);
            let event_listener = InMemoryEventListener::builder(event_store)
                .register_listener(EnrollmentIssuer::new(app.clone()), listener_config.clone())
                .register_listener(
                    NotificationDispatcher::new(notifier, config.public_base_url.clone()),
                    listener_config,
                )
                .start_with_shutdown(shutdown());
            tokio::try_join!(http_server(&config, app), async {
                event_listener
                    .await
                    .map_err(|e| anyhow!("event listener exited with error: {e}"))
            })?;
        }
        EventStoreKind::Postgres => {
            let pool = connect(&config).await?;
            let event_store = PgEventStore::try_new(pool, Json::<DomainEvent>::default()).await?;
            let app = application(&config, event_store.clone(), storage);
            let event_listener = PgEventListener::builder(event_store)
                .register_listener(EnrollmentIssuer::new(app.clone()), listener_config.clone())
                .register_listener(
                    NotificationDispatcher::new(notifier, config.public_base_url.clone()),
                    listener_config,
                )
                .start_with_shutdown(shutdown());
            tokio::try_join!(http_server(&config, app), async {
                event_listener
                    .await
                    .map_err(|e| anyhow!("event listener exited with error: {e}"))
            })?;
        }
    }
    Ok(())
}

fn application<ES>(config: &Config, event_store: ES, storage: Arc<dyn FileStorage>) -> Application<ES> {
    let gateways = Gateways::new()
        .with(HyperPayGateway::new(config.hyperpay_webhook_secret.clone()))
        .with(ClickPayGateway::new(config.clickpay_webhook_secret.clone()));
    Application::new(event_store, storage, gateways, config.public_base_url.clone())
}

async fn connect(config: &Config) -> Result<PgPool> {
    let pool = match &config.database_url {
        Some(url) => PgPool::connect(url).await?,
        None => PgPool::connect_with(PgConnectOptions::new()).await?,
    };
    Ok(pool)
}

async fn http_server<ES>(config: &Config, app: Application<ES>) -> Result<()>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    let admin_key = AdminKey(config.admin_api_key.clone());
    tracing::info!(address = %config.bind_address, "listening");
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .configure(http::configure(app.clone(), admin_key.clone()))
    })
    .bind(config.bind_address)?
    .run()
    .await?;
    Ok(())
}

async fn shutdown() {
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!(error = %err, "cannot listen for the shutdown signal");
        std::future::pending::<()>().await;
    }
}
