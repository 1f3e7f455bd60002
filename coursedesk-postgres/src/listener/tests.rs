use super::*;

use coursedesk_events::serde::Json;
use coursedesk_events::{domain_ids, query, DomainIdSet, PersistedEvent, StreamQuery};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
enum ShoppingCartEvent {
    Added { cart_id: String, product_id: String },
    Removed { cart_id: String, product_id: String },
}

impl Event for ShoppingCartEvent {
    const NAMES: &'static [&'static str] = &["ShoppingCartAdded", "ShoppingCartRemoved"];

    fn name(&self) -> &'static str {
        match self {
            ShoppingCartEvent::Added { .. } => "ShoppingCartAdded",
            ShoppingCartEvent::Removed { .. } => "ShoppingCartRemoved",
        }
    }

    fn domain_ids(&self) -> DomainIdSet {
        match self {
            ShoppingCartEvent::Added {
                cart_id,
                product_id,
            }
            | ShoppingCartEvent::Removed {
                cart_id,
                product_id,
            } => domain_ids! {cart_id: cart_id, product_id: product_id},
        }
    }
}

fn added(cart_id: &str, product_id: &str) -> ShoppingCartEvent {
    ShoppingCartEvent::Added {
        cart_id: cart_id.to_string(),
        product_id: product_id.to_string(),
    }
}

#[derive(FromRow)]
struct CartRow {
    cart_id: String,
    product_id: String,
}

struct CartProjection {
    query: StreamQuery<ShoppingCartEvent>,
    pool: PgPool,
}

impl CartProjection {
    async fn new(pool: PgPool) -> Result<Self, sqlx::Error> {
        sqlx::query("CREATE TABLE IF NOT EXISTS carts (cart_id TEXT, product_id TEXT)")
            .execute(&pool)
            .await?;
        Ok(Self {
            query: query!(ShoppingCartEvent, events[ShoppingCartAdded]),
            pool,
        })
    }

    async fn rows(pool: &PgPool) -> Vec<CartRow> {
        sqlx::query_as::<_, CartRow>("SELECT cart_id, product_id FROM carts")
            .fetch_all(pool)
            .await
            .unwrap()
    }
}

#[async_trait]
impl EventListener<ShoppingCartEvent> for CartProjection {
    type Error = sqlx::Error;

    fn id(&self) -> &'static str {
        "carts"
    }

    fn query(&self) -> &StreamQuery<ShoppingCartEvent> {
        &self.query
    }

    async fn handle(&self, event: PersistedEvent<ShoppingCartEvent>) -> Result<(), Self::Error> {
        if let ShoppingCartEvent::Added {
            cart_id,
            product_id,
        } = event.into_inner()
        {
            sqlx::query("INSERT INTO carts (cart_id, product_id) VALUES ($1, $2)")
                .bind(cart_id)
                .bind(product_id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }
}

async fn checkpoint(pool: &PgPool) -> EventId {
    sqlx::query("SELECT last_processed_event_id FROM event_listener WHERE id = 'carts'")
        .fetch_one(pool)
        .await
        .unwrap()
        .get(0)
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn it_handles_events_and_moves_the_checkpoint(pool: PgPool) {
    let event_store =
        PgEventStore::<ShoppingCartEvent, Json<ShoppingCartEvent>>::try_new(pool.clone(), Json::default())
            .await
            .unwrap();
    setup(&pool).await.unwrap();
    let worker = ListenerWorker {
        event_store: event_store.clone(),
        listener: CartProjection::new(pool.clone()).await.unwrap(),
        config: ListenerConfig::poller(Duration::from_secs(1)),
    };
    worker.register().await.unwrap();
    let persisted = event_store
        .append_without_validation(vec![added("c1", "p1"), added("c1", "p2")])
        .await
        .unwrap();

    worker.poll().await.unwrap();
    worker.poll().await.unwrap();

    let rows = CartProjection::rows(&pool).await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].cart_id, "c1");
    assert_eq!(rows[0].product_id, "p1");
    assert_eq!(checkpoint(&pool).await, persisted[1].id());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn it_runs_event_listeners_until_shutdown(pool: PgPool) {
    let event_store =
        PgEventStore::<ShoppingCartEvent, Json<ShoppingCartEvent>>::try_new(pool.clone(), Json::default())
            .await
            .unwrap();
    let listener = PgEventListener::builder(event_store.clone())
        .register_listener(
            CartProjection::new(pool.clone()).await.unwrap(),
            ListenerConfig::poller(Duration::from_millis(50)),
        )
        .start_with_shutdown(tokio::time::sleep(Duration::from_millis(400)));
    let append = event_store.append(
        vec![added("c1", "p1")],
        query!(ShoppingCartEvent, cart_id == "c1"),
        0,
    );

    let (listener_result, append_result) = tokio::join!(listener, append);

    assert!(listener_result.is_ok());
    assert!(append_result.is_ok());
    assert_eq!(CartProjection::rows(&pool).await.len(), 1);
}
