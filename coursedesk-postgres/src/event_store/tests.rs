use super::*;
use crate::Error;
use coursedesk_events::serde::Json;
use coursedesk_events::{domain_ids, query, DomainIdSet, Event, EventStore};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
enum ShoppingCartEvent {
    Added { product_id: String, cart_id: String },
    Removed { product_id: String, cart_id: String },
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
                product_id,
                cart_id,
            }
            | ShoppingCartEvent::Removed {
                product_id,
                cart_id,
            } => domain_ids! {product_id: product_id, cart_id: cart_id},
        }
    }
}

fn added(product_id: &str, cart_id: &str) -> ShoppingCartEvent {
    ShoppingCartEvent::Added {
        product_id: product_id.to_string(),
        cart_id: cart_id.to_string(),
    }
}

fn removed(product_id: &str, cart_id: &str) -> ShoppingCartEvent {
    ShoppingCartEvent::Removed {
        product_id: product_id.to_string(),
        cart_id: cart_id.to_string(),
    }
}

async fn event_store(pool: PgPool) -> PgEventStore<ShoppingCartEvent, Json<ShoppingCartEvent>> {
    PgEventStore::try_new(pool, Json::default()).await.unwrap()
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn it_queries_events(pool: PgPool) {
    let event_store = event_store(pool).await;
    event_store
        .append_without_validation(vec![
            added("p1", "c1"),
            removed("p1", "c1"),
            added("p2", "c1"),
            added("p1", "c2"),
        ])
        .await
        .unwrap();

    let query = query!(ShoppingCartEvent, (product_id == "p1") and (cart_id == "c1"));
    let result: Vec<_> = event_store.stream(&query).try_collect().await.unwrap();

    assert_eq!(
        result.into_iter().map(|e| e.into_inner()).collect::<Vec<_>>(),
        vec![added("p1", "c1"), removed("p1", "c1")]
    );
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn it_streams_events_after_the_origin_in_append_order(pool: PgPool) {
    let event_store = event_store(pool).await;
    let persisted = event_store
        .append_without_validation(vec![added("p1", "c1"), added("p2", "c1"), added("p3", "c1")])
        .await
        .unwrap();

    let query = query!(ShoppingCartEvent, cart_id == "c1").change_origin(persisted[0].id());
    let ids: Vec<_> = event_store
        .stream(&query)
        .map_ok(|e| e.id())
        .try_collect()
        .await
        .unwrap();

    assert_eq!(ids, vec![persisted[1].id(), persisted[2].id()]);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn it_appends_events(pool: PgPool) {
    let event_store = event_store(pool).await;
    let query = query!(ShoppingCartEvent, (product_id == "p1") or (cart_id == "c1"));

    let result = event_store
        .append(vec![added("p1", "c1")], query, 0)
        .await
        .unwrap();

    assert_eq!(result.len(), 1);
    assert_eq!(result[0].name(), "ShoppingCartAdded");
    assert_eq!(
        result[0].domain_ids(),
        domain_ids! {product_id: "p1", cart_id: "c1"}
    );
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn it_returns_a_concurrency_error_when_the_stream_changed(pool: PgPool) {
    let event_store = event_store(pool).await;
    let query = query!(ShoppingCartEvent, cart_id == "c1");
    event_store
        .append(vec![added("p1", "c1")], query.clone(), 0)
        .await
        .unwrap();

    let result = event_store.append(vec![removed("p1", "c1")], query, 0).await;

    assert!(matches!(result, Err(Error::Concurrency)));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn it_ignores_events_of_other_streams_when_validating(pool: PgPool) {
    let event_store = event_store(pool).await;
    event_store
        .append_without_validation(vec![added("p1", "c2")])
        .await
        .unwrap();

    let query = query!(ShoppingCartEvent, cart_id == "c1");
    let result = event_store.append(vec![added("p1", "c1")], query, 0).await;

    assert!(result.is_ok());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn it_ignores_excluded_events_when_validating(pool: PgPool) {
    let event_store = event_store(pool).await;
    event_store
        .append_without_validation(vec![added("p1", "c1")])
        .await
        .unwrap();

    let query =
        query!(ShoppingCartEvent, cart_id == "c1").exclude_events(&["ShoppingCartAdded"]);
    let result = event_store.append(vec![removed("p1", "c1")], query, 0).await;

    assert!(result.is_ok());
}
