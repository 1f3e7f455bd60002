//! PostgreSQL Event Store
//!
//! This module provides an implementation of the `EventStore` trait using PostgreSQL as the underlying storage.
//! Events live in a single `event` table: the domain identifiers of each event are stored as a
//! JSONB object, so stream queries become containment checks served by a GIN index.
mod criteria;
#[cfg(test)]
mod tests;

use std::marker::PhantomData;

use async_stream::try_stream;
use async_trait::async_trait;
use coursedesk_events::serde::Serde;
use coursedesk_events::{Event, EventId, EventStore, PersistedEvent, StreamQuery};
use criteria::CriteriaBuilder;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use sqlx::{PgConnection, Postgres, QueryBuilder, Row};

use crate::Error;

/// Key of the transaction level advisory lock taken by every append.
///
/// Appends are serialized: the conflict check and the insert cannot interleave with another
/// append, and event ids become visible in increasing order.
const APPEND_LOCK_KEY: i64 = 0x636f_7572_7365;

/// PostgreSQL event store implementation.
#[derive(Clone)]
pub struct PgEventStore<E, S>
where
    S: Serde<E> + Send + Sync,
{
    pub(crate) pool: PgPool,
    serde: S,
    event_type: PhantomData<fn() -> E>,
}

impl<E, S> PgEventStore<E, S>
where
    S: Serde<E> + Send + Sync,
    E: Event,
{
    /// Initializes the PostgreSQL DB and returns a new instance of `PgEventStore`.
    ///
    /// # Arguments
    ///
    /// * `pool` - The PostgreSQL connection pool.
    /// * `serde` - The serialization implementation for the event payload.
    pub async fn try_new(pool: PgPool, serde: S) -> Result<Self, Error> {
        setup(&pool).await?;
        Ok(Self::new_uninitialized(pool, serde))
    }

    /// Creates a new instance of `PgEventStore` without touching the database.
    ///
    /// The `event` table and its indexes must already exist. Refer to the SQL files in the
    /// "event_store/sql" directory to recreate them.
    pub fn new_uninitialized(pool: PgPool, serde: S) -> Self {
        Self {
            pool,
            serde,
            event_type: PhantomData,
        }
    }

    /// Returns the connection pool of the store.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert(
        &self,
        conn: &mut PgConnection,
        events: Vec<E>,
    ) -> Result<Vec<PersistedEvent<E>>, Error> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let rows = events
            .iter()
            .map(|event| {
                let payload = self
                    .serde
                    .serialize(event)
                    .map_err(|err| Error::Serialization(Box::new(err)))?;
                Ok((event.name(), Json(event.domain_ids()), payload))
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let mut insert =
            QueryBuilder::<Postgres>::new("INSERT INTO event (event_type, domain_ids, payload) ");
        insert.push_values(rows, |mut row, (name, domain_ids, payload)| {
            row.push_bind(name).push_bind(domain_ids).push_bind(payload);
        });
        insert.push(" RETURNING event_id");

        let ids: Vec<EventId> = insert.build_query_scalar().fetch_all(&mut *conn).await?;

        Ok(ids
            .into_iter()
            .zip(events)
            .map(|(id, event)| PersistedEvent::new(id, event))
            .collect())
    }
}

/// Implementation of the event store using PostgreSQL.
#[async_trait]
impl<E, S> EventStore<E> for PgEventStore<E, S>
where
    E: Event + Clone + Send + Sync + 'static,
    S: Serde<E> + Send + Sync,
{
    type Error = Error;

    /// Streams the events selected by the query, ordered by event id.
    fn stream<'a>(
        &'a self,
        query: &'a StreamQuery<E>,
    ) -> BoxStream<'a, Result<PersistedEvent<E>, Self::Error>> {
        try_stream! {
            let mut sql = QueryBuilder::<Postgres>::new("SELECT event_id, payload FROM event WHERE ");
            CriteriaBuilder::new(&mut sql).push_query(query);
            sql.push(" ORDER BY event_id ASC");

            let mut rows = sql.build().fetch(&self.pool);
            while let Some(row) = rows.try_next().await? {
                let id: EventId = row.try_get(0)?;
                let payload: Vec<u8> = row.try_get(1)?;
                let event = self
                    .serde
                    .deserialize(&payload)
                    .map_err(|err| Error::Deserialization(Box::new(err)))?;
                yield PersistedEvent::new(id, event);
            }
        }
        .boxed()
    }

    /// Appends new events, failing with `Error::Concurrency` when an event matching `query`
    /// was stored after `last_event_id`.
    async fn append(
        &self,
        events: Vec<E>,
        query: StreamQuery<E>,
        last_event_id: EventId,
    ) -> Result<Vec<PersistedEvent<E>>, Self::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(APPEND_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let mut check = QueryBuilder::<Postgres>::new("SELECT EXISTS (SELECT 1 FROM event WHERE ");
        CriteriaBuilder::new(&mut check).push_query(&query.change_origin(last_event_id));
        check.push(")");
        let conflict: bool = check.build_query_scalar().fetch_one(&mut *tx).await?;
        if conflict {
            tracing::debug!(last_event_id, "append rejected, the stream changed");
            return Err(Error::Concurrency);
        }

        let persisted = self.insert(&mut tx, events).await?;
        tx.commit().await?;
        Ok(persisted)
    }

    /// Appends new events without checking for conflicts.
    async fn append_without_validation(
        &self,
        events: Vec<E>,
    ) -> Result<Vec<PersistedEvent<E>>, Self::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(APPEND_LOCK_KEY)
            .execute(&mut *tx)
            .await?;
        let persisted = self.insert(&mut tx, events).await?;
        tx.commit().await?;
        Ok(persisted)
    }
}

/// Creates the `event` table and its indexes.
pub(crate) async fn setup(pool: &PgPool) -> Result<(), Error> {
    sqlx::query(include_str!("event_store/sql/table_event.sql"))
        .execute(pool)
        .await?;
    sqlx::query(include_str!("event_store/sql/idx_event_type.sql"))
        .execute(pool)
        .await?;
    sqlx::query(include_str!("event_store/sql/idx_event_domain_ids.sql"))
        .execute(pool)
        .await?;
    Ok(())
}
