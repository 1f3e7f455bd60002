//! Listener runner backed by PostgreSQL.
//!
//! Each registered listener owns a checkpoint row in `event_listener`. A poll locks the row
//! with `SKIP LOCKED`, so concurrent instances of the application never handle the same batch,
//! and the new checkpoint is committed in the same transaction. Delivery is at least once.
#[cfg(test)]
mod tests;

use std::sync::Arc;

use async_trait::async_trait;
use coursedesk_events::serde::Serde;
use coursedesk_events::{handle_batch, Event, EventId, EventListener, EventStore, ListenerConfig};
use futures::future::join_all;
use futures::{Future, StreamExt, TryStreamExt};
use sqlx::{PgConnection, PgPool, Row};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::event_store::PgEventStore;
use crate::Error;

pub struct PgEventListener<E, S>
where
    E: Event + Clone,
    S: Serde<E> + Send + Sync,
{
    event_store: PgEventStore<E, S>,
    workers: Vec<Arc<dyn Worker>>,
    cancel: CancellationToken,
}

impl<E, S> PgEventListener<E, S>
where
    E: Event + Clone + Send + Sync + 'static,
    S: Serde<E> + Clone + Send + Sync + 'static,
{
    pub fn builder(event_store: PgEventStore<E, S>) -> Self {
        Self {
            event_store,
            workers: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Adds a listener. Its checkpoint starts at the beginning of the log the first time
    /// its id is seen.
    pub fn register_listener(
        mut self,
        listener: impl EventListener<E> + 'static,
        config: ListenerConfig,
    ) -> Self {
        let worker = ListenerWorker {
            event_store: self.event_store.clone(),
            listener,
            config,
        };
        self.workers.push(Arc::new(worker));
        self
    }

    /// Polls every listener until the runner is cancelled.
    pub async fn start(self) -> Result<(), Error> {
        setup(&self.event_store.pool).await?;
        for worker in &self.workers {
            worker.register().await?;
        }
        let tasks = self
            .workers
            .into_iter()
            .map(|worker| tokio::spawn(run(worker, self.cancel.clone())));
        join_all(tasks).await;
        Ok(())
    }

    /// Like [`start`](Self::start), stopping once `shutdown` completes.
    pub async fn start_with_shutdown<F: Future<Output = ()> + Send + 'static>(
        self,
        shutdown: F,
    ) -> Result<(), Error> {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            shutdown.await;
            cancel.cancel();
        });
        self.start().await
    }
}

async fn run(worker: Arc<dyn Worker>, cancel: CancellationToken) {
    let mut ticks = tokio::time::interval(worker.poll_interval());
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticks.tick() => {
                if let Err(err) = worker.poll().await {
                    tracing::error!(listener = worker.id(), error = %err, "listener poll failed");
                }
            }
        }
    }
    tracing::debug!(listener = worker.id(), "listener stopped");
}

#[async_trait]
trait Worker: Send + Sync {
    fn id(&self) -> &'static str;
    fn poll_interval(&self) -> std::time::Duration;
    /// Creates the checkpoint row when missing.
    async fn register(&self) -> Result<(), Error>;
    /// Handles one batch; transient connection failures are skipped until the next tick.
    async fn poll(&self) -> Result<(), Error>;
}

struct ListenerWorker<L, E, S>
where
    E: Event + Clone,
    S: Serde<E> + Send + Sync,
{
    event_store: PgEventStore<E, S>,
    listener: L,
    config: ListenerConfig,
}

impl<L, E, S> ListenerWorker<L, E, S>
where
    E: Event + Clone + Send + Sync + 'static,
    S: Serde<E> + Clone + Send + Sync,
    L: EventListener<E>,
{
    async fn claim_checkpoint(&self, conn: &mut PgConnection) -> Result<Option<EventId>, Error> {
        let row = sqlx::query(
            "SELECT last_processed_event_id FROM event_listener WHERE id = $1 FOR UPDATE SKIP LOCKED",
        )
        .bind(self.listener.id())
        .fetch_optional(conn)
        .await?;
        Ok(row.map(|row| row.get(0)))
    }

    async fn handle_next_batch(&self) -> Result<(), Error> {
        let mut tx = self.event_store.pool.begin().await?;
        let Some(checkpoint) = self.claim_checkpoint(&mut tx).await? else {
            // Another instance holds the row.
            return Ok(());
        };
        let query = self.listener.query().clone().change_origin(checkpoint);
        let batch: Vec<_> = self
            .event_store
            .stream(&query)
            .take(self.config.batch_size())
            .try_collect()
            .await?;
        let handled = handle_batch(&self.listener, batch, checkpoint).await;
        if handled > checkpoint {
            sqlx::query(
                "UPDATE event_listener SET last_processed_event_id = $1, updated_at = now() WHERE id = $2",
            )
            .bind(handled)
            .bind(self.listener.id())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl<L, E, S> Worker for ListenerWorker<L, E, S>
where
    E: Event + Clone + Send + Sync + 'static,
    S: Serde<E> + Clone + Send + Sync,
    L: EventListener<E>,
{
    fn id(&self) -> &'static str {
        self.listener.id()
    }

    fn poll_interval(&self) -> std::time::Duration {
        self.config.poll()
    }

    async fn register(&self) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO event_listener (id, last_processed_event_id) VALUES ($1, 0) ON CONFLICT (id) DO NOTHING",
        )
        .bind(self.listener.id())
        .execute(&self.event_store.pool)
        .await?;
        Ok(())
    }

    async fn poll(&self) -> Result<(), Error> {
        match self.handle_next_batch().await {
            Err(Error::Database(sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut)) => Ok(()),
            result => result,
        }
    }
}

pub(crate) async fn setup(pool: &PgPool) -> Result<(), Error> {
    sqlx::query(include_str!("listener/sql/table_event_listener.sql"))
        .execute(pool)
        .await?;
    Ok(())
}
