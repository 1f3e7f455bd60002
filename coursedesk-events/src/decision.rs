//! A Decision serves as a building block for developing the business logic of an application.
//!
//! The `DecisionMaker` hydrates the state required by a decision, lets the decision
//! compute the changes, and appends them with an optimistic-concurrency check: the append
//! fails if an event matching the validation query was stored after the state was read.
//! Conflicting decisions are retried on fresh state a bounded number of times.
use crate::event::{Event, EventId, PersistedEvent};
use crate::event_store::{EventStore, EventStoreError};
use crate::state::{IntoState, IntoStatePart, MultiState};
use crate::stream_query::StreamQuery;
use futures::TryStreamExt;

/// Represents a business decision taken from the occurred events.
pub trait Decision: Send + Sync {
    type Event: Event + Clone + Send + Sync;
    type StateQuery: Send + Sync;
    type Error: Send + Sync;

    /// Returns the states, still empty, the decision is made on.
    fn state_query(&self) -> Self::StateQuery;

    /// Retrieves the stream query used to validate the decision.
    ///
    /// When `None`, the union of the state queries is used: the decision is confirmed only
    /// if no event that would make the state outdated was stored in the meantime.
    /// A narrower query avoids conflicts with events that cannot invalidate the decision.
    /// For instance, recording a download only needs to be invalidated by a revocation,
    /// not by other downloads.
    fn validation_query(&self) -> Option<StreamQuery<Self::Event>> {
        None
    }

    /// Process the decision from the hydrated state.
    fn process(&self, state: &Self::StateQuery) -> Result<Vec<Self::Event>, Self::Error>;
}

#[derive(thiserror::Error, Debug)]
pub enum Error<ES, DE> {
    #[error("event store error: {0}")]
    EventStore(#[source] ES),
    #[error("domain error: {0}")]
    Domain(#[source] DE),
}

/// A state loaded from the event store, with the id of the last event applied to it.
#[derive(Debug, Clone)]
pub struct LoadedState<S> {
    state: S,
    version: EventId,
}

impl<S> LoadedState<S> {
    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn version(&self) -> EventId {
        self.version
    }

    pub fn into_state(self) -> S {
        self.state
    }
}

const DEFAULT_MAX_RETRIES: usize = 3;

/// Executes business decisions.
#[derive(Clone)]
pub struct DecisionMaker<ES> {
    event_store: ES,
    max_retries: usize,
}

impl<ES> DecisionMaker<ES> {
    /// Creates a new instance of `DecisionMaker`.
    pub fn new(event_store: ES) -> Self {
        Self {
            event_store,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Sets how many times a decision is retried after a concurrency conflict.
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn event_store(&self) -> &ES {
        &self.event_store
    }

    /// Makes the given business decision and returns the persisted events.
    ///
    /// A decision producing no events is a no-op: nothing is appended.
    pub async fn make<D, E, SP>(
        &self,
        decision: D,
    ) -> Result<Vec<PersistedEvent<E>>, Error<ES::Error, D::Error>>
    where
        E: Event + Clone + Send + Sync + 'static,
        ES: EventStore<E>,
        D: Decision<Event = E>,
        D::StateQuery: IntoStatePart<D::StateQuery, Target = SP>,
        SP: IntoState<D::StateQuery> + MultiState<E> + Send,
    {
        let mut attempt = 0;
        loop {
            let state = self
                .hydrate(decision.state_query().into_state_part())
                .await
                .map_err(Error::EventStore)?;
            let version = state.version();
            let validation_query = decision
                .validation_query()
                .unwrap_or_else(|| state.query_all());
            let changes = decision
                .process(&state.into_state())
                .map_err(Error::Domain)?;
            if changes.is_empty() {
                return Ok(vec![]);
            }
            match self
                .event_store
                .append(changes, validation_query, version)
                .await
            {
                Ok(events) => return Ok(events),
                Err(err) if err.is_concurrency() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::debug!(attempt, "decision conflicted, retrying on fresh state");
                }
                Err(err) => return Err(Error::EventStore(err)),
            }
        }
    }

    /// Loads a state, or a tuple of states, without making any decision.
    pub async fn load<S, E, SP>(&self, state_query: S) -> Result<LoadedState<S>, ES::Error>
    where
        E: Event + Clone + Send + Sync + 'static,
        ES: EventStore<E>,
        S: IntoStatePart<S, Target = SP>,
        SP: IntoState<S> + MultiState<E> + Send,
    {
        let state = self.hydrate(state_query.into_state_part()).await?;
        let version = state.version();
        Ok(LoadedState {
            state: state.into_state(),
            version,
        })
    }

    async fn hydrate<E, SP>(&self, mut state: SP) -> Result<SP, ES::Error>
    where
        E: Event + Clone + Send + Sync + 'static,
        ES: EventStore<E>,
        SP: MultiState<E> + Send,
    {
        let query = state.query_all();
        let mut events = self.event_store.stream(&query);
        while let Some(event) = events.try_next().await? {
            state.mutate_all(event);
        }
        drop(events);
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;
    use crate::memory::InMemoryEventStore;
    use crate::query;
    use assert2::check;

    #[tokio::test]
    async fn it_should_hydrate_state_and_persist_events() {
        let event_store = InMemoryEventStore::new();
        event_store
            .append_without_validation(vec![
                item_added_event("p1", "c1"),
                item_added_event("p2", "c1"),
                item_added_event("p9", "c2"),
            ])
            .await
            .unwrap();

        let mut add_item = MockDecision::new();
        add_item
            .expect_state_query()
            .once()
            .return_once(|| Cart::new("c1"));
        add_item
            .expect_validation_query()
            .once()
            .return_once(|| None);
        add_item
            .expect_process()
            .once()
            .withf(|state| *state == cart("c1", ["p1", "p2"]))
            .return_once(|_| Ok(vec![item_added_event("p3", "c1")]));

        let decision_maker = DecisionMaker::new(event_store);
        let events = decision_maker.make(add_item).await.unwrap();

        check!(events.len() == 1);
        check!(events[0].id() == 4);
        check!(*events[0] == item_added_event("p3", "c1"));
    }

    #[tokio::test]
    async fn it_should_not_append_when_the_decision_has_no_changes() {
        let event_store = InMemoryEventStore::<ShoppingCartEvent>::new();

        let mut noop = MockDecision::new();
        noop.expect_state_query()
            .once()
            .return_once(|| Cart::new("c1"));
        noop.expect_validation_query().return_once(|| None);
        noop.expect_process().once().return_once(|_| Ok(vec![]));

        let decision_maker = DecisionMaker::new(event_store.clone());
        let events = decision_maker.make(noop).await.unwrap();

        check!(events.is_empty());
        let loaded = decision_maker.load(Cart::new("c1")).await.unwrap();
        check!(loaded.version() == 0);
    }

    #[tokio::test]
    async fn it_should_return_domain_errors() {
        let mut add_item = MockDecision::new();
        add_item
            .expect_state_query()
            .once()
            .return_once(|| Cart::new("c1"));
        add_item.expect_validation_query().return_once(|| None);
        add_item
            .expect_process()
            .once()
            .return_once(|_| Err(CartError("item already added".to_string())));

        let decision_maker = DecisionMaker::new(InMemoryEventStore::new());
        let result = decision_maker.make(add_item).await;

        assert2::let_assert!(Err(Error::Domain(err)) = result);
        check!(err == CartError("item already added".to_string()));
    }

    #[tokio::test]
    async fn it_should_give_up_after_the_configured_retries() {
        let event_store = InMemoryEventStore::new();
        event_store
            .append_without_validation(vec![item_added_event("p1", "c1")])
            .await
            .unwrap();

        // The validation query always sees the first event, so every append conflicts.
        let mut add_item = MockDecision::new();
        add_item
            .expect_state_query()
            .times(2)
            .returning(|| Cart::new("c2"));
        add_item
            .expect_validation_query()
            .times(2)
            .returning(|| Some(query!(ShoppingCartEvent, cart_id == "c1")));
        add_item
            .expect_process()
            .times(2)
            .returning(|_| Ok(vec![item_added_event("p2", "c2")]));

        let decision_maker = DecisionMaker::new(event_store).with_max_retries(1);
        let result = decision_maker.make(add_item).await;

        assert2::let_assert!(Err(Error::EventStore(err)) = result);
        check!(err.is_concurrency());
    }

    #[tokio::test]
    async fn it_should_load_a_tuple_of_states() {
        let event_store = InMemoryEventStore::new();
        event_store
            .append_without_validation(vec![
                item_added_event("p1", "c1"),
                item_added_event("p2", "c2"),
                item_removed_event("p1", "c1"),
            ])
            .await
            .unwrap();

        let decision_maker = DecisionMaker::new(event_store);
        let loaded = decision_maker
            .load((Cart::new("c1"), Cart::new("c2")))
            .await
            .unwrap();

        check!(loaded.version() == 3);
        let (cart1, cart2) = loaded.into_state();
        check!(cart1 == cart("c1", []));
        check!(cart2 == cart("c2", ["p2"]));
    }
}
