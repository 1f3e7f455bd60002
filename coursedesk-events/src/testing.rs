//! Given/when/then harness for decisions.
//!
//! The history is folded into the decision's state exactly as the [`DecisionMaker`] would do
//! it, with event ids assigned from 1, and the outcome of `process` is then asserted.
//!
//! [`DecisionMaker`]: crate::DecisionMaker
use std::fmt::Debug;

use crate::{Decision, Event, EventId, IntoState, IntoStatePart, MultiState, PersistedEvent};

pub struct TestHarness;

impl TestHarness {
    pub fn given<E: Event + Clone>(history: impl Into<Vec<E>>) -> History<E> {
        History {
            events: history.into(),
        }
    }
}

/// Events already stored when the decision runs.
pub struct History<E> {
    events: Vec<E>,
}

impl<E: Event + Clone> History<E> {
    pub fn when<D, S, SP>(self, decision: D) -> Outcome<E, D::Error>
    where
        D: Decision<Event = E, StateQuery = S>,
        S: IntoStatePart<S, Target = SP>,
        SP: IntoState<S> + MultiState<E>,
    {
        let mut parts = decision.state_query().into_state_part();
        for (position, event) in self.events.into_iter().enumerate() {
            parts.mutate_all(PersistedEvent::new(position as EventId + 1, event));
        }
        Outcome(decision.process(&parts.into_state()))
    }
}

/// What a decision returned for a history.
pub struct Outcome<E, ERR>(Result<Vec<E>, ERR>);

impl<E, ERR> Outcome<E, ERR>
where
    E: Debug + PartialEq,
    ERR: Debug + PartialEq,
{
    /// Asserts that the decision emitted exactly `expected`.
    #[track_caller]
    pub fn then(self, expected: impl Into<Vec<E>>) {
        let expected = expected.into();
        match self.0 {
            Ok(changes) => assert_eq!(changes, expected),
            Err(err) => panic!("expected changes {expected:?}, got error {err:?}"),
        }
    }

    #[track_caller]
    pub fn then_err(self, expected: ERR) {
        match self.0 {
            Ok(changes) => panic!("expected error {expected:?}, got changes {changes:?}"),
            Err(err) => assert_eq!(err, expected),
        }
    }

    /// The raw outcome, for assertions on generated values.
    pub fn result(self) -> Result<Vec<E>, ERR> {
        self.0
    }
}
