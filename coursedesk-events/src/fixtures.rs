use mockall::mock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::{domain_ids, query, Decision, DomainIdSet, Event, StateMutate, StateQuery, StreamQuery};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ShoppingCartEvent {
    ItemAdded { item_id: String, cart_id: String },
    ItemRemoved { item_id: String, cart_id: String },
}

impl Event for ShoppingCartEvent {
    const NAMES: &'static [&'static str] = &["ItemAdded", "ItemRemoved"];

    fn name(&self) -> &'static str {
        match self {
            ShoppingCartEvent::ItemAdded { .. } => "ItemAdded",
            ShoppingCartEvent::ItemRemoved { .. } => "ItemRemoved",
        }
    }

    fn domain_ids(&self) -> DomainIdSet {
        match self {
            ShoppingCartEvent::ItemAdded { item_id, cart_id }
            | ShoppingCartEvent::ItemRemoved { item_id, cart_id } => {
                domain_ids! {item_id: item_id, cart_id: cart_id}
            }
        }
    }
}

pub fn item_added_event(item_id: &str, cart_id: &str) -> ShoppingCartEvent {
    ShoppingCartEvent::ItemAdded {
        item_id: item_id.to_string(),
        cart_id: cart_id.to_string(),
    }
}

pub fn item_removed_event(item_id: &str, cart_id: &str) -> ShoppingCartEvent {
    ShoppingCartEvent::ItemRemoved {
        item_id: item_id.to_string(),
        cart_id: cart_id.to_string(),
    }
}

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Cart {
    pub cart_id: String,
    pub items: BTreeSet<String>,
}

impl Cart {
    pub fn new(cart_id: &str) -> Self {
        Self {
            cart_id: cart_id.to_string(),
            ..Default::default()
        }
    }
}

pub fn cart<'a>(cart_id: &str, items: impl IntoIterator<Item = &'a str>) -> Cart {
    Cart {
        cart_id: cart_id.to_string(),
        items: items.into_iter().map(str::to_string).collect(),
    }
}

impl StateQuery for Cart {
    type Event = ShoppingCartEvent;

    fn query(&self) -> StreamQuery<ShoppingCartEvent> {
        query!(ShoppingCartEvent, cart_id == self.cart_id)
    }
}

impl StateMutate for Cart {
    fn mutate(&mut self, event: ShoppingCartEvent) {
        match event {
            ShoppingCartEvent::ItemAdded { item_id, .. } => {
                self.items.insert(item_id);
            }
            ShoppingCartEvent::ItemRemoved { item_id, .. } => {
                self.items.remove(&item_id);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct CartError(pub String);

mock! {
    pub Decision {}
    impl Decision for Decision {
        type Event = ShoppingCartEvent;
        type StateQuery = Cart;
        type Error = CartError;

        fn state_query(&self) -> Cart;
        fn validation_query(&self) -> Option<StreamQuery<ShoppingCartEvent>>;
        fn process(&self, state: &Cart) -> Result<Vec<ShoppingCartEvent>, CartError>;
    }
}
