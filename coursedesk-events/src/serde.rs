//! Serialization of events for storage backends.
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

/// Serializes values into bytes.
pub trait Serializer<T> {
    type Error: std::error::Error + Send + Sync + 'static;
    fn serialize(&self, value: &T) -> Result<Vec<u8>, Self::Error>;
}

/// Deserializes bytes into values.
pub trait Deserializer<T> {
    type Error: std::error::Error + Send + Sync + 'static;
    fn deserialize(&self, data: &[u8]) -> Result<T, Self::Error>;
}

/// A format able to both serialize and deserialize `T`.
pub trait Serde<T>: Serializer<T> + Deserializer<T> {}

impl<T, K> Serde<T> for K where K: Serializer<T> + Deserializer<T> {}

/// JSON serialization.
#[derive(Debug, Clone, Copy)]
pub struct Json<T>(PhantomData<fn() -> T>);

impl<T> Default for Json<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T: Serialize> Serializer<T> for Json<T> {
    type Error = serde_json::Error;

    fn serialize(&self, value: &T) -> Result<Vec<u8>, Self::Error> {
        serde_json::to_vec(value)
    }
}

impl<T> Deserializer<T> for Json<T>
where
    for<'d> T: Deserialize<'d>,
{
    type Error = serde_json::Error;

    fn deserialize(&self, data: &[u8]) -> Result<T, Self::Error> {
        serde_json::from_slice(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;

    #[test]
    fn it_uses_the_tagged_representation_of_events() {
        let json = Json::<ShoppingCartEvent>::default();

        let data = json.serialize(&item_added_event("p1", "c1")).unwrap();

        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(&data).unwrap(),
            serde_json::json!({"event_type": "item_added", "item_id": "p1", "cart_id": "c1"})
        );
        assert_eq!(json.deserialize(&data).unwrap(), item_added_event("p1", "c1"));
    }

    #[test]
    fn it_reports_malformed_payloads() {
        let json = Json::<ShoppingCartEvent>::default();

        assert!(json.deserialize(br#"{"event_type": "unknown"}"#).is_err());
    }
}
