//! Settlement of payments from verified gateway webhooks.
use std::fmt;

use chrono::{DateTime, Utc};
use coursedesk_events::{query, Decision, StateMutate, StateQuery, StreamQuery};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::order::Order;
use super::{
    DomainEvent, ErrorKind, InvalidTransition, Lifecycle, OrderId, OrderStatus, PaymentId,
    PaymentStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    HyperPay,
    ClickPay,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::HyperPay => f.write_str("hyperpay"),
            Provider::ClickPay => f.write_str("clickpay"),
        }
    }
}

/// The result of a payment as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Captured { amount: Decimal, currency: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentError {
    #[error("payment {0} not found")]
    PaymentNotFound(PaymentId),
    #[error("order {0} not found")]
    OrderNotFound(OrderId),
    #[error("payment was initiated with {expected}, not {received}")]
    ProviderMismatch { expected: Provider, received: Provider },
    #[error("captured {received} {received_currency} does not match the expected {expected} {expected_currency}")]
    AmountMismatch {
        expected: Decimal,
        expected_currency: String,
        received: Decimal,
        received_currency: String,
    },
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition<PaymentStatus>),
    #[error(transparent)]
    InvalidOrderTransition(#[from] InvalidTransition<OrderStatus>),
}

impl PaymentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PaymentError::PaymentNotFound(_) | PaymentError::OrderNotFound(_) => {
                ErrorKind::NotFound
            }
            _ => ErrorKind::Validation,
        }
    }
}

/// Finds the order a payment belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentLookup {
    payment_id: PaymentId,
    order_id: Option<OrderId>,
}

impl PaymentLookup {
    pub fn new(payment_id: PaymentId) -> Self {
        Self {
            payment_id,
            order_id: None,
        }
    }

    pub fn order_id(&self) -> Option<OrderId> {
        self.order_id
    }
}

impl StateQuery for PaymentLookup {
    type Event = DomainEvent;

    fn query(&self) -> StreamQuery<DomainEvent> {
        let payment_id = self.payment_id;
        query!(DomainEvent, (events[PaymentInitiated]) and (payment_id == payment_id))
    }
}

impl StateMutate for PaymentLookup {
    fn mutate(&mut self, event: DomainEvent) {
        if let DomainEvent::PaymentInitiated { order_id, .. } = event {
            self.order_id = Some(order_id);
        }
    }
}

/// Applies a verified webhook to the payment and its order.
///
/// A webhook for a payment that is no longer pending is a replay and changes nothing.
#[derive(Debug)]
pub struct HandlePaymentWebhook {
    pub order_id: OrderId,
    pub payment_id: PaymentId,
    pub provider: Provider,
    pub provider_ref: String,
    pub outcome: PaymentOutcome,
    pub raw_payload: String,
    pub now: DateTime<Utc>,
}

impl Decision for HandlePaymentWebhook {
    type Event = DomainEvent;
    type StateQuery = Order;
    type Error = PaymentError;

    fn state_query(&self) -> Self::StateQuery {
        Order::new(self.order_id)
    }

    fn process(&self, order: &Self::StateQuery) -> Result<Vec<Self::Event>, Self::Error> {
        let status = order
            .status()
            .ok_or(PaymentError::OrderNotFound(self.order_id))?;
        let payment = order
            .payment(&self.payment_id)
            .ok_or(PaymentError::PaymentNotFound(self.payment_id))?;
        if payment.provider != self.provider {
            return Err(PaymentError::ProviderMismatch {
                expected: payment.provider,
                received: self.provider,
            });
        }
        if payment.status != PaymentStatus::Pending {
            return Ok(vec![]);
        }

        match &self.outcome {
            PaymentOutcome::Captured { amount, currency } => {
                if *amount != payment.amount || *currency != payment.currency {
                    return Err(PaymentError::AmountMismatch {
                        expected: payment.amount,
                        expected_currency: payment.currency.clone(),
                        received: *amount,
                        received_currency: currency.clone(),
                    });
                }
                payment.status.transition(PaymentStatus::Captured)?;
                let mut changes = vec![DomainEvent::PaymentCaptured {
                    payment_id: self.payment_id,
                    order_id: self.order_id,
                    provider: self.provider,
                    provider_ref: self.provider_ref.clone(),
                    raw_payload: self.raw_payload.clone(),
                    captured_at: self.now,
                }];
                if !status.is_paid() && status != OrderStatus::Cancelled {
                    status.transition(OrderStatus::Paid)?;
                    changes.push(DomainEvent::OrderStatusChanged {
                        order_id: self.order_id,
                        user_id: order.user_id().unwrap_or_default(),
                        from: status,
                        to: OrderStatus::Paid,
                        changed_at: self.now,
                    });
                }
                Ok(changes)
            }
            PaymentOutcome::Failed { reason } => {
                payment.status.transition(PaymentStatus::Failed)?;
                Ok(vec![DomainEvent::PaymentFailed {
                    payment_id: self.payment_id,
                    order_id: self.order_id,
                    provider: self.provider,
                    provider_ref: self.provider_ref.clone(),
                    reason: reason.clone(),
                    raw_payload: self.raw_payload.clone(),
                    failed_at: self.now,
                }])
            }
        }
    }
}
