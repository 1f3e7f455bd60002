//! Status lifecycles of orders, enrollments and payments.
//!
//! Every status change goes through `Lifecycle::transition`, which rejects the moves
//! the lifecycle does not allow.
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid status transition from {from:?} to {to:?}")]
pub struct InvalidTransition<S: Debug> {
    pub from: S,
    pub to: S,
}

pub trait Lifecycle: Copy + Debug + PartialEq {
    /// Returns true if the lifecycle allows moving from `self` to `next`.
    fn can_transition_to(self, next: Self) -> bool;

    fn transition(self, next: Self) -> Result<Self, InvalidTransition<Self>> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PendingPayment,
    Paid,
    Processed,
    Cancelled,
}

impl Lifecycle for OrderStatus {
    fn can_transition_to(self, next: Self) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (New, PendingPayment | Paid | Cancelled)
                | (PendingPayment, Paid | Cancelled)
                | (Paid, Processed | Cancelled)
        )
    }
}

impl OrderStatus {
    /// Paid and processed orders entitle their buyer to enrollments.
    pub fn is_paid(self) -> bool {
        matches!(self, OrderStatus::Paid | OrderStatus::Processed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EnrollmentStatus {
    Pending,
    Paid,
    Notified,
    Completed,
    Cancelled,
}

impl Lifecycle for EnrollmentStatus {
    fn can_transition_to(self, next: Self) -> bool {
        use EnrollmentStatus::*;
        matches!(
            (self, next),
            (Pending, Paid | Cancelled)
                | (Paid, Notified | Completed | Cancelled)
                | (Notified, Paid | Completed | Cancelled)
        )
    }
}

impl EnrollmentStatus {
    /// Enrollments in these statuses occupy a seat and may download materials.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            EnrollmentStatus::Paid | EnrollmentStatus::Notified | EnrollmentStatus::Completed
        )
    }

    /// Completed and cancelled enrollments are settled for the order they belong to.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            EnrollmentStatus::Completed | EnrollmentStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Captured,
    Failed,
}

impl Lifecycle for PaymentStatus {
    fn can_transition_to(self, next: Self) -> bool {
        use PaymentStatus::*;
        matches!((self, next), (Pending, Captured | Failed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::check;

    #[test]
    fn it_walks_the_order_lifecycle() {
        let status = OrderStatus::New
            .transition(OrderStatus::PendingPayment)
            .and_then(|s| s.transition(OrderStatus::Paid))
            .and_then(|s| s.transition(OrderStatus::Processed));

        check!(status == Ok(OrderStatus::Processed));
    }

    #[test]
    fn it_rejects_moving_a_paid_order_back_to_new() {
        check!(
            OrderStatus::Paid.transition(OrderStatus::New)
                == Err(InvalidTransition {
                    from: OrderStatus::Paid,
                    to: OrderStatus::New
                })
        );
    }

    #[test]
    fn it_keeps_terminal_order_statuses() {
        for next in [
            OrderStatus::New,
            OrderStatus::PendingPayment,
            OrderStatus::Paid,
            OrderStatus::Processed,
            OrderStatus::Cancelled,
        ] {
            check!(!OrderStatus::Processed.can_transition_to(next));
            check!(!OrderStatus::Cancelled.can_transition_to(next));
        }
    }

    #[test]
    fn it_toggles_live_enrollments_between_paid_and_notified() {
        check!(EnrollmentStatus::Paid.can_transition_to(EnrollmentStatus::Notified));
        check!(EnrollmentStatus::Notified.can_transition_to(EnrollmentStatus::Paid));
        check!(!EnrollmentStatus::Completed.can_transition_to(EnrollmentStatus::Notified));
        check!(!EnrollmentStatus::Pending.can_transition_to(EnrollmentStatus::Completed));
    }

    #[test]
    fn it_settles_payments_once() {
        check!(PaymentStatus::Pending.transition(PaymentStatus::Captured) == Ok(PaymentStatus::Captured));
        check!(PaymentStatus::Captured.transition(PaymentStatus::Failed).is_err());
        check!(PaymentStatus::Failed.transition(PaymentStatus::Captured).is_err());
    }

    #[test]
    fn it_describes_the_rejected_move() {
        let err = EnrollmentStatus::Cancelled
            .transition(EnrollmentStatus::Paid)
            .unwrap_err();

        check!(err.to_string() == "invalid status transition from Cancelled to Paid");
    }
}
