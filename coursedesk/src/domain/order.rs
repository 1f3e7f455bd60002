//! Orders placed from carts, with their payments and enrollments.
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use coursedesk_events::{query, Decision, StateMutate, StateQuery, StreamQuery};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::cart::{Cart, CartCloseReason, CartOwner};
use super::catalog::{Courses, SeatError, Sessions};
use super::enrollment::enrollment_id;
use super::{
    CartId, CourseId, CourseType, DomainEvent, EnrollmentId, EnrollmentStatus, ErrorKind,
    InvalidTransition, Lifecycle, OrderId, OrderStatus, PaymentId, PaymentStatus, Provider,
    SessionId, UserId,
};

/// A priced snapshot of a cart item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub course_id: CourseId,
    pub session_id: Option<SessionId>,
    pub course_type: CourseType,
    pub title: String,
    pub unit_price: Decimal,
    pub qty: u32,
}

impl OrderLine {
    pub fn total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.qty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("order {0} not found")]
    OrderNotFound(OrderId),
    #[error("cart {0} not found")]
    CartNotFound(CartId),
    #[error("cart {0} belongs to another owner")]
    NotCartOwner(CartId),
    #[error("cart {0} is closed")]
    CartClosed(CartId),
    #[error("cart is empty")]
    EmptyCart,
    #[error("the cart changed while the order was placed")]
    CartChanged,
    #[error("course {0} not found")]
    CourseNotFound(CourseId),
    #[error("course {0} is not on sale")]
    CourseInactive(CourseId),
    #[error("cart items are priced in different currencies")]
    MixedCurrencies,
    #[error("order in status {0:?} cannot be paid")]
    NotPayable(OrderStatus),
    #[error(transparent)]
    Seat(#[from] SeatError),
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition<OrderStatus>),
}

impl OrderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrderError::OrderNotFound(_)
            | OrderError::CartNotFound(_)
            | OrderError::CourseNotFound(_) => ErrorKind::NotFound,
            OrderError::NotCartOwner(_) => ErrorKind::Forbidden,
            OrderError::CartChanged => ErrorKind::Conflict,
            _ => ErrorKind::Validation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Payment {
    pub payment_id: PaymentId,
    pub provider: Provider,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub provider_ref: Option<String>,
    pub failure_reason: Option<String>,
    pub raw_payload: Option<String>,
    pub initiated_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Placed {
    user_id: UserId,
    cart_id: CartId,
    lines: Vec<OrderLine>,
    amount: Decimal,
    currency: String,
    status: OrderStatus,
    placed_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// An order with its payments and the status of the enrollments issued for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    order_id: OrderId,
    placed: Option<Placed>,
    payments: BTreeMap<PaymentId, Payment>,
    enrollments: BTreeMap<EnrollmentId, EnrollmentStatus>,
}

impl Order {
    pub fn new(order_id: OrderId) -> Self {
        Self {
            order_id,
            placed: None,
            payments: BTreeMap::new(),
            enrollments: BTreeMap::new(),
        }
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn exists(&self) -> bool {
        self.placed.is_some()
    }

    pub fn status(&self) -> Option<OrderStatus> {
        self.placed.as_ref().map(|p| p.status)
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.placed.as_ref().map(|p| p.user_id)
    }

    pub fn cart_id(&self) -> Option<CartId> {
        self.placed.as_ref().map(|p| p.cart_id)
    }

    pub fn lines(&self) -> &[OrderLine] {
        self.placed.as_ref().map_or(&[], |p| &p.lines)
    }

    pub fn amount(&self) -> Decimal {
        self.placed.as_ref().map_or(Decimal::ZERO, |p| p.amount)
    }

    pub fn currency(&self) -> &str {
        self.placed.as_ref().map_or("", |p| &p.currency)
    }

    pub fn placed_at(&self) -> Option<DateTime<Utc>> {
        self.placed.as_ref().map(|p| p.placed_at)
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.placed.as_ref().map(|p| p.updated_at)
    }

    pub fn payments(&self) -> impl Iterator<Item = &Payment> {
        self.payments.values()
    }

    pub fn payment(&self, payment_id: &PaymentId) -> Option<&Payment> {
        self.payments.get(payment_id)
    }

    /// Status of the enrollments issued for the order.
    pub fn enrollments(&self) -> &BTreeMap<EnrollmentId, EnrollmentStatus> {
        &self.enrollments
    }

    /// The enrollment ids the order entitles its buyer to, one per distinct course and session.
    pub fn expected_enrollments(&self) -> Vec<EnrollmentId> {
        let Some(placed) = &self.placed else {
            return vec![];
        };
        let mut ids: Vec<EnrollmentId> = placed
            .lines
            .iter()
            .map(|line| enrollment_id(placed.user_id, line.course_id, line.session_id))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub(crate) fn status_change(
        &self,
        to: OrderStatus,
        now: DateTime<Utc>,
    ) -> Result<DomainEvent, OrderError> {
        let placed = self
            .placed
            .as_ref()
            .ok_or(OrderError::OrderNotFound(self.order_id))?;
        placed.status.transition(to)?;
        Ok(DomainEvent::OrderStatusChanged {
            order_id: self.order_id,
            user_id: placed.user_id,
            from: placed.status,
            to,
            changed_at: now,
        })
    }
}

impl StateQuery for Order {
    type Event = DomainEvent;

    fn query(&self) -> StreamQuery<DomainEvent> {
        let order_id = self.order_id;
        query!(
            DomainEvent,
            (events[
                OrderPlaced,
                OrderStatusChanged,
                PaymentInitiated,
                PaymentCaptured,
                PaymentFailed,
                EnrollmentCreated,
                EnrollmentStatusChanged,
                EnrollmentSessionChanged
            ]) and (order_id == order_id)
        )
    }
}

impl StateMutate for Order {
    fn mutate(&mut self, event: DomainEvent) {
        match event {
            DomainEvent::OrderPlaced {
                user_id,
                cart_id,
                lines,
                amount,
                currency,
                placed_at,
                ..
            } => {
                self.placed = Some(Placed {
                    user_id,
                    cart_id,
                    lines,
                    amount,
                    currency,
                    status: OrderStatus::New,
                    placed_at,
                    updated_at: placed_at,
                });
            }
            DomainEvent::OrderStatusChanged { to, changed_at, .. } => {
                if let Some(placed) = self.placed.as_mut() {
                    placed.status = to;
                    placed.updated_at = changed_at;
                }
            }
            DomainEvent::PaymentInitiated {
                payment_id,
                provider,
                amount,
                currency,
                initiated_at,
                ..
            } => {
                self.payments.insert(
                    payment_id,
                    Payment {
                        payment_id,
                        provider,
                        amount,
                        currency,
                        status: PaymentStatus::Pending,
                        provider_ref: None,
                        failure_reason: None,
                        raw_payload: None,
                        initiated_at,
                        settled_at: None,
                    },
                );
            }
            DomainEvent::PaymentCaptured {
                payment_id,
                provider_ref,
                raw_payload,
                captured_at,
                ..
            } => {
                if let Some(payment) = self.payments.get_mut(&payment_id) {
                    payment.status = PaymentStatus::Captured;
                    payment.provider_ref = Some(provider_ref);
                    payment.raw_payload = Some(raw_payload);
                    payment.settled_at = Some(captured_at);
                }
            }
            DomainEvent::PaymentFailed {
                payment_id,
                provider_ref,
                reason,
                raw_payload,
                failed_at,
                ..
            } => {
                if let Some(payment) = self.payments.get_mut(&payment_id) {
                    payment.status = PaymentStatus::Failed;
                    payment.provider_ref = Some(provider_ref);
                    payment.failure_reason = Some(reason);
                    payment.raw_payload = Some(raw_payload);
                    payment.settled_at = Some(failed_at);
                }
            }
            DomainEvent::EnrollmentCreated {
                enrollment_id,
                status,
                ..
            } => {
                self.enrollments.insert(enrollment_id, status);
            }
            DomainEvent::EnrollmentStatusChanged {
                enrollment_id, to, ..
            }
            | DomainEvent::EnrollmentSessionChanged {
                enrollment_id, to, ..
            } => {
                self.enrollments.insert(enrollment_id, to);
            }
            _ => {}
        }
    }
}

/// Turns a cart into an order and closes the cart.
///
/// `course_ids` and `session_ids` are the ones of the cart as last read: prices and seats
/// are checked for those, an item outside them means the cart changed meanwhile.
#[derive(Debug)]
pub struct PlaceOrder {
    pub order_id: OrderId,
    pub cart_id: CartId,
    pub user_id: UserId,
    pub course_ids: Vec<CourseId>,
    pub session_ids: Vec<SessionId>,
    pub now: DateTime<Utc>,
}

impl PlaceOrder {
    /// Prepares an order for the items of `cart`.
    pub fn for_cart(order_id: OrderId, user_id: UserId, cart: &Cart, now: DateTime<Utc>) -> Self {
        Self {
            order_id,
            cart_id: cart.cart_id(),
            user_id,
            course_ids: cart.items().iter().map(|item| item.course_id).collect(),
            session_ids: cart.items().iter().filter_map(|item| item.session_id).collect(),
            now,
        }
    }
}

impl Decision for PlaceOrder {
    type Event = DomainEvent;
    type StateQuery = (Cart, Courses, Sessions);
    type Error = OrderError;

    fn state_query(&self) -> Self::StateQuery {
        (
            Cart::new(self.cart_id),
            Courses::new(self.course_ids.iter().copied()),
            Sessions::new(self.session_ids.iter().copied()),
        )
    }

    fn process(
        &self,
        (cart, courses, sessions): &Self::StateQuery,
    ) -> Result<Vec<Self::Event>, Self::Error> {
        let owner = cart
            .owner()
            .ok_or(OrderError::CartNotFound(self.cart_id))?;
        if owner != &CartOwner::User(self.user_id) {
            return Err(OrderError::NotCartOwner(self.cart_id));
        }
        if cart.closed().is_some() {
            return Err(OrderError::CartClosed(self.cart_id));
        }
        if cart.items().is_empty() {
            return Err(OrderError::EmptyCart);
        }

        let mut lines = Vec::with_capacity(cart.items().len());
        for item in cart.items() {
            if !self.course_ids.contains(&item.course_id)
                || item
                    .session_id
                    .is_some_and(|session_id| !self.session_ids.contains(&session_id))
            {
                return Err(OrderError::CartChanged);
            }
            let course = courses
                .get(&item.course_id)
                .ok_or(OrderError::CourseNotFound(item.course_id))?;
            if !course.active {
                return Err(OrderError::CourseInactive(item.course_id));
            }
            if let Some(session_id) = item.session_id {
                sessions
                    .board()
                    .check_seat(session_id, item.course_id, None)?;
            }
            lines.push((
                OrderLine {
                    course_id: item.course_id,
                    session_id: item.session_id,
                    course_type: course.course_type,
                    title: course.title.clone(),
                    unit_price: course.price,
                    qty: 1,
                },
                course.currency.as_str(),
            ));
        }

        let currency = lines[0].1.to_string();
        if lines.iter().any(|(_, c)| *c != currency) {
            return Err(OrderError::MixedCurrencies);
        }
        let lines: Vec<OrderLine> = lines.into_iter().map(|(line, _)| line).collect();
        let amount = lines.iter().map(OrderLine::total).sum();

        Ok(vec![
            DomainEvent::OrderPlaced {
                order_id: self.order_id,
                user_id: self.user_id,
                cart_id: self.cart_id,
                lines,
                amount,
                currency,
                placed_at: self.now,
            },
            DomainEvent::CartClosed {
                cart_id: self.cart_id,
                owner: owner.clone(),
                reason: CartCloseReason::CheckedOut,
                closed_at: self.now,
            },
        ])
    }
}

#[derive(Debug)]
pub struct ChangeOrderStatus {
    pub order_id: OrderId,
    pub to: OrderStatus,
    pub now: DateTime<Utc>,
}

impl Decision for ChangeOrderStatus {
    type Event = DomainEvent;
    type StateQuery = Order;
    type Error = OrderError;

    fn state_query(&self) -> Self::StateQuery {
        Order::new(self.order_id)
    }

    fn process(&self, order: &Self::StateQuery) -> Result<Vec<Self::Event>, Self::Error> {
        Ok(vec![order.status_change(self.to, self.now)?])
    }
}

/// Records a pending payment for the full amount of the order.
///
/// `payment_id` is the merchant reference echoed back by the gateway webhook.
#[derive(Debug)]
pub struct InitiatePayment {
    pub order_id: OrderId,
    pub payment_id: PaymentId,
    pub provider: Provider,
    pub now: DateTime<Utc>,
}

impl Decision for InitiatePayment {
    type Event = DomainEvent;
    type StateQuery = Order;
    type Error = OrderError;

    fn state_query(&self) -> Self::StateQuery {
        Order::new(self.order_id)
    }

    fn process(&self, order: &Self::StateQuery) -> Result<Vec<Self::Event>, Self::Error> {
        let status = order
            .status()
            .ok_or(OrderError::OrderNotFound(self.order_id))?;
        let initiated = DomainEvent::PaymentInitiated {
            payment_id: self.payment_id,
            order_id: self.order_id,
            provider: self.provider,
            amount: order.amount(),
            currency: order.currency().to_string(),
            initiated_at: self.now,
        };
        match status {
            OrderStatus::New => Ok(vec![
                initiated,
                order.status_change(OrderStatus::PendingPayment, self.now)?,
            ]),
            OrderStatus::PendingPayment => Ok(vec![initiated]),
            status => Err(OrderError::NotPayable(status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fixtures::*;
    use coursedesk_events::TestHarness;
    use uuid::Uuid;

    #[test]
    fn it_places_an_order_from_the_cart() {
        let user = CartOwner::User(Uuid::new_v4());
        let user_id = user.user_id().unwrap_or_default();
        let cart_id = Uuid::new_v4();
        let order_id = Uuid::new_v4();
        let pdf = Uuid::new_v4();
        let live = Uuid::new_v4();
        let session_id = Uuid::new_v4();
        let now = now();

        TestHarness::given([
            course_created(pdf, CourseType::Pdf, sar(150)),
            course_created(live, CourseType::Live, sar(300)),
            session_scheduled(session_id, live, Some(5)),
            cart_opened(cart_id, user.clone()),
            cart_item_added(cart_id, user.clone(), pdf, None),
            cart_item_added(cart_id, user.clone(), live, Some(session_id)),
        ])
        .when(PlaceOrder {
            order_id,
            cart_id,
            user_id,
            course_ids: vec![pdf, live],
            session_ids: vec![session_id],
            now,
        })
        .then([
            DomainEvent::OrderPlaced {
                order_id,
                user_id,
                cart_id,
                lines: vec![
                    OrderLine {
                        course_id: pdf,
                        session_id: None,
                        course_type: CourseType::Pdf,
                        title: "Course".to_string(),
                        unit_price: sar(150),
                        qty: 1,
                    },
                    OrderLine {
                        course_id: live,
                        session_id: Some(session_id),
                        course_type: CourseType::Live,
                        title: "Course".to_string(),
                        unit_price: sar(300),
                        qty: 1,
                    },
                ],
                amount: sar(450),
                currency: "SAR".to_string(),
                placed_at: now,
            },
            DomainEvent::CartClosed {
                cart_id,
                owner: user,
                reason: CartCloseReason::CheckedOut,
                closed_at: now,
            },
        ]);
    }

    #[test]
    fn it_rejects_a_cart_of_another_user() {
        let cart_id = Uuid::new_v4();
        let course_id = Uuid::new_v4();
        let owner = CartOwner::User(Uuid::new_v4());

        TestHarness::given([
            course_created(course_id, CourseType::Pdf, sar(150)),
            cart_opened(cart_id, owner.clone()),
            cart_item_added(cart_id, owner, course_id, None),
        ])
        .when(PlaceOrder {
            order_id: Uuid::new_v4(),
            cart_id,
            user_id: Uuid::new_v4(),
            course_ids: vec![course_id],
            session_ids: vec![],
            now: now(),
        })
        .then_err(OrderError::NotCartOwner(cart_id));
    }

    #[test]
    fn it_rejects_an_empty_cart() {
        let user_id = Uuid::new_v4();
        let cart_id = Uuid::new_v4();

        TestHarness::given([cart_opened(cart_id, CartOwner::User(user_id))])
            .when(PlaceOrder {
                order_id: Uuid::new_v4(),
                cart_id,
                user_id,
                course_ids: vec![],
                session_ids: vec![],
                now: now(),
            })
            .then_err(OrderError::EmptyCart);
    }

    #[test]
    fn it_rejects_mixed_currencies() {
        let owner = CartOwner::User(Uuid::new_v4());
        let cart_id = Uuid::new_v4();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        TestHarness::given([
            course_created(first, CourseType::Pdf, sar(150)),
            course_created(second, CourseType::Pdf, sar(150)),
            DomainEvent::CoursePriceChanged {
                course_id: second,
                price: sar(40),
                currency: "USD".to_string(),
            },
            cart_opened(cart_id, owner.clone()),
            cart_item_added(cart_id, owner.clone(), first, None),
            cart_item_added(cart_id, owner.clone(), second, None),
        ])
        .when(PlaceOrder {
            order_id: Uuid::new_v4(),
            cart_id,
            user_id: owner.user_id().unwrap_or_default(),
            course_ids: vec![first, second],
            session_ids: vec![],
            now: now(),
        })
        .then_err(OrderError::MixedCurrencies);
    }

    #[test]
    fn it_rechecks_session_capacity_at_checkout() {
        let owner = CartOwner::User(Uuid::new_v4());
        let cart_id = Uuid::new_v4();
        let course_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();

        TestHarness::given([
            course_created(course_id, CourseType::Live, sar(300)),
            session_scheduled(session_id, course_id, Some(1)),
            cart_opened(cart_id, owner.clone()),
            cart_item_added(cart_id, owner.clone(), course_id, Some(session_id)),
            enrollment_created(Uuid::new_v4(), course_id, Some(session_id)),
        ])
        .when(PlaceOrder {
            order_id: Uuid::new_v4(),
            cart_id,
            user_id: owner.user_id().unwrap_or_default(),
            course_ids: vec![course_id],
            session_ids: vec![session_id],
            now: now(),
        })
        .then_err(OrderError::Seat(SeatError::SessionFull(session_id)));
    }

    #[test]
    fn it_detects_items_added_after_the_cart_was_read() {
        let owner = CartOwner::User(Uuid::new_v4());
        let cart_id = Uuid::new_v4();
        let course_id = Uuid::new_v4();

        TestHarness::given([
            course_created(course_id, CourseType::Pdf, sar(150)),
            cart_opened(cart_id, owner.clone()),
            cart_item_added(cart_id, owner.clone(), course_id, None),
        ])
        .when(PlaceOrder {
            order_id: Uuid::new_v4(),
            cart_id,
            user_id: owner.user_id().unwrap_or_default(),
            course_ids: vec![],
            session_ids: vec![],
            now: now(),
        })
        .then_err(OrderError::CartChanged);
    }

    #[test]
    fn it_rejects_moving_a_paid_order_back_to_new() {
        let order_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        TestHarness::given([
            order_placed(order_id, user_id, vec![pdf_line(Uuid::new_v4(), sar(150))]),
            order_status_changed(order_id, user_id, OrderStatus::New, OrderStatus::Paid),
        ])
        .when(ChangeOrderStatus {
            order_id,
            to: OrderStatus::New,
            now: now(),
        })
        .then_err(OrderError::InvalidTransition(InvalidTransition {
            from: OrderStatus::Paid,
            to: OrderStatus::New,
        }));
    }

    #[test]
    fn it_initiates_a_payment_for_the_order_amount() {
        let order_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let payment_id = Uuid::new_v4();
        let now = now();

        TestHarness::given([order_placed(
            order_id,
            user_id,
            vec![pdf_line(Uuid::new_v4(), sar(150))],
        )])
        .when(InitiatePayment {
            order_id,
            payment_id,
            provider: Provider::HyperPay,
            now,
        })
        .then([
            DomainEvent::PaymentInitiated {
                payment_id,
                order_id,
                provider: Provider::HyperPay,
                amount: sar(150),
                currency: "SAR".to_string(),
                initiated_at: now,
            },
            DomainEvent::OrderStatusChanged {
                order_id,
                user_id,
                from: OrderStatus::New,
                to: OrderStatus::PendingPayment,
                changed_at: now,
            },
        ]);
    }

    #[test]
    fn it_does_not_take_payments_for_a_cancelled_order() {
        let order_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        TestHarness::given([
            order_placed(order_id, user_id, vec![pdf_line(Uuid::new_v4(), sar(150))]),
            order_status_changed(order_id, user_id, OrderStatus::New, OrderStatus::Cancelled),
        ])
        .when(InitiatePayment {
            order_id,
            payment_id: Uuid::new_v4(),
            provider: Provider::ClickPay,
            now: now(),
        })
        .then_err(OrderError::NotPayable(OrderStatus::Cancelled));
    }

    #[test]
    fn it_expects_one_enrollment_per_distinct_line() {
        let order_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let course_id = Uuid::new_v4();
        let mut order = Order::new(order_id);

        order.mutate(order_placed(
            order_id,
            user_id,
            vec![pdf_line(course_id, sar(100)), pdf_line(course_id, sar(100))],
        ));

        assert_eq!(
            order.expected_enrollments(),
            vec![enrollment_id(user_id, course_id, None)]
        );
    }
}
