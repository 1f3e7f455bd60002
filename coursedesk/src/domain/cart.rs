//! Carts of users and anonymous visitors.
use chrono::{DateTime, Utc};
use coursedesk_events::{query, Decision, StateMutate, StateQuery, StreamQuery};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::catalog::{Courses, SeatError, Sessions};
use super::{CartId, CartItemId, CourseId, CourseType, DomainEvent, ErrorKind, SessionId, UserId};

/// Who a cart belongs to: a signed-in user or an anonymous visitor, never both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CartOwner {
    User(UserId),
    Anonymous(String),
}

impl CartOwner {
    /// Resolves the owner from the optional ids of a request.
    ///
    /// A fresh anonymous id is generated when neither id is given.
    pub fn from_ids(user_id: Option<UserId>, anonymous_id: Option<String>) -> Result<Self, CartError> {
        match (user_id, anonymous_id) {
            (Some(_), Some(_)) => Err(CartError::AmbiguousOwner),
            (Some(user_id), None) => Ok(CartOwner::User(user_id)),
            (None, Some(anonymous_id)) if anonymous_id.trim().is_empty() => {
                Err(CartError::EmptyAnonymousId)
            }
            (None, Some(anonymous_id)) => Ok(CartOwner::Anonymous(anonymous_id)),
            (None, None) => Ok(CartOwner::Anonymous(Uuid::new_v4().to_string())),
        }
    }

    /// The value of the `cart_owner` domain identifier.
    pub fn key(&self) -> String {
        match self {
            CartOwner::User(user_id) => format!("user:{user_id}"),
            CartOwner::Anonymous(anonymous_id) => format!("anonymous:{anonymous_id}"),
        }
    }

    pub fn user_id(&self) -> Option<UserId> {
        match self {
            CartOwner::User(user_id) => Some(*user_id),
            CartOwner::Anonymous(_) => None,
        }
    }

    pub fn anonymous_id(&self) -> Option<&str> {
        match self {
            CartOwner::User(_) => None,
            CartOwner::Anonymous(anonymous_id) => Some(anonymous_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CartCloseReason {
    CheckedOut,
    Merged,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CartError {
    #[error("a cart belongs to either a user or an anonymous visitor")]
    AmbiguousOwner,
    #[error("anonymous id must not be empty")]
    EmptyAnonymousId,
    #[error("the owner already has the open cart {0}")]
    AlreadyOpen(CartId),
    #[error("cart {0} not found")]
    CartNotFound(CartId),
    #[error("cart {0} is closed")]
    CartClosed(CartId),
    #[error("cart item {0} not found")]
    CartItemNotFound(CartItemId),
    #[error("course {0} is already in the cart")]
    DuplicateItem(CourseId),
    #[error("course {0} not found")]
    CourseNotFound(CourseId),
    #[error("course {0} is not on sale")]
    CourseInactive(CourseId),
    #[error("live course {0} requires a session")]
    SessionRequired(CourseId),
    #[error("course {0} has no sessions")]
    SessionNotAllowed(CourseId),
    #[error(transparent)]
    Seat(#[from] SeatError),
}

impl CartError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CartError::CartNotFound(_)
            | CartError::CartItemNotFound(_)
            | CartError::CourseNotFound(_)
            | CartError::Seat(SeatError::SessionNotFound(_)) => ErrorKind::NotFound,
            CartError::AlreadyOpen(_) => ErrorKind::Conflict,
            _ => ErrorKind::Validation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartItem {
    pub cart_item_id: CartItemId,
    pub course_id: CourseId,
    pub session_id: Option<SessionId>,
}

/// A single cart, open or closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cart {
    cart_id: CartId,
    owner: Option<CartOwner>,
    items: Vec<CartItem>,
    closed: Option<CartCloseReason>,
    opened_at: Option<DateTime<Utc>>,
}

impl Cart {
    pub fn new(cart_id: CartId) -> Self {
        Self {
            cart_id,
            owner: None,
            items: vec![],
            closed: None,
            opened_at: None,
        }
    }

    pub fn cart_id(&self) -> CartId {
        self.cart_id
    }

    pub fn owner(&self) -> Option<&CartOwner> {
        self.owner.as_ref()
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn exists(&self) -> bool {
        self.owner.is_some()
    }

    pub fn closed(&self) -> Option<CartCloseReason> {
        self.closed
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at
    }

    pub fn contains(&self, course_id: CourseId, session_id: Option<SessionId>) -> bool {
        self.items
            .iter()
            .any(|item| item.course_id == course_id && item.session_id == session_id)
    }

    /// Returns the owner of an existing cart that can still be changed.
    fn ensure_open(&self) -> Result<&CartOwner, CartError> {
        let owner = self
            .owner
            .as_ref()
            .ok_or(CartError::CartNotFound(self.cart_id))?;
        if self.closed.is_some() {
            return Err(CartError::CartClosed(self.cart_id));
        }
        Ok(owner)
    }

    fn apply(&mut self, event: DomainEvent) {
        match event {
            DomainEvent::CartOpened {
                owner, opened_at, ..
            } => {
                self.owner = Some(owner);
                self.opened_at = Some(opened_at);
            }
            DomainEvent::CartItemAdded {
                cart_item_id,
                course_id,
                session_id,
                ..
            } => self.items.push(CartItem {
                cart_item_id,
                course_id,
                session_id,
            }),
            DomainEvent::CartItemRemoved { cart_item_id, .. } => {
                self.items.retain(|item| item.cart_item_id != cart_item_id)
            }
            DomainEvent::CartClosed { reason, .. } => self.closed = Some(reason),
            _ => {}
        }
    }
}

impl StateQuery for Cart {
    type Event = DomainEvent;

    fn query(&self) -> StreamQuery<DomainEvent> {
        let cart_id = self.cart_id;
        query!(
            DomainEvent,
            (events[CartOpened, CartItemAdded, CartItemRemoved, CartClosed]) and (cart_id == cart_id)
        )
    }
}

impl StateMutate for Cart {
    fn mutate(&mut self, event: DomainEvent) {
        self.apply(event);
    }
}

/// The open cart of an owner, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerCart {
    owner: CartOwner,
    open: Option<Cart>,
}

impl OwnerCart {
    pub fn new(owner: CartOwner) -> Self {
        Self { owner, open: None }
    }

    pub fn open(&self) -> Option<&Cart> {
        self.open.as_ref()
    }
}

impl StateQuery for OwnerCart {
    type Event = DomainEvent;

    fn query(&self) -> StreamQuery<DomainEvent> {
        let cart_owner = self.owner.key();
        query!(
            DomainEvent,
            (events[CartOpened, CartItemAdded, CartItemRemoved, CartClosed])
                and (cart_owner == cart_owner)
        )
    }
}

impl StateMutate for OwnerCart {
    fn mutate(&mut self, event: DomainEvent) {
        match &event {
            DomainEvent::CartOpened { cart_id, .. } => {
                let mut cart = Cart::new(*cart_id);
                cart.apply(event);
                self.open = Some(cart);
            }
            DomainEvent::CartClosed { cart_id, .. } => {
                if self.open.as_ref().is_some_and(|cart| cart.cart_id == *cart_id) {
                    self.open = None;
                }
            }
            DomainEvent::CartItemAdded { cart_id, .. }
            | DomainEvent::CartItemRemoved { cart_id, .. } => {
                if let Some(cart) = self.open.as_mut().filter(|cart| cart.cart_id == *cart_id) {
                    cart.apply(event);
                }
            }
            _ => {}
        }
    }
}

/// Opens a cart, unless the owner already has an open one.
#[derive(Debug)]
pub struct OpenCart {
    pub cart_id: CartId,
    pub owner: CartOwner,
    pub now: DateTime<Utc>,
}

impl Decision for OpenCart {
    type Event = DomainEvent;
    type StateQuery = OwnerCart;
    type Error = CartError;

    fn state_query(&self) -> Self::StateQuery {
        OwnerCart::new(self.owner.clone())
    }

    fn process(&self, owner_cart: &Self::StateQuery) -> Result<Vec<Self::Event>, Self::Error> {
        if let Some(cart) = owner_cart.open() {
            return Err(CartError::AlreadyOpen(cart.cart_id));
        }
        Ok(vec![DomainEvent::CartOpened {
            cart_id: self.cart_id,
            owner: self.owner.clone(),
            opened_at: self.now,
        }])
    }
}

#[derive(Debug)]
pub struct AddCartItem {
    pub cart_id: CartId,
    pub cart_item_id: CartItemId,
    pub course_id: CourseId,
    pub session_id: Option<SessionId>,
}

impl Decision for AddCartItem {
    type Event = DomainEvent;
    type StateQuery = (Cart, Courses, Sessions);
    type Error = CartError;

    fn state_query(&self) -> Self::StateQuery {
        (
            Cart::new(self.cart_id),
            Courses::new([self.course_id]),
            Sessions::new(self.session_id),
        )
    }

    fn process(
        &self,
        (cart, courses, sessions): &Self::StateQuery,
    ) -> Result<Vec<Self::Event>, Self::Error> {
        let owner = cart.ensure_open()?;
        if cart.contains(self.course_id, self.session_id) {
            return Err(CartError::DuplicateItem(self.course_id));
        }
        let course = courses
            .get(&self.course_id)
            .ok_or(CartError::CourseNotFound(self.course_id))?;
        if !course.active {
            return Err(CartError::CourseInactive(self.course_id));
        }
        match (course.course_type, self.session_id) {
            (CourseType::Live, None) => return Err(CartError::SessionRequired(self.course_id)),
            (CourseType::Pdf, Some(_)) => return Err(CartError::SessionNotAllowed(self.course_id)),
            (CourseType::Live, Some(session_id)) => {
                sessions
                    .board()
                    .check_seat(session_id, self.course_id, None)?;
            }
            (CourseType::Pdf, None) => {}
        }
        Ok(vec![DomainEvent::CartItemAdded {
            cart_id: self.cart_id,
            owner: owner.clone(),
            cart_item_id: self.cart_item_id,
            course_id: self.course_id,
            session_id: self.session_id,
        }])
    }
}

#[derive(Debug)]
pub struct RemoveCartItem {
    pub cart_id: CartId,
    pub cart_item_id: CartItemId,
}

impl Decision for RemoveCartItem {
    type Event = DomainEvent;
    type StateQuery = Cart;
    type Error = CartError;

    fn state_query(&self) -> Self::StateQuery {
        Cart::new(self.cart_id)
    }

    fn process(&self, cart: &Self::StateQuery) -> Result<Vec<Self::Event>, Self::Error> {
        let owner = cart.ensure_open()?;
        if !cart
            .items
            .iter()
            .any(|item| item.cart_item_id == self.cart_item_id)
        {
            return Err(CartError::CartItemNotFound(self.cart_item_id));
        }
        Ok(vec![DomainEvent::CartItemRemoved {
            cart_id: self.cart_id,
            owner: owner.clone(),
            cart_item_id: self.cart_item_id,
        }])
    }
}

/// Moves the items of an anonymous visitor's open cart into the user's open cart.
///
/// The user's cart is opened with `new_cart_id` when the user has none.
#[derive(Debug)]
pub struct MergeCarts {
    pub anonymous_id: String,
    pub user_id: UserId,
    pub new_cart_id: CartId,
    pub now: DateTime<Utc>,
}

impl MergeCarts {
    fn anonymous(&self) -> CartOwner {
        CartOwner::Anonymous(self.anonymous_id.clone())
    }

    fn user(&self) -> CartOwner {
        CartOwner::User(self.user_id)
    }
}

impl Decision for MergeCarts {
    type Event = DomainEvent;
    type StateQuery = (OwnerCart, OwnerCart);
    type Error = CartError;

    fn state_query(&self) -> Self::StateQuery {
        (OwnerCart::new(self.anonymous()), OwnerCart::new(self.user()))
    }

    fn process(
        &self,
        (anonymous, user): &Self::StateQuery,
    ) -> Result<Vec<Self::Event>, Self::Error> {
        if self.anonymous_id.trim().is_empty() {
            return Err(CartError::EmptyAnonymousId);
        }
        let mut changes = vec![];
        let mut target = match user.open() {
            Some(cart) => cart.clone(),
            None => {
                let opened = DomainEvent::CartOpened {
                    cart_id: self.new_cart_id,
                    owner: self.user(),
                    opened_at: self.now,
                };
                let mut cart = Cart::new(self.new_cart_id);
                cart.apply(opened.clone());
                changes.push(opened);
                cart
            }
        };

        let Some(source) = anonymous.open() else {
            return Ok(changes);
        };
        for item in source.items() {
            if target.contains(item.course_id, item.session_id) {
                continue;
            }
            let added = DomainEvent::CartItemAdded {
                cart_id: target.cart_id,
                owner: self.user(),
                cart_item_id: item.cart_item_id,
                course_id: item.course_id,
                session_id: item.session_id,
            };
            target.apply(added.clone());
            changes.push(added);
        }
        changes.push(DomainEvent::CartClosed {
            cart_id: source.cart_id,
            owner: self.anonymous(),
            reason: CartCloseReason::Merged,
            closed_at: self.now,
        });
        Ok(changes)
    }
}
