//! Use cases of coursedesk, on top of the decision maker.
mod commands;
mod queries;
mod remediation;

use std::sync::Arc;

use coursedesk_events::{BoxDynError, DecisionError, DecisionMaker, EventStoreError};

use crate::domain::cart::CartError;
use crate::domain::catalog::CatalogError;
use crate::domain::delivery::DeliveryError;
use crate::domain::enrollment::EnrollmentError;
use crate::domain::order::OrderError;
use crate::domain::payment::PaymentError;
use crate::domain::ErrorKind;
use crate::gateway::{GatewayError, Gateways};
use crate::storage::{FileStorage, StorageError};

pub use commands::{Download, NewCourse, NewSession, WebhookReceipt};
pub use queries::{
    AttachmentView, CartItemView, CartView, CourseView, EnrollmentView, LinkView, OrderLineView,
    OrderView, PaymentView, SecureLinkView, SessionView,
};
pub use remediation::{EnrollmentDiagnostics, RemediationFailure, RemediationReport};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Cart(#[from] CartError),
    #[error(transparent)]
    Order(#[from] OrderError),
    #[error(transparent)]
    Payment(#[from] PaymentError),
    #[error(transparent)]
    Enrollment(#[from] EnrollmentError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("the resource was modified concurrently, retry the request")]
    Conflict,
    #[error("event store error: {0}")]
    EventStore(#[source] BoxDynError),
}

impl Error {
    pub(crate) fn store(err: impl EventStoreError) -> Self {
        Error::EventStore(Box::new(err))
    }

    /// How the error should be reported, `None` for internal failures.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Catalog(err) => Some(err.kind()),
            Error::Cart(err) => Some(err.kind()),
            Error::Order(err) => Some(err.kind()),
            Error::Payment(err) => Some(err.kind()),
            Error::Enrollment(err) => Some(err.kind()),
            Error::Delivery(err) => Some(err.kind()),
            Error::Gateway(GatewayError::MalformedPayload(_)) => Some(ErrorKind::Validation),
            Error::Storage(StorageError::NotFound(_)) => Some(ErrorKind::NotFound),
            Error::Conflict => Some(ErrorKind::Conflict),
            Error::Gateway(_) | Error::Storage(_) | Error::EventStore(_) => None,
        }
    }
}

impl<S, D> From<DecisionError<S, D>> for Error
where
    S: EventStoreError,
    D: Into<Error>,
{
    fn from(err: DecisionError<S, D>) -> Self {
        match err {
            DecisionError::EventStore(err) if err.is_concurrency() => Error::Conflict,
            DecisionError::EventStore(err) => Error::store(err),
            DecisionError::Domain(err) => err.into(),
        }
    }
}

#[derive(Clone)]
pub struct Application<ES> {
    decision_maker: DecisionMaker<ES>,
    storage: Arc<dyn FileStorage>,
    gateways: Arc<Gateways>,
    public_base_url: Arc<str>,
}

impl<ES> Application<ES> {
    pub fn new(
        event_store: ES,
        storage: Arc<dyn FileStorage>,
        gateways: Gateways,
        public_base_url: impl Into<String>,
    ) -> Self {
        let public_base_url: String = public_base_url.into();
        Self {
            decision_maker: DecisionMaker::new(event_store),
            storage,
            gateways: Arc::new(gateways),
            public_base_url: public_base_url.trim_end_matches('/').into(),
        }
    }

    pub fn event_store(&self) -> &ES {
        self.decision_maker.event_store()
    }

    /// The public URL downloading the material behind `token`.
    pub fn download_url(&self, token: &str) -> String {
        download_url(&self.public_base_url, token)
    }
}

pub fn download_url(public_base_url: &str, token: &str) -> String {
    format!(
        "{}/api/secure/materials/{token}",
        public_base_url.trim_end_matches('/')
    )
}
