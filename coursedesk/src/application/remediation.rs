use std::collections::BTreeMap;

use coursedesk_events::EventStore;
use serde::Serialize;

use super::{Application, Error};
use crate::domain::enrollment::FulfillmentBook;
use crate::domain::{DomainEvent, EnrollmentStatus, OrderId, OrderStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemediationFailure {
    pub order_id: OrderId,
    pub error: String,
}

/// The outcome of a `fix_missing_enrollments` run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemediationReport {
    /// Paid orders missing at least one enrollment.
    pub scanned: usize,
    pub repaired: usize,
    /// Enrollments created across every repaired order.
    pub created: usize,
    pub failed: Vec<RemediationFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrollmentDiagnostics {
    pub orders_by_status: BTreeMap<OrderStatus, usize>,
    pub paid_orders: usize,
    pub paid_orders_missing_enrollments: Vec<OrderId>,
    pub enrollments_by_status: BTreeMap<EnrollmentStatus, usize>,
}

impl<ES> Application<ES>
where
    ES: EventStore<DomainEvent> + Clone + 'static,
{
    /// Issues the enrollments of every paid order that misses some.
    ///
    /// A failing order is reported and does not stop the run.
    #[tracing::instrument(skip(self))]
    pub async fn fix_missing_enrollments(&self) -> Result<RemediationReport, Error> {
        let book = self
            .decision_maker
            .load(FulfillmentBook::default())
            .await
            .map_err(Error::store)?
            .into_state();
        let missing = book.orders_missing_enrollments();
        let mut report = RemediationReport {
            scanned: missing.len(),
            ..Default::default()
        };

        for order_id in missing {
            match self.issue_enrollments(order_id).await {
                Ok(created) => {
                    report.repaired += 1;
                    report.created += created.len();
                }
                Err(err) => {
                    tracing::warn!(%order_id, error = %err, "could not repair order enrollments");
                    report.failed.push(RemediationFailure {
                        order_id,
                        error: err.to_string(),
                    });
                }
            }
        }
        tracing::info!(
            scanned = report.scanned,
            repaired = report.repaired,
            created = report.created,
            failed = report.failed.len(),
            "missing enrollments fixed"
        );
        Ok(report)
    }

    pub async fn enrollment_diagnostics(&self) -> Result<EnrollmentDiagnostics, Error> {
        let book = self
            .decision_maker
            .load(FulfillmentBook::default())
            .await
            .map_err(Error::store)?
            .into_state();
        Ok(EnrollmentDiagnostics {
            orders_by_status: book.orders_by_status(),
            paid_orders: book.paid_orders(),
            paid_orders_missing_enrollments: book.orders_missing_enrollments(),
            enrollments_by_status: book.enrollments_by_status(),
        })
    }
}
