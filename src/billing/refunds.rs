use tracing::info;
use uuid::Uuid;

use super::adapters::{InvoicingProvider, RefundRequest};
use super::models::{LessonSchedule, RefundScope};
use super::service::{BillingActionError, BillingService};

/// key: billing-refunds -> admin-triggered reversal path
///
/// Re-enters the state machine from `paid`/`partially_refunded`. Every
/// precondition is checked before the provider is contacted.
pub struct RefundProcessor<'a> {
    service: &'a BillingService,
    provider: &'a dyn InvoicingProvider,
}

impl<'a> RefundProcessor<'a> {
    pub fn new(service: &'a BillingService, provider: &'a dyn InvoicingProvider) -> Self {
        Self { service, provider }
    }

    /// Full refund: the provider reverses whatever remains on the payment.
    pub async fn refund_full(
        &self,
        id: Uuid,
        reason: Option<String>,
    ) -> Result<LessonSchedule, BillingActionError> {
        self.refund(id, RefundScope::Full, None, reason).await
    }

    /// Partial refund of a positive amount.
    pub async fn refund_partial(
        &self,
        id: Uuid,
        amount: i64,
        reason: Option<String>,
    ) -> Result<LessonSchedule, BillingActionError> {
        if amount <= 0 {
            return Err(BillingActionError::InvalidAmount);
        }
        self.refund(id, RefundScope::Partial, Some(amount), reason).await
    }

    async fn refund(
        &self,
        id: Uuid,
        scope: RefundScope,
        amount: Option<i64>,
        reason: Option<String>,
    ) -> Result<LessonSchedule, BillingActionError> {
        let schedule = self
            .service
            .fetch(id)
            .await?
            .ok_or(BillingActionError::NotFound)?;

        if !schedule.billing_status.may_refund() {
            return Err(BillingActionError::InvalidState {
                action: "refund",
                status: schedule.billing_status,
            });
        }
        let payment_ref = schedule
            .payment_intent_ref
            .clone()
            .ok_or(BillingActionError::MissingPaymentRef)?;

        let refund_ref = self
            .provider
            .create_refund(RefundRequest {
                payment_ref,
                amount,
                reason,
            })
            .await?;

        let updated = self
            .service
            .apply_refund(id, scope, &refund_ref)
            .await?
            // The guarded update only loses the race to another refund that
            // completed in between; report it as a state conflict.
            .ok_or(BillingActionError::InvalidState {
                action: "refund",
                status: schedule.billing_status,
            })?;

        info!(
            schedule = %updated.id,
            refund = %refund_ref,
            scope = scope.as_str(),
            "refund applied"
        );
        Ok(updated)
    }
}
