use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tracing::{debug, info, warn};

use crate::config;
use crate::notifications::Notifier;

use super::adapters::{InvoiceItemRequest, InvoicingProvider};
use super::models::BillingSummary;
use super::service::BillingService;
use super::state::BillingStatus;

/// key: billing-scheduler -> daily summary tick
///
/// Read-only with respect to billing state: aggregates the approved rows due
/// in the next 24 hours and posts one notification. A notification failure is
/// logged and swallowed; it must never block billing.
pub async fn summary_tick(
    pool: &PgPool,
    notifier: &dyn Notifier,
    now: DateTime<Utc>,
) -> Result<BillingSummary> {
    let service = BillingService::new(pool.clone());
    let summary = service.summary(now).await?;

    if summary.schedule_count == 0 {
        debug!("no overage billing due in the next day");
        return Ok(summary);
    }

    let message = format!(
        "{} overage lesson(s) scheduled for billing before {} (total {} {})",
        summary.schedule_count,
        summary.window_end.format("%Y-%m-%d %H:%M UTC"),
        summary.total_amount,
        config::BILLING_CURRENCY.as_str(),
    );
    if let Err(err) = notifier.send(&message).await {
        warn!(?err, "failed to deliver billing summary notification");
    }

    info!(
        count = summary.schedule_count,
        total = summary.total_amount,
        "billing summary tick completed"
    );
    Ok(summary)
}

#[derive(Debug, Default, Serialize)]
pub struct ExecuteOutcome {
    pub promoted: u64,
    pub invoiced: u32,
    pub skipped: u32,
    pub failed: u32,
}

/// key: billing-scheduler -> execute tick
///
/// Promotes due rows into the approval queue, then invoices every approved
/// row whose billing time has arrived. Each row is claimed with a conditional
/// update before the provider call, so overlapping runs and re-runs are
/// harmless; a failure on one row never aborts the rest of the batch.
pub async fn execute_tick(
    pool: &PgPool,
    provider: &dyn InvoicingProvider,
    now: DateTime<Utc>,
) -> Result<ExecuteOutcome> {
    let service = BillingService::new(pool.clone());
    let mut outcome = ExecuteOutcome::default();

    outcome.promoted = service.promote_due(now).await?;
    if outcome.promoted > 0 {
        info!(promoted = outcome.promoted, "promoted schedules into approval queue");
    }

    let candidates = service.due_for_invoicing(now).await?;
    for candidate in candidates {
        let Some(customer_ref) = candidate.customer_ref.clone() else {
            warn!(
                schedule = %candidate.id,
                student = %candidate.student_name,
                "skipping overage invoice: student has no payment customer reference"
            );
            outcome.skipped += 1;
            continue;
        };

        match service.claim_for_invoicing(candidate.id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(schedule = %candidate.id, "schedule already claimed by another run");
                continue;
            }
            Err(err) => {
                warn!(?err, schedule = %candidate.id, "failed to claim schedule");
                outcome.failed += 1;
                continue;
            }
        }

        let request = InvoiceItemRequest {
            customer_ref,
            amount: i64::from(candidate.price),
            currency: config::BILLING_CURRENCY.clone(),
            description: format!(
                "Overage lesson: {} on {} ({})",
                candidate.lesson_title,
                candidate.starts_at.format("%Y-%m-%d"),
                candidate.student_name,
            ),
            idempotency_key: format!("overage-{}", candidate.id),
        };

        match provider.create_invoice_item(request).await {
            Ok(invoice_item_ref) => match service
                .record_invoice_item(candidate.id, &invoice_item_ref)
                .await
            {
                Ok(()) => {
                    info!(
                        schedule = %candidate.id,
                        invoice_item = %invoice_item_ref,
                        amount = candidate.price,
                        "overage invoice item created"
                    );
                    outcome.invoiced += 1;
                }
                Err(err) => {
                    // The provider holds the item; the reference is lost until
                    // remediation, so surface loudly but keep the batch going.
                    warn!(
                        ?err,
                        schedule = %candidate.id,
                        invoice_item = %invoice_item_ref,
                        "invoice item created but reference could not be persisted"
                    );
                    outcome.failed += 1;
                }
            },
            Err(err) => {
                warn!(?err, schedule = %candidate.id, "provider rejected invoice item");
                match service.release_failed_claim(candidate.id).await {
                    Ok(Some(BillingStatus::Error)) => warn!(
                        schedule = %candidate.id,
                        attempts = candidate.billing_attempts + 1,
                        "schedule parked as error after repeated provider failures"
                    ),
                    Ok(_) => {}
                    Err(err) => warn!(?err, schedule = %candidate.id, "failed to release claim"),
                }
                outcome.failed += 1;
            }
        }
    }

    info!(
        invoiced = outcome.invoiced,
        skipped = outcome.skipped,
        failed = outcome.failed,
        "billing execute tick completed"
    );
    Ok(outcome)
}
