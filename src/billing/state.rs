use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// key: billing-state -> schedule billing lifecycle
///
/// Statuses only move forward; every mutation in the service layer is a
/// conditional UPDATE guarded on the expected source status, so re-applying a
/// transition is a no-op rather than a duplicate effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "billing_status", rename_all = "snake_case")]
pub enum BillingStatus {
    FutureBilling,
    Pending,
    AwaitingApproval,
    Approved,
    Invoiced,
    Paid,
    PartiallyRefunded,
    Refunded,
    Rejected,
    Error,
}

impl BillingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingStatus::FutureBilling => "future_billing",
            BillingStatus::Pending => "pending",
            BillingStatus::AwaitingApproval => "awaiting_approval",
            BillingStatus::Approved => "approved",
            BillingStatus::Invoiced => "invoiced",
            BillingStatus::Paid => "paid",
            BillingStatus::PartiallyRefunded => "partially_refunded",
            BillingStatus::Refunded => "refunded",
            BillingStatus::Rejected => "rejected",
            BillingStatus::Error => "error",
        }
    }

    /// `future_billing` and `pending` are interchangeable entry states; both
    /// wait for the approval window to open.
    pub fn awaits_promotion(&self) -> bool {
        matches!(self, BillingStatus::FutureBilling | BillingStatus::Pending)
    }

    pub fn may_approve(&self) -> bool {
        matches!(self, BillingStatus::AwaitingApproval)
    }

    pub fn may_reject(&self) -> bool {
        matches!(self, BillingStatus::AwaitingApproval)
    }

    /// Refunds require money to have actually moved.
    pub fn may_refund(&self) -> bool {
        matches!(self, BillingStatus::Paid | BillingStatus::PartiallyRefunded)
    }
}

impl std::fmt::Display for BillingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time-driven transition the scheduler should take for a row, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueTransition {
    /// `future_billing`/`pending` -> `awaiting_approval` once inside the window.
    PromoteToAwaitingApproval,
    /// `approved` -> `invoiced`, gated on the invoice-item guard.
    ExecuteInvoice,
}

/// Pure "given current state + now, what is next" decision, separated from the
/// conditional writes that execute it.
pub fn due_transition(
    status: BillingStatus,
    now: DateTime<Utc>,
    billing_scheduled_at: Option<DateTime<Utc>>,
    invoice_item_ref: Option<&str>,
    approval_window: Duration,
) -> Option<DueTransition> {
    let scheduled_at = billing_scheduled_at?;
    if status.awaits_promotion() && scheduled_at <= now + approval_window {
        return Some(DueTransition::PromoteToAwaitingApproval);
    }
    if status == BillingStatus::Approved && scheduled_at <= now && invoice_item_ref.is_none() {
        return Some(DueTransition::ExecuteInvoice);
    }
    None
}
