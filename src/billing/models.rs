use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::state::BillingStatus;

/// key: billing-models -> schedules,memberships,masters
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LessonSchedule {
    pub id: Uuid,
    pub student_id: i32,
    pub coach_id: i32,
    pub lesson_master_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub price: i32,
    pub lesson_status: String,
    pub is_overage: bool,
    pub billing_status: BillingStatus,
    pub billing_scheduled_at: Option<DateTime<Utc>>,
    pub billing_attempts: i32,
    pub invoice_item_ref: Option<String>,
    pub payment_intent_ref: Option<String>,
    pub refund_ref: Option<String>,
    pub refund_scope: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// key: billing-membership-model -> monthly quota + reward master binding
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MembershipType {
    pub id: Uuid,
    pub name: String,
    pub monthly_limit: i32,
    pub fee: i32,
    pub default_lesson_master_id: Option<Uuid>,
    pub reward_master_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LessonMaster {
    pub id: Uuid,
    pub title: String,
    pub unit_price: i32,
    pub is_trial: bool,
    pub created_at: DateTime<Utc>,
}

/// Flattened row for the execute job: everything needed to build one invoice
/// item, joined at the store boundary so downstream code never re-queries.
#[derive(Debug, Clone, FromRow)]
pub struct InvoiceCandidate {
    pub id: Uuid,
    pub price: i32,
    pub starts_at: DateTime<Utc>,
    pub billing_attempts: i32,
    pub lesson_title: String,
    pub student_name: String,
    pub customer_ref: Option<String>,
}

/// Aggregate the summary job reports on.
#[derive(Debug, Clone, Serialize)]
pub struct BillingSummary {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub schedule_count: i64,
    pub total_amount: i64,
}

/// Scope of a refund as persisted on the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundScope {
    Full,
    Partial,
}

impl RefundScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundScope::Full => "full",
            RefundScope::Partial => "partial",
        }
    }

    pub fn resulting_status(&self) -> BillingStatus {
        match self {
            RefundScope::Full => BillingStatus::Refunded,
            RefundScope::Partial => BillingStatus::PartiallyRefunded,
        }
    }
}
