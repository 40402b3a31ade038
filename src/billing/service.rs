use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, TimeZone, Utc};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::config;
use crate::error::AppError;

use super::adapters::ProviderError;
use super::limits;
use super::models::{
    BillingSummary, InvoiceCandidate, LessonMaster, LessonSchedule, MembershipType, RefundScope,
};
use super::state::{due_transition, BillingStatus, DueTransition};

/// Typed failure reasons for the synchronous admin surface; the scheduler
/// paths log instead of propagating these.
#[derive(Debug, Error)]
pub enum BillingActionError {
    #[error("schedule not found")]
    NotFound,
    #[error("unknown {0}")]
    UnknownReference(&'static str),
    #[error("cannot {action} a schedule in status `{status}`")]
    InvalidState {
        action: &'static str,
        status: BillingStatus,
    },
    #[error("schedule has no payment reference")]
    MissingPaymentRef,
    #[error("a partial refund requires a positive amount")]
    InvalidAmount,
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl From<BillingActionError> for AppError {
    fn from(err: BillingActionError) -> Self {
        match err {
            BillingActionError::NotFound => AppError::NotFound,
            BillingActionError::UnknownReference(what) => {
                AppError::BadRequest(format!("unknown {what}"))
            }
            BillingActionError::InvalidState { .. }
            | BillingActionError::MissingPaymentRef
            | BillingActionError::InvalidAmount => AppError::Precondition(err.to_string()),
            BillingActionError::Provider(inner) => AppError::BadGateway(inner.to_string()),
            BillingActionError::Db(inner) => AppError::Db(inner),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub student_id: i32,
    pub coach_id: i32,
    pub lesson_master_id: Uuid,
    pub starts_at: DateTime<Utc>,
}

/// key: billing-service -> schedule billing lifecycle
#[derive(Clone)]
pub struct BillingService {
    pool: PgPool,
}

impl BillingService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Booking entry point: decides overage against the student's monthly
    /// entitlement and inserts the schedule with its billing placement.
    pub async fn register_schedule(
        &self,
        req: NewSchedule,
        now: DateTime<Utc>,
    ) -> Result<LessonSchedule, BillingActionError> {
        let master = sqlx::query_as::<_, LessonMaster>(
            "SELECT * FROM lesson_masters WHERE id = $1",
        )
        .bind(req.lesson_master_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(BillingActionError::UnknownReference("lesson master"))?;

        let membership_type_id: Option<Uuid> =
            sqlx::query_scalar("SELECT membership_type_id FROM users WHERE id = $1")
                .bind(req.student_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(BillingActionError::UnknownReference("student"))?;

        let membership = match membership_type_id {
            Some(id) => {
                sqlx::query_as::<_, MembershipType>("SELECT * FROM membership_types WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?
            }
            None => None,
        };

        let (month_start, month_end) = month_bounds(req.starts_at);
        let (completed, scheduled): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE lesson_status = 'completed'),
                COUNT(*) FILTER (WHERE lesson_status = 'scheduled')
            FROM lesson_schedules
            WHERE student_id = $1 AND starts_at >= $2 AND starts_at < $3
            "#,
        )
        .bind(req.student_id)
        .bind(month_start)
        .bind(month_end)
        .fetch_one(&self.pool)
        .await?;

        // Without a membership there is no entitlement to consume.
        let is_overage = membership
            .as_ref()
            .map(|m| limits::is_overage(m, completed, scheduled))
            .unwrap_or(true);

        let (billing_status, billing_scheduled_at) = if is_overage {
            let scheduled_at = limits::billing_time_for(req.starts_at);
            let status = match due_transition(
                BillingStatus::FutureBilling,
                now,
                Some(scheduled_at),
                None,
                approval_window(),
            ) {
                Some(DueTransition::PromoteToAwaitingApproval) => BillingStatus::AwaitingApproval,
                _ => BillingStatus::FutureBilling,
            };
            (status, Some(scheduled_at))
        } else {
            (BillingStatus::FutureBilling, None)
        };

        let row = sqlx::query_as::<_, LessonSchedule>(
            r#"
            INSERT INTO lesson_schedules (
                id, student_id, coach_id, lesson_master_id, starts_at, price,
                is_overage, billing_status, billing_scheduled_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(req.student_id)
        .bind(req.coach_id)
        .bind(req.lesson_master_id)
        .bind(req.starts_at)
        .bind(master.unit_price)
        .bind(is_overage)
        .bind(billing_status)
        .bind(billing_scheduled_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn fetch(&self, id: Uuid) -> Result<Option<LessonSchedule>, sqlx::Error> {
        sqlx::query_as::<_, LessonSchedule>("SELECT * FROM lesson_schedules WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Admin action: `awaiting_approval` -> `approved`. Re-approving an
    /// already approved row is a no-op.
    pub async fn approve(&self, id: Uuid) -> Result<LessonSchedule, BillingActionError> {
        self.admin_transition(id, "approve", BillingStatus::Approved).await
    }

    /// Admin action: `awaiting_approval` -> `rejected` (declines to bill).
    pub async fn reject(&self, id: Uuid) -> Result<LessonSchedule, BillingActionError> {
        self.admin_transition(id, "reject", BillingStatus::Rejected).await
    }

    async fn admin_transition(
        &self,
        id: Uuid,
        action: &'static str,
        target: BillingStatus,
    ) -> Result<LessonSchedule, BillingActionError> {
        let updated = sqlx::query_as::<_, LessonSchedule>(
            r#"
            UPDATE lesson_schedules
            SET billing_status = $2, updated_at = NOW()
            WHERE id = $1 AND billing_status = 'awaiting_approval'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(target)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = updated {
            return Ok(row);
        }
        let row = self.fetch(id).await?.ok_or(BillingActionError::NotFound)?;
        if row.billing_status == target {
            return Ok(row);
        }
        Err(BillingActionError::InvalidState {
            action,
            status: row.billing_status,
        })
    }

    /// Sweep for the execute tick: moves due `future_billing`/`pending` rows
    /// into `awaiting_approval`.
    pub async fn promote_due(&self, now: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let horizon = now + approval_window();
        let result = sqlx::query(
            r#"
            UPDATE lesson_schedules
            SET billing_status = 'awaiting_approval', updated_at = NOW()
            WHERE is_overage = TRUE
              AND billing_status IN ('future_billing', 'pending')
              AND billing_scheduled_at IS NOT NULL
              AND billing_scheduled_at <= $1
            "#,
        )
        .bind(horizon)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Approved rows whose billing time has arrived, flattened with the data
    /// the invoice item needs.
    pub async fn due_for_invoicing(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<InvoiceCandidate>, sqlx::Error> {
        sqlx::query_as::<_, InvoiceCandidate>(
            r#"
            SELECT
                s.id,
                s.price,
                s.starts_at,
                s.billing_attempts,
                lm.title AS lesson_title,
                u.name AS student_name,
                u.customer_ref
            FROM lesson_schedules s
            JOIN lesson_masters lm ON lm.id = s.lesson_master_id
            JOIN users u ON u.id = s.student_id
            WHERE s.is_overage = TRUE
              AND s.billing_status = 'approved'
              AND s.invoice_item_ref IS NULL
              AND s.billing_scheduled_at IS NOT NULL
              AND s.billing_scheduled_at <= $1
            ORDER BY s.billing_scheduled_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
    }

    /// Atomic claim closing the race between overlapping execute runs: only
    /// one run can move a row out of `approved`.
    pub async fn claim_for_invoicing(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE lesson_schedules
            SET billing_status = 'invoiced', updated_at = NOW()
            WHERE id = $1 AND billing_status = 'approved' AND invoice_item_ref IS NULL
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn record_invoice_item(
        &self,
        id: Uuid,
        invoice_item_ref: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE lesson_schedules SET invoice_item_ref = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(invoice_item_ref)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Rolls a failed claim back to `approved`, or parks the row as `error`
    /// once the attempt budget is spent. Single statement so an overlapping
    /// run cannot observe a half-applied rollback.
    pub async fn release_failed_claim(
        &self,
        id: Uuid,
    ) -> Result<Option<BillingStatus>, sqlx::Error> {
        sqlx::query_scalar::<_, BillingStatus>(
            r#"
            UPDATE lesson_schedules
            SET billing_attempts = billing_attempts + 1,
                billing_status = CASE
                    WHEN billing_attempts + 1 >= $2 THEN 'error'::billing_status
                    ELSE 'approved'::billing_status
                END,
                updated_at = NOW()
            WHERE id = $1 AND billing_status = 'invoiced' AND invoice_item_ref IS NULL
            RETURNING billing_status
            "#,
        )
        .bind(id)
        .bind(*config::BILLING_EXECUTE_MAX_ATTEMPTS)
        .fetch_optional(&self.pool)
        .await
    }

    /// Next-day window aggregate for the summary job. Read-only.
    pub async fn summary(&self, now: DateTime<Utc>) -> Result<BillingSummary, sqlx::Error> {
        let window_end = now + Duration::days(1);
        let (schedule_count, total_amount): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COALESCE(SUM(price), 0)::BIGINT
            FROM lesson_schedules
            WHERE is_overage = TRUE
              AND billing_status = 'approved'
              AND billing_scheduled_at >= $1
              AND billing_scheduled_at < $2
            "#,
        )
        .bind(now)
        .bind(window_end)
        .fetch_one(&self.pool)
        .await?;

        Ok(BillingSummary {
            window_start: now,
            window_end,
            schedule_count,
            total_amount,
        })
    }

    /// Inbound payment confirmation: `invoiced` -> `paid`. Idempotent.
    pub async fn mark_paid(&self, id: Uuid, payment_ref: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE lesson_schedules
            SET billing_status = 'paid', payment_intent_ref = $2, updated_at = NOW()
            WHERE id = $1 AND billing_status = 'invoiced'
            "#,
        )
        .bind(id)
        .bind(payment_ref)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Persists a completed refund; guarded on the refundable statuses so a
    /// concurrent second refund cannot double-apply.
    pub async fn apply_refund(
        &self,
        id: Uuid,
        scope: RefundScope,
        refund_ref: &str,
    ) -> Result<Option<LessonSchedule>, sqlx::Error> {
        sqlx::query_as::<_, LessonSchedule>(
            r#"
            UPDATE lesson_schedules
            SET billing_status = $2, refund_ref = $3, refund_scope = $4, updated_at = NOW()
            WHERE id = $1 AND billing_status IN ('paid', 'partially_refunded')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(scope.resulting_status())
        .bind(refund_ref)
        .bind(scope.as_str())
        .fetch_optional(&self.pool)
        .await
    }
}

pub fn approval_window() -> Duration {
    Duration::days(*config::BILLING_APPROVAL_WINDOW_DAYS)
}

/// Calendar-month bounds containing `at`.
pub fn month_bounds(at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start_date = NaiveDate::from_ymd_opt(at.year(), at.month(), 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    let start = Utc.from_utc_datetime(&start_date);
    let end = start + Months::new(1);
    (start, end)
}
