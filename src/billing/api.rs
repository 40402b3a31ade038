use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config;
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;
use crate::notifications::Notifier;

use super::adapters::InvoicingProvider;
use super::models::{BillingSummary, LessonSchedule, RefundScope};
use super::refunds::RefundProcessor;
use super::scheduler::{self, ExecuteOutcome};
use super::service::{BillingService, NewSchedule};

pub fn routes() -> Router {
    Router::new()
        .route("/api/schedules", post(create_schedule))
        .route("/api/schedules/:id", get(get_schedule))
        .route("/api/schedules/:id/approve", post(approve_schedule))
        .route("/api/schedules/:id/reject", post(reject_schedule))
        .route("/api/schedules/:id/refund", post(refund_schedule))
        .route("/api/billing/jobs/summary", post(run_summary_job))
        .route("/api/billing/jobs/execute", post(run_execute_job))
}

#[derive(Debug, Deserialize)]
pub struct CreateScheduleRequest {
    pub student_id: i32,
    pub coach_id: i32,
    pub lesson_master_id: Uuid,
    pub starts_at: DateTime<Utc>,
}

/// key: billing-api -> booking entry point; runs the limit evaluator
pub async fn create_schedule(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Json(payload): Json<CreateScheduleRequest>,
) -> AppResult<Json<LessonSchedule>> {
    // Students book for themselves; staff may book on anyone's behalf.
    if !user.is_coach() && user.user_id != payload.student_id {
        return Err(AppError::Forbidden);
    }
    let service = BillingService::new(pool);
    let row = service
        .register_schedule(
            NewSchedule {
                student_id: payload.student_id,
                coach_id: payload.coach_id,
                lesson_master_id: payload.lesson_master_id,
                starts_at: payload.starts_at,
            },
            Utc::now(),
        )
        .await?;
    Ok(Json(row))
}

pub async fn get_schedule(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<LessonSchedule>> {
    let service = BillingService::new(pool);
    let row = service.fetch(id).await?.ok_or(AppError::NotFound)?;
    if !user.is_admin() && user.user_id != row.student_id && user.user_id != row.coach_id {
        return Err(AppError::Forbidden);
    }
    Ok(Json(row))
}

pub async fn approve_schedule(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<LessonSchedule>> {
    require_admin(&user)?;
    let service = BillingService::new(pool);
    let row = service.approve(id).await?;
    tracing::info!(schedule = %row.id, admin = user.user_id, "overage billing approved");
    Ok(Json(row))
}

pub async fn reject_schedule(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<LessonSchedule>> {
    require_admin(&user)?;
    let service = BillingService::new(pool);
    let row = service.reject(id).await?;
    tracing::info!(schedule = %row.id, admin = user.user_id, "overage billing rejected");
    Ok(Json(row))
}

#[derive(Debug, Deserialize)]
pub struct RefundRequestBody {
    pub scope: RefundScope,
    pub amount: Option<i64>,
    pub reason: Option<String>,
}

pub async fn refund_schedule(
    Extension(pool): Extension<PgPool>,
    Extension(provider): Extension<Arc<dyn InvoicingProvider>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<RefundRequestBody>,
) -> AppResult<Json<LessonSchedule>> {
    require_admin(&user)?;
    let service = BillingService::new(pool);
    let processor = RefundProcessor::new(&service, provider.as_ref());
    let row = match payload.scope {
        RefundScope::Full => {
            if payload.amount.is_some() {
                return Err(AppError::BadRequest(
                    "full refund must not specify an amount".into(),
                ));
            }
            processor.refund_full(id, payload.reason).await?
        }
        RefundScope::Partial => {
            let amount = payload.amount.ok_or_else(|| {
                AppError::BadRequest("partial refund requires an amount".into())
            })?;
            processor.refund_partial(id, amount, payload.reason).await?
        }
    };
    Ok(Json(row))
}

/// key: billing-api -> external cron trigger surface
pub async fn run_summary_job(
    Extension(pool): Extension<PgPool>,
    Extension(notifier): Extension<Arc<dyn Notifier>>,
    headers: HeaderMap,
) -> AppResult<Json<BillingSummary>> {
    verify_scheduler_secret(&headers)?;
    let summary = scheduler::summary_tick(&pool, notifier.as_ref(), Utc::now())
        .await
        .map_err(|err| AppError::Message(err.to_string()))?;
    Ok(Json(summary))
}

pub async fn run_execute_job(
    Extension(pool): Extension<PgPool>,
    Extension(provider): Extension<Arc<dyn InvoicingProvider>>,
    headers: HeaderMap,
) -> AppResult<Json<ExecuteOutcome>> {
    verify_scheduler_secret(&headers)?;
    let outcome = scheduler::execute_tick(&pool, provider.as_ref(), Utc::now())
        .await
        .map_err(|err| AppError::Message(err.to_string()))?;
    Ok(Json(outcome))
}

fn require_admin(user: &AuthUser) -> Result<(), AppError> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

fn verify_scheduler_secret(headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = config::SCHEDULER_SHARED_SECRET.as_deref() else {
        return Ok(());
    };
    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    if presented == Some(expected) {
        Ok(())
    } else {
        Err(AppError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_endpoints_require_the_shared_secret() {
        std::env::set_var("SCHEDULER_SHARED_SECRET", "cron-secret");

        let mut headers = HeaderMap::new();
        assert!(verify_scheduler_secret(&headers).is_err());

        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer wrong".parse().unwrap(),
        );
        assert!(verify_scheduler_secret(&headers).is_err());

        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer cron-secret".parse().unwrap(),
        );
        assert!(verify_scheduler_secret(&headers).is_ok());
    }
}
