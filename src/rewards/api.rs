use axum::{
    extract::{Extension, Path},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;

use super::calculator::MonthlyRewardReport;
use super::service::{RewardError, RewardService};

pub fn routes() -> Router {
    Router::new()
        .route(
            "/api/coaches/:id/rewards/history",
            get(get_reward_history),
        )
        .route("/api/coaches/:id/rewards/:month", get(get_monthly_report))
}

pub async fn get_monthly_report(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Path((coach_id, month)): Path<(i32, String)>,
) -> AppResult<Json<MonthlyRewardReport>> {
    authorize(&user, coach_id)?;
    let (year, month) = parse_month_key(&month)?;
    let service = RewardService::new(pool);
    let report = service.report_for_month(coach_id, year, month).await?;
    Ok(Json(report))
}

pub async fn get_reward_history(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Path(coach_id): Path<i32>,
) -> AppResult<Json<Vec<MonthlyRewardReport>>> {
    authorize(&user, coach_id)?;
    let service = RewardService::new(pool);
    let reports = service.history(coach_id, Utc::now()).await?;
    Ok(Json(reports))
}

/// Coaches see their own reports; admins see anyone's.
fn authorize(user: &AuthUser, coach_id: i32) -> Result<(), AppError> {
    if user.is_admin() || user.user_id == coach_id {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

fn parse_month_key(key: &str) -> Result<(i32, u32), AppError> {
    fn invalid(key: &str) -> AppError {
        RewardError::InvalidMonth(key.to_string()).into()
    }
    let (year, month) = key.split_once('-').ok_or_else(|| invalid(key))?;
    let year: i32 = year.parse().map_err(|_| invalid(key))?;
    let month: u32 = month.parse().map_err(|_| invalid(key))?;
    if !(1..=12).contains(&month) {
        return Err(invalid(key));
    }
    Ok((year, month))
}
