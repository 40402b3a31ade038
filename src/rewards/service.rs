use chrono::{DateTime, Datelike, Months, NaiveDate, TimeZone, Utc};
use sqlx::PgPool;
use thiserror::Error;

use crate::config;
use crate::error::AppError;

use super::calculator::{monthly_report, MonthlyRewardReport, RewardableLesson};
use super::rank::RewardRate;

#[derive(Debug, Error)]
pub enum RewardError {
    #[error("coach not found")]
    CoachNotFound,
    #[error("invalid month key `{0}`; expected YYYY-MM")]
    InvalidMonth(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl From<RewardError> for AppError {
    fn from(err: RewardError) -> Self {
        match err {
            RewardError::CoachNotFound => AppError::NotFound,
            RewardError::InvalidMonth(_) => AppError::BadRequest(err.to_string()),
            RewardError::Db(inner) => AppError::Db(inner),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CoachProfile {
    pub id: i32,
    pub name: String,
    pub role: String,
    pub override_rate: Option<f64>,
}

/// Reads lesson history and computes reward reports. Pure computation lives
/// in `rank`/`calculator`; this layer only feeds it store data.
#[derive(Clone)]
pub struct RewardService {
    pool: PgPool,
}

impl RewardService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn coach_profile(&self, coach_id: i32) -> Result<CoachProfile, RewardError> {
        sqlx::query_as::<_, CoachProfile>(
            "SELECT id, name, role, override_rate FROM users WHERE id = $1 AND role IN ('coach', 'admin')",
        )
        .bind(coach_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RewardError::CoachNotFound)
    }

    /// Mean completed-lesson count over the months preceding `month_start`.
    async fn trailing_average(
        &self,
        coach_id: i32,
        month_start: DateTime<Utc>,
        months: u32,
    ) -> Result<f64, sqlx::Error> {
        let window_start = month_start
            .checked_sub_months(Months::new(months))
            .unwrap_or(month_start);
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM lesson_schedules
            WHERE coach_id = $1
              AND lesson_status = 'completed'
              AND starts_at >= $2
              AND starts_at < $3
            "#,
        )
        .bind(coach_id)
        .bind(window_start)
        .bind(month_start)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as f64 / f64::from(months))
    }

    async fn lessons_for_month(
        &self,
        coach_id: i32,
        month_start: DateTime<Utc>,
        month_end: DateTime<Utc>,
    ) -> Result<Vec<RewardableLesson>, sqlx::Error> {
        sqlx::query_as::<_, RewardableLesson>(
            r#"
            SELECT
                s.id AS schedule_id,
                s.starts_at,
                lm.title AS lesson_title,
                stu.name AS student_name,
                lm.unit_price,
                rm.unit_price AS reward_unit_price,
                lm.is_trial
            FROM lesson_schedules s
            JOIN lesson_masters lm ON lm.id = s.lesson_master_id
            JOIN users stu ON stu.id = s.student_id
            LEFT JOIN membership_types mt ON mt.id = stu.membership_type_id
            LEFT JOIN lesson_masters rm ON rm.id = mt.reward_master_id
            WHERE s.coach_id = $1
              AND s.lesson_status = 'completed'
              AND s.starts_at >= $2
              AND s.starts_at < $3
            ORDER BY s.starts_at ASC
            "#,
        )
        .bind(coach_id)
        .bind(month_start)
        .bind(month_end)
        .fetch_all(&self.pool)
        .await
    }

    /// Report for one calendar month, evaluated with the coach's current
    /// role/override — a current-state view, not a ledger.
    pub async fn report_for_month(
        &self,
        coach_id: i32,
        year: i32,
        month: u32,
    ) -> Result<MonthlyRewardReport, RewardError> {
        let profile = self.coach_profile(coach_id).await?;
        let month_start = month_start(year, month)
            .ok_or_else(|| RewardError::InvalidMonth(format!("{year}-{month:02}")))?;
        self.report_at(&profile, month_start).await
    }

    /// Re-runs the monthly computation for each of the most recent months,
    /// applying the trailing average that held at each month.
    pub async fn history(
        &self,
        coach_id: i32,
        now: DateTime<Utc>,
    ) -> Result<Vec<MonthlyRewardReport>, RewardError> {
        let profile = self.coach_profile(coach_id).await?;
        let current = month_start(now.year(), now.month()).expect("valid current month");
        let mut reports = Vec::new();
        for back in 0..*config::REWARD_HISTORY_MONTHS {
            let start = current
                .checked_sub_months(Months::new(back))
                .expect("valid month offset");
            reports.push(self.report_at(&profile, start).await?);
        }
        Ok(reports)
    }

    async fn report_at(
        &self,
        profile: &CoachProfile,
        month_start: DateTime<Utc>,
    ) -> Result<MonthlyRewardReport, RewardError> {
        let trailing_months = *config::REWARD_TRAILING_MONTHS;
        let average = self
            .trailing_average(profile.id, month_start, trailing_months)
            .await?;
        let rate = RewardRate::resolve(&profile.role, profile.override_rate, average);
        let month_end = month_start + Months::new(1);
        let lessons = self
            .lessons_for_month(profile.id, month_start, month_end)
            .await?;
        let key = month_start.format("%Y-%m").to_string();
        Ok(monthly_report(&key, &rate, &lessons))
    }
}

pub fn month_start(year: i32, month: u32) -> Option<DateTime<Utc>> {
    let date = NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&date))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_start_rejects_invalid_months() {
        assert!(month_start(2025, 13).is_none());
        assert!(month_start(2025, 0).is_none());
        assert!(month_start(2025, 6).is_some());
    }
}
