use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use super::rank::RewardRate;

/// One completed lesson, flattened at the store boundary: the lesson master,
/// the student, and the membership's optional reward master are already
/// joined in, so the calculator never touches the database.
#[derive(Debug, Clone, FromRow)]
pub struct RewardableLesson {
    pub schedule_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub lesson_title: String,
    pub student_name: String,
    pub unit_price: i32,
    /// Alternate unit price designated by the student's membership type,
    /// used only for commission math.
    pub reward_unit_price: Option<i32>,
    pub is_trial: bool,
}

impl RewardableLesson {
    /// Commission base: the membership's reward master wins over the lesson
    /// master's own price.
    fn base_price(&self) -> i64 {
        i64::from(self.reward_unit_price.unwrap_or(self.unit_price))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RewardLine {
    pub date: DateTime<Utc>,
    pub lesson_title: String,
    pub student_name: String,
    pub price: i64,
    pub reward: i64,
}

/// Derived report, computed on demand — deliberately a current-state view,
/// never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct MonthlyRewardReport {
    pub month: String,
    pub rank: String,
    pub rate: f64,
    pub lesson_count: usize,
    pub total_sales: i64,
    pub total_reward: i64,
    pub lines: Vec<RewardLine>,
}

/// Per-lesson commission. Trial lessons pay a fixed amount; everything else
/// pays `floor(base price * rate)`.
pub fn lesson_reward(rate: &RewardRate, lesson: &RewardableLesson) -> RewardLine {
    let price = lesson.base_price();
    let reward = if lesson.is_trial {
        rate.trial_reward()
    } else {
        (price as f64 * rate.rate()).floor() as i64
    };
    RewardLine {
        date: lesson.starts_at,
        lesson_title: lesson.lesson_title.clone(),
        student_name: lesson.student_name.clone(),
        price,
        reward,
    }
}

pub fn monthly_report(
    month: &str,
    rate: &RewardRate,
    lessons: &[RewardableLesson],
) -> MonthlyRewardReport {
    let lines: Vec<RewardLine> = lessons.iter().map(|l| lesson_reward(rate, l)).collect();
    let total_sales = lines.iter().map(|l| l.price).sum();
    let total_reward = lines.iter().map(|l| l.reward).sum();
    MonthlyRewardReport {
        month: month.to_string(),
        rank: rate.rank().label().to_string(),
        rate: rate.rate(),
        lesson_count: lines.len(),
        total_sales,
        total_reward,
        lines,
    }
}
