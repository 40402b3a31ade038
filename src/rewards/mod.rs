pub mod api;
pub mod calculator;
pub mod rank;
pub mod service;

pub use calculator::{lesson_reward, monthly_report, MonthlyRewardReport, RewardLine,
    RewardableLesson};
pub use rank::{rank_for_rate, rank_for_trailing_average, RewardRank, RewardRate};
pub use service::{CoachProfile, RewardError, RewardService};
