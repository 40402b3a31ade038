use chrono::{DateTime, Days, TimeZone, Utc};

use super::models::MembershipType;

/// Plans carrying this marker in their display name bill every lesson
/// separately, regardless of counts. Business convention.
pub const SINGLE_USE_MARKER: &str = "single-use";

/// key: billing-limits -> monthly entitlement decision
///
/// `completed` and `scheduled` are the student's lesson counts for the
/// calendar month containing the candidate lesson, excluding the candidate
/// itself: the lesson that reaches the limit is still inside quota, the one
/// after it is overage.
pub fn is_overage(membership: &MembershipType, completed: i64, scheduled: i64) -> bool {
    if membership.name.contains(SINGLE_USE_MARKER) {
        return true;
    }
    if membership.monthly_limit <= 0 {
        return false;
    }
    completed + scheduled >= i64::from(membership.monthly_limit)
}

/// Overage invoices are executed at noon the day before the lesson.
pub fn billing_time_for(lesson_start: DateTime<Utc>) -> DateTime<Utc> {
    let day_before = lesson_start.date_naive() - Days::new(1);
    Utc.from_utc_datetime(&day_before.and_hms_opt(12, 0, 0).unwrap())
}
