use serde::{Deserialize, Serialize};

/// Special override value historically used for one legacy contract: the
/// coach is displayed as Owner tier and receives the boosted trial bonus, but
/// keeps the override value as the commission rate. Classified exactly once,
/// in [`RewardRate::resolve`]; everything downstream matches on the variant.
pub const SPECIAL_EXCEPTION_RATE: f64 = 0.72;
const SPECIAL_EXCEPTION_TOLERANCE: f64 = 1e-7;

/// Fixed trial-lesson commission, in yen.
pub const TRIAL_REWARD: i64 = 1000;
/// Boosted trial commission for the special-exception contract.
pub const TRIAL_REWARD_SPECIAL: i64 = 1500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RewardRank {
    Standard,
    Bronze,
    Silver,
    Gold,
    Platinum,
    Owner,
}

impl RewardRank {
    pub fn label(&self) -> &'static str {
        match self {
            RewardRank::Standard => "Standard",
            RewardRank::Bronze => "Bronze",
            RewardRank::Silver => "Silver",
            RewardRank::Gold => "Gold",
            RewardRank::Platinum => "Platinum",
            RewardRank::Owner => "Owner",
        }
    }

    /// Commission rate the tier table assigns to this rank.
    pub fn base_rate(&self) -> f64 {
        match self {
            RewardRank::Standard => 0.50,
            RewardRank::Bronze => 0.55,
            RewardRank::Silver => 0.60,
            RewardRank::Gold => 0.65,
            RewardRank::Platinum => 0.70,
            RewardRank::Owner => 1.0,
        }
    }
}

impl std::fmt::Display for RewardRank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Tier table over the trailing monthly lesson average. Boundaries are
/// inclusive at the lower bound.
pub fn rank_for_trailing_average(average: f64) -> RewardRank {
    if average >= 30.0 {
        RewardRank::Platinum
    } else if average >= 25.0 {
        RewardRank::Gold
    } else if average >= 20.0 {
        RewardRank::Silver
    } else if average >= 15.0 {
        RewardRank::Bronze
    } else {
        RewardRank::Standard
    }
}

/// Re-derives a display rank from an override's numeric value, using the
/// rate column of the same tier table.
pub fn rank_for_rate(rate: f64) -> RewardRank {
    if rate >= 1.0 {
        RewardRank::Owner
    } else if rate >= 0.70 {
        RewardRank::Platinum
    } else if rate >= 0.65 {
        RewardRank::Gold
    } else if rate >= 0.60 {
        RewardRank::Silver
    } else if rate >= 0.55 {
        RewardRank::Bronze
    } else {
        RewardRank::Standard
    }
}

/// key: reward-rate -> resolved commission basis for one coach and period
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RewardRate {
    /// Role `admin`: rate 1.0, regardless of override or averages.
    Owner,
    /// No override: rank from the trailing average, rate from the tier table.
    Tiered { rank: RewardRank },
    /// Admin-set override: the value is the rate, the rank is re-derived
    /// from the value for display.
    Override { rank: RewardRank, rate: f64 },
    /// See [`SPECIAL_EXCEPTION_RATE`].
    SpecialException { rate: f64 },
}

impl RewardRate {
    pub fn resolve(role: &str, override_rate: Option<f64>, trailing_average: f64) -> Self {
        if role == "admin" {
            return RewardRate::Owner;
        }
        match override_rate {
            Some(rate) if (rate - SPECIAL_EXCEPTION_RATE).abs() < SPECIAL_EXCEPTION_TOLERANCE => {
                RewardRate::SpecialException { rate }
            }
            Some(rate) => RewardRate::Override {
                rank: rank_for_rate(rate),
                rate,
            },
            None => RewardRate::Tiered {
                rank: rank_for_trailing_average(trailing_average),
            },
        }
    }

    pub fn rate(&self) -> f64 {
        match self {
            RewardRate::Owner => 1.0,
            RewardRate::Tiered { rank } => rank.base_rate(),
            RewardRate::Override { rate, .. } => *rate,
            RewardRate::SpecialException { rate } => *rate,
        }
    }

    pub fn rank(&self) -> RewardRank {
        match self {
            RewardRate::Owner => RewardRank::Owner,
            RewardRate::Tiered { rank } => *rank,
            RewardRate::Override { rank, .. } => *rank,
            // Displayed as Owner tier; the numeric rate stays the override.
            RewardRate::SpecialException { .. } => RewardRank::Owner,
        }
    }

    pub fn trial_reward(&self) -> i64 {
        match self {
            RewardRate::SpecialException { .. } => TRIAL_REWARD_SPECIAL,
            _ => TRIAL_REWARD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_boundaries_are_inclusive_at_lower_bound() {
        let cases = [
            (14.0, 0.50),
            (15.0, 0.55),
            (19.0, 0.55),
            (20.0, 0.60),
            (24.0, 0.60),
            (25.0, 0.65),
            (29.0, 0.65),
            (30.0, 0.70),
        ];
        for (average, expected_rate) in cases {
            let rank = rank_for_trailing_average(average);
            assert_eq!(
                rank.base_rate(),
                expected_rate,
                "average {average} mapped to {rank}"
            );
        }
    }

    #[test]
    fn override_takes_precedence_over_trailing_average() {
        // An average of 10 would otherwise be Standard/0.50.
        let rate = RewardRate::resolve("coach", Some(0.65), 10.0);
        assert_eq!(rate.rate(), 0.65);
        assert_eq!(rate.rank(), RewardRank::Gold);
    }

    #[test]
    fn admin_role_short_circuits_everything() {
        let rate = RewardRate::resolve("admin", Some(0.55), 40.0);
        assert_eq!(rate, RewardRate::Owner);
        assert_eq!(rate.rate(), 1.0);
        assert_eq!(rate.rank(), RewardRank::Owner);
    }

    #[test]
    fn override_at_or_above_one_is_owner_rank() {
        let rate = RewardRate::resolve("coach", Some(1.0), 0.0);
        assert_eq!(rate.rank(), RewardRank::Owner);
        assert_eq!(rate.rate(), 1.0);
    }

    #[test]
    fn special_exception_keeps_override_rate_with_owner_label() {
        let rate = RewardRate::resolve("coach", Some(SPECIAL_EXCEPTION_RATE), 0.0);
        assert!(matches!(rate, RewardRate::SpecialException { .. }));
        assert_eq!(rate.rank(), RewardRank::Owner);
        assert_eq!(rate.rate(), SPECIAL_EXCEPTION_RATE);
        assert_eq!(rate.trial_reward(), TRIAL_REWARD_SPECIAL);
    }

    #[test]
    fn special_exception_tolerates_float_drift() {
        let rate = RewardRate::resolve("coach", Some(SPECIAL_EXCEPTION_RATE + 5e-8), 0.0);
        assert!(matches!(rate, RewardRate::SpecialException { .. }));
    }

    #[test]
    fn nearby_override_is_a_plain_override() {
        let rate = RewardRate::resolve("coach", Some(0.721), 0.0);
        assert!(matches!(rate, RewardRate::Override { .. }));
        assert_eq!(rate.trial_reward(), TRIAL_REWARD);
    }

    #[test]
    fn no_override_falls_back_to_tier_table() {
        let rate = RewardRate::resolve("coach", None, 26.5);
        assert_eq!(rate.rank(), RewardRank::Gold);
        assert_eq!(rate.rate(), 0.65);
    }
}
