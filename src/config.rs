use once_cell::sync::Lazy;

/// Secret used for JWT signing. Must be set via the `JWT_SECRET` env variable.
pub static JWT_SECRET: Lazy<String> =
    Lazy::new(|| std::env::var("JWT_SECRET").expect("JWT_SECRET must be set"));

/// Address the HTTP server should bind to. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

/// Port the HTTP server should listen on. Defaults to `3000`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3000)
});

/// When set to a truthy value, allows the application to continue running even if database
/// migrations fail. Defaults to `false`.
pub static ALLOW_MIGRATION_FAILURE: Lazy<bool> = Lazy::new(|| {
    std::env::var("ALLOW_MIGRATION_FAILURE")
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes")
        })
        .unwrap_or(false)
});

/// key: billing-config -> shared secret expected by the scheduler trigger endpoints
pub static SCHEDULER_SHARED_SECRET: Lazy<Option<String>> =
    Lazy::new(|| read_optional_env("SCHEDULER_SHARED_SECRET"));

/// key: billing-config -> how far ahead rows become eligible for approval
pub static BILLING_APPROVAL_WINDOW_DAYS: Lazy<i64> = Lazy::new(|| {
    std::env::var("BILLING_APPROVAL_WINDOW_DAYS")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(7)
});

/// key: billing-config -> provider failures tolerated before a row is parked as `error`
pub static BILLING_EXECUTE_MAX_ATTEMPTS: Lazy<i32> = Lazy::new(|| {
    std::env::var("BILLING_EXECUTE_MAX_ATTEMPTS")
        .ok()
        .and_then(|value| value.parse::<i32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(3)
});

/// key: billing-config -> currency code sent to the payment provider
pub static BILLING_CURRENCY: Lazy<String> =
    Lazy::new(|| std::env::var("BILLING_CURRENCY").unwrap_or_else(|_| "jpy".to_string()));

/// Secret API key for the payment provider.
pub static STRIPE_SECRET_KEY: Lazy<Option<String>> =
    Lazy::new(|| read_optional_env("STRIPE_SECRET_KEY"));

/// Base URL of the payment provider API. Overridable for tests.
pub static STRIPE_API_BASE: Lazy<String> = Lazy::new(|| {
    std::env::var("STRIPE_API_BASE")
        .ok()
        .map(|value| value.trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "https://api.stripe.com".to_string())
});

/// Shared secret for verifying inbound payment webhook signatures. When unset,
/// signature verification is skipped (local development only).
pub static PAYMENT_WEBHOOK_SECRET: Lazy<Option<String>> =
    Lazy::new(|| read_optional_env("PAYMENT_WEBHOOK_SECRET"));

/// Webhook URL the daily billing summary is posted to.
pub static NOTIFICATION_WEBHOOK_URL: Lazy<Option<String>> =
    Lazy::new(|| read_optional_env("NOTIFICATION_WEBHOOK_URL"));

/// key: reward-config -> trailing window used to derive a coach's rank
pub static REWARD_TRAILING_MONTHS: Lazy<u32> = Lazy::new(|| {
    std::env::var("REWARD_TRAILING_MONTHS")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(3)
});

/// key: reward-config -> how many months the historical report endpoint covers
pub static REWARD_HISTORY_MONTHS: Lazy<u32> = Lazy::new(|| {
    std::env::var("REWARD_HISTORY_MONTHS")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(6)
});

fn read_optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
