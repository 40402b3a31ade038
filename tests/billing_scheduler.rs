use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use backend::billing::{
    execute_tick, summary_tick, BillingStatus, InvoiceItemRequest, InvoicingProvider,
    ProviderError, RefundRequest,
};
use backend::notifications::Notifier;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

// key: billing-scheduler-tests -> idempotency,partial-failure isolation

#[derive(Default)]
struct RecordingProvider {
    invoice_calls: Mutex<Vec<InvoiceItemRequest>>,
    fail_customers: Mutex<HashSet<String>>,
    fail_all: AtomicBool,
    counter: AtomicU32,
}

impl RecordingProvider {
    fn fail_for(&self, customer_ref: &str) {
        self.fail_customers
            .lock()
            .unwrap()
            .insert(customer_ref.to_string());
    }

    fn invoice_call_count(&self) -> usize {
        self.invoice_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl InvoicingProvider for RecordingProvider {
    async fn create_invoice_item(&self, req: InvoiceItemRequest) -> Result<String, ProviderError> {
        if self.fail_all.load(Ordering::SeqCst)
            || self.fail_customers.lock().unwrap().contains(&req.customer_ref)
        {
            return Err(ProviderError::Rejected("simulated provider outage".into()));
        }
        self.invoice_calls.lock().unwrap().push(req);
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("ii_test_{n}"))
    }

    async fn create_refund(&self, _req: RefundRequest) -> Result<String, ProviderError> {
        unreachable!("refunds are not exercised by scheduler tests")
    }
}

#[derive(Default)]
struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &str) -> Result<()> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

async fn seed_user(pool: &PgPool, email: &str, role: &str, customer_ref: Option<&str>) -> i32 {
    sqlx::query_scalar(
        "INSERT INTO users (name, email, role, customer_ref) VALUES ($1, $2, $3, $4) RETURNING id",
    )
    .bind(email.split('@').next().unwrap())
    .bind(email)
    .bind(role)
    .bind(customer_ref)
    .fetch_one(pool)
    .await
    .unwrap()
}

async fn seed_master(pool: &PgPool, title: &str, unit_price: i32) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO lesson_masters (id, title, unit_price) VALUES ($1, $2, $3)")
        .bind(id)
        .bind(title)
        .bind(unit_price)
        .execute(pool)
        .await
        .unwrap();
    id
}

async fn seed_schedule(
    pool: &PgPool,
    student_id: i32,
    coach_id: i32,
    master_id: Uuid,
    price: i32,
    status: BillingStatus,
    scheduled_at: Option<DateTime<Utc>>,
) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO lesson_schedules (
            id, student_id, coach_id, lesson_master_id, starts_at, price,
            is_overage, billing_status, billing_scheduled_at
        ) VALUES ($1, $2, $3, $4, $5, $6, TRUE, $7, $8)
        "#,
    )
    .bind(id)
    .bind(student_id)
    .bind(coach_id)
    .bind(master_id)
    .bind(scheduled_at.unwrap_or_else(Utc::now) + Duration::days(1))
    .bind(price)
    .bind(status)
    .bind(scheduled_at)
    .execute(pool)
    .await
    .unwrap();
    id
}

async fn billing_state(pool: &PgPool, id: Uuid) -> (BillingStatus, Option<String>, i32) {
    sqlx::query_as(
        "SELECT billing_status, invoice_item_ref, billing_attempts FROM lesson_schedules WHERE id = $1",
    )
    .bind(id)
    .fetch_one(pool)
    .await
    .unwrap()
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn execute_tick_invoices_once_even_when_rerun(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let now = Utc::now();
    let student = seed_user(&pool, "idempotent@example.com", "student", Some("cus_1")).await;
    let coach = seed_user(&pool, "coach1@example.com", "coach", None).await;
    let master = seed_master(&pool, "Beginner lesson", 6000).await;
    let schedule = seed_schedule(
        &pool,
        student,
        coach,
        master,
        6000,
        BillingStatus::Approved,
        Some(now - Duration::hours(1)),
    )
    .await;

    let provider = RecordingProvider::default();
    execute_tick(&pool, &provider, now).await.unwrap();
    execute_tick(&pool, &provider, now).await.unwrap();

    assert_eq!(provider.invoice_call_count(), 1);
    let (status, invoice_ref, _) = billing_state(&pool, schedule).await;
    assert_eq!(status, BillingStatus::Invoiced);
    assert_eq!(invoice_ref.as_deref(), Some("ii_test_1"));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn execute_tick_isolates_per_row_failures(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let now = Utc::now();
    let coach = seed_user(&pool, "coach2@example.com", "coach", None).await;
    let master = seed_master(&pool, "Beginner lesson", 6000).await;

    let mut schedules = Vec::new();
    for n in 1..=3 {
        let student = seed_user(
            &pool,
            &format!("student{n}@example.com"),
            "student",
            Some(&format!("cus_{n}")),
        )
        .await;
        let schedule = seed_schedule(
            &pool,
            student,
            coach,
            master,
            6000,
            BillingStatus::Approved,
            Some(now - Duration::minutes(n)),
        )
        .await;
        schedules.push(schedule);
    }

    let provider = RecordingProvider::default();
    provider.fail_for("cus_2");
    let outcome = execute_tick(&pool, &provider, now).await.unwrap();

    assert_eq!(outcome.invoiced, 2);
    assert_eq!(outcome.failed, 1);

    let (status_1, ref_1, _) = billing_state(&pool, schedules[0]).await;
    let (status_2, ref_2, attempts_2) = billing_state(&pool, schedules[1]).await;
    let (status_3, ref_3, _) = billing_state(&pool, schedules[2]).await;
    assert_eq!(status_1, BillingStatus::Invoiced);
    assert!(ref_1.is_some());
    // The failed row is released for retry with one attempt burned.
    assert_eq!(status_2, BillingStatus::Approved);
    assert!(ref_2.is_none());
    assert_eq!(attempts_2, 1);
    assert_eq!(status_3, BillingStatus::Invoiced);
    assert!(ref_3.is_some());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn execute_tick_parks_row_after_repeated_failures(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let now = Utc::now();
    let student = seed_user(&pool, "unlucky@example.com", "student", Some("cus_err")).await;
    let coach = seed_user(&pool, "coach3@example.com", "coach", None).await;
    let master = seed_master(&pool, "Beginner lesson", 6000).await;
    let schedule = seed_schedule(
        &pool,
        student,
        coach,
        master,
        6000,
        BillingStatus::Approved,
        Some(now - Duration::hours(1)),
    )
    .await;

    let provider = RecordingProvider::default();
    provider.fail_all.store(true, Ordering::SeqCst);
    // Default attempt budget is 3.
    for _ in 0..3 {
        execute_tick(&pool, &provider, now).await.unwrap();
    }

    let (status, invoice_ref, attempts) = billing_state(&pool, schedule).await;
    assert_eq!(status, BillingStatus::Error);
    assert!(invoice_ref.is_none());
    assert_eq!(attempts, 3);

    // A later run leaves the parked row alone.
    execute_tick(&pool, &provider, now).await.unwrap();
    let (status, _, attempts) = billing_state(&pool, schedule).await;
    assert_eq!(status, BillingStatus::Error);
    assert_eq!(attempts, 3);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn execute_tick_skips_rows_without_customer_ref(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let now = Utc::now();
    let student = seed_user(&pool, "nocustomer@example.com", "student", None).await;
    let coach = seed_user(&pool, "coach4@example.com", "coach", None).await;
    let master = seed_master(&pool, "Beginner lesson", 6000).await;
    let schedule = seed_schedule(
        &pool,
        student,
        coach,
        master,
        6000,
        BillingStatus::Approved,
        Some(now - Duration::hours(1)),
    )
    .await;

    let provider = RecordingProvider::default();
    let outcome = execute_tick(&pool, &provider, now).await.unwrap();

    assert_eq!(outcome.skipped, 1);
    assert_eq!(provider.invoice_call_count(), 0);
    let (status, invoice_ref, attempts) = billing_state(&pool, schedule).await;
    assert_eq!(status, BillingStatus::Approved);
    assert!(invoice_ref.is_none());
    assert_eq!(attempts, 0);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn execute_tick_promotes_rows_entering_the_window(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let now = Utc::now();
    let student = seed_user(&pool, "promote@example.com", "student", Some("cus_p")).await;
    let coach = seed_user(&pool, "coach5@example.com", "coach", None).await;
    let master = seed_master(&pool, "Beginner lesson", 6000).await;

    let due_pending = seed_schedule(
        &pool,
        student,
        coach,
        master,
        6000,
        BillingStatus::Pending,
        Some(now + Duration::days(3)),
    )
    .await;
    let due_future = seed_schedule(
        &pool,
        student,
        coach,
        master,
        6000,
        BillingStatus::FutureBilling,
        Some(now + Duration::days(6)),
    )
    .await;
    let far_future = seed_schedule(
        &pool,
        student,
        coach,
        master,
        6000,
        BillingStatus::FutureBilling,
        Some(now + Duration::days(30)),
    )
    .await;

    let provider = RecordingProvider::default();
    let outcome = execute_tick(&pool, &provider, now).await.unwrap();

    assert_eq!(outcome.promoted, 2);
    let (status, _, _) = billing_state(&pool, due_pending).await;
    assert_eq!(status, BillingStatus::AwaitingApproval);
    let (status, _, _) = billing_state(&pool, due_future).await;
    assert_eq!(status, BillingStatus::AwaitingApproval);
    let (status, _, _) = billing_state(&pool, far_future).await;
    assert_eq!(status, BillingStatus::FutureBilling);
    // Promotion alone never invoices anything.
    assert_eq!(provider.invoice_call_count(), 0);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn summary_tick_reports_next_day_without_mutating(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let now = Utc::now();
    let student = seed_user(&pool, "summary@example.com", "student", Some("cus_s")).await;
    let coach = seed_user(&pool, "coach6@example.com", "coach", None).await;
    let master = seed_master(&pool, "Beginner lesson", 6000).await;

    let in_window_a = seed_schedule(
        &pool,
        student,
        coach,
        master,
        6000,
        BillingStatus::Approved,
        Some(now + Duration::hours(6)),
    )
    .await;
    seed_schedule(
        &pool,
        student,
        coach,
        master,
        8000,
        BillingStatus::Approved,
        Some(now + Duration::hours(20)),
    )
    .await;
    // Outside the window and not yet approved: both excluded.
    seed_schedule(
        &pool,
        student,
        coach,
        master,
        9000,
        BillingStatus::Approved,
        Some(now + Duration::days(3)),
    )
    .await;
    seed_schedule(
        &pool,
        student,
        coach,
        master,
        9000,
        BillingStatus::AwaitingApproval,
        Some(now + Duration::hours(6)),
    )
    .await;

    let notifier = RecordingNotifier::default();
    let summary = summary_tick(&pool, &notifier, now).await.unwrap();

    assert_eq!(summary.schedule_count, 2);
    assert_eq!(summary.total_amount, 14000);

    let messages = notifier.messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("2 overage lesson(s)"));
    assert!(messages[0].contains("14000"));
    drop(messages);

    let (status, invoice_ref, _) = billing_state(&pool, in_window_a).await;
    assert_eq!(status, BillingStatus::Approved);
    assert!(invoice_ref.is_none());
}
