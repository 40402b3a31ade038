pub mod adapters;
pub mod api;
pub mod limits;
pub mod models;
pub mod refunds;
pub mod scheduler;
pub mod service;
pub mod state;

pub use adapters::{InvoiceItemRequest, InvoicingProvider, ProviderError, RefundRequest,
    StripeInvoicingAdapter};
pub use models::{BillingSummary, InvoiceCandidate, LessonMaster, LessonSchedule, MembershipType,
    RefundScope};
pub use refunds::RefundProcessor;
pub use scheduler::{execute_tick, summary_tick, ExecuteOutcome};
pub use service::{BillingActionError, BillingService, NewSchedule};
pub use state::{due_transition, BillingStatus, DueTransition};
