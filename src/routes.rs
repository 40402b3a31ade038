use axum::{routing::post, Router};

use crate::{billing, rewards, webhooks};

pub fn api_routes() -> Router {
    Router::new()
        .merge(billing::api::routes())
        .merge(rewards::api::routes())
        .route("/api/webhooks/payment", post(webhooks::payment_webhook))
}
