use axum::{body::Bytes, extract::Extension, http::HeaderMap, http::StatusCode};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::billing::BillingService;
use crate::config;
use crate::error::{AppError, AppResult};

/// key: webhooks-payment -> inbound payment confirmation
///
/// The payment provider's webhook is normalized upstream into this envelope.
#[derive(Debug, Deserialize)]
pub struct PaymentWebhookRequest {
    pub event: String,
    pub schedule_id: Uuid,
    pub payment_intent: String,
}

pub async fn payment_webhook(
    Extension(pool): Extension<PgPool>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<StatusCode> {
    if let Some(secret) = config::PAYMENT_WEBHOOK_SECRET.as_deref() {
        let signature = headers
            .get("x-webhook-signature")
            .and_then(|value| value.to_str().ok())
            .ok_or(AppError::Unauthorized)?;
        if !verify_signature(secret, &body, signature) {
            return Err(AppError::Unauthorized);
        }
    }

    let payload: PaymentWebhookRequest = serde_json::from_slice(&body)
        .map_err(|err| AppError::BadRequest(format!("malformed webhook payload: {err}")))?;

    match payload.event.as_str() {
        "payment.succeeded" => {
            let service = BillingService::new(pool);
            let updated = service
                .mark_paid(payload.schedule_id, &payload.payment_intent)
                .await?;
            if updated {
                info!(
                    schedule = %payload.schedule_id,
                    payment_intent = %payload.payment_intent,
                    "schedule marked paid"
                );
            } else {
                // Redelivery or a row that never reached `invoiced`.
                warn!(
                    schedule = %payload.schedule_id,
                    "payment confirmation did not apply; row not in invoiced state"
                );
            }
            Ok(StatusCode::ACCEPTED)
        }
        _ => Ok(StatusCode::ACCEPTED),
    }
}

fn verify_signature(secret: &str, payload: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(payload);
    mac.verify_slice(&signature).is_ok()
}
