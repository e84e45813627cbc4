use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use purser_common::webhook::WebhookSignatureError;
use purser_common::{ApiError, PurserError};
use serde::Deserialize;

use crate::context::AppContext;

pub async fn stripe(ctx: web::Data<AppContext>, req: HttpRequest, body: web::Bytes) -> HttpResponse {
    let Some(signature) = req.headers().get("Stripe-Signature").and_then(|v| v.to_str().ok()) else {
        return super::api_error_response(&ApiError::bad_request("missing Stripe-Signature header"));
    };
    let Ok(raw_body) = std::str::from_utf8(&body) else {
        return super::api_error_response(&ApiError::bad_request("non-utf8 request body"));
    };

    match ctx.webhook.handle_stripe_webhook(raw_body, signature, Utc::now().timestamp()).await {
        Ok(()) => HttpResponse::Ok().finish(),
        Err(e) => super::api_error_response(&to_api_error(e)),
    }
}

#[derive(Debug, Deserialize)]
pub struct MolliePayload {
    id: String,
}

pub async fn mollie(ctx: web::Data<AppContext>, form: web::Form<MolliePayload>) -> HttpResponse {
    match ctx.webhook.handle_mollie_webhook(&form.id).await {
        Ok(()) => HttpResponse::Ok().finish(),
        Err(e) => super::api_error_response(&to_api_error(e)),
    }
}

/// Maps every `WebhookError` variant to a wire-level status. Signature
/// failures don't all mean the same thing: a missing secret is a server
/// misconfiguration (503), while a malformed, mismatched, or stale
/// signature means the request itself is untrusted (401) — neither is
/// the generic "bad request" 400 that `PurserError::PermanentExternal`
/// would otherwise produce.
fn to_api_error(err: purser_checkout::WebhookError) -> ApiError {
    use purser_checkout::WebhookError;
    let description = err.to_string();
    match err {
        WebhookError::Purser(e) => ApiError::from(&e),
        WebhookError::Signature(WebhookSignatureError::MissingSecret) => {
            ApiError::from(&PurserError::Configuration("STRIPE_WEBHOOK_SECRET not configured".to_string()))
        }
        WebhookError::Signature(WebhookSignatureError::Malformed | WebhookSignatureError::Mismatch | WebhookSignatureError::StaleTimestamp) => {
            ApiError::unauthorized(description)
        }
        WebhookError::Malformed(msg) => ApiError::bad_request(msg),
        WebhookError::TenantMismatch => ApiError::from(&PurserError::IntegrityViolation(description)),
        WebhookError::Provider(e) => ApiError::from(&PurserError::transient("checkout_provider", e)),
    }
}
