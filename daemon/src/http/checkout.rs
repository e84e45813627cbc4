use actix_web::{web, HttpResponse};
use purser_checkout::{CheckoutPurpose, CheckoutRequest};
use purser_common::ApiError;
use serde::Deserialize;

use crate::context::AppContext;

#[derive(Debug, Deserialize)]
pub struct CreateCheckoutRequest {
    pub tenant_id: String,
    pub provider: String,
    pub purpose: CheckoutPurpose,
    pub reference_id: String,
    pub cluster_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
}

pub async fn create_checkout(ctx: web::Data<AppContext>, body: web::Json<CreateCheckoutRequest>) -> HttpResponse {
    let provider = match body.provider.as_str() {
        "stripe" => purser_checkout::PaymentProvider::Stripe,
        "mollie" => purser_checkout::PaymentProvider::Mollie,
        other => return super::api_error_response(&ApiError::bad_request(format!("unknown provider: {other}"))),
    };

    let request = CheckoutRequest {
        tenant_id: body.tenant_id.clone(),
        purpose: body.purpose,
        reference_id: body.reference_id.clone(),
        cluster_id: body.cluster_id.clone(),
        amount_cents: body.amount_cents,
        currency: body.currency.clone(),
        success_url: body.success_url.clone(),
        cancel_url: body.cancel_url.clone(),
    };

    match ctx.checkout.create_checkout(provider, &request).await {
        Ok(session) => HttpResponse::Ok().json(serde_json::json!({
            "checkout_url": session.checkout_url,
            "session_id": session.session_id,
            "expires_at": session.expires_at,
        })),
        Err(e) => super::api_error_response(&ApiError::bad_request(e.to_string())),
    }
}
