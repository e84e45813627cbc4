//! Usage ingestion (§4.1 `deductForUsage`). The upstream metering service is
//! an opaque stream (§1 Non-goals); this endpoint is the one inbound
//! surface that translates an already-rated usage summary into a ledger
//! debit.

use actix_web::{web, HttpResponse};
use purser_common::ApiError;
use serde::Deserialize;

use crate::context::AppContext;

#[derive(Debug, Deserialize)]
pub struct UsageSummary {
    pub tenant_id: String,
    pub currency: String,
    pub amount_cents: i64,
    pub reference_id: String,
    pub description: String,
}

pub async fn record_usage(ctx: web::Data<AppContext>, body: web::Json<UsageSummary>) -> HttpResponse {
    match ctx
        .ledger
        .deduct_for_usage(&body.tenant_id, &body.currency, body.amount_cents, &body.reference_id, &body.description)
        .await
    {
        Ok(outcome) => HttpResponse::Ok().json(serde_json::json!({
            "new_balance_cents": outcome.new_balance_cents,
            "applied": outcome.applied,
        })),
        Err(e) => super::api_error_response(&ApiError::from(&e)),
    }
}
