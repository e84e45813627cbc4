use actix_web::{web, HttpResponse};
use chrono::Utc;
use purser_chain::x402::{X402Authorization, X402Payload};
use purser_common::crypto::EvmAddress;
use purser_common::ApiError;
use serde::Deserialize;

use crate::context::AppContext;

#[derive(Debug, Deserialize)]
pub struct X402Request {
    pub tenant_id: String,
    pub x402_version: u8,
    pub scheme: String,
    pub network: String,
    pub signature: String,
    pub authorization: X402AuthorizationDto,
}

#[derive(Debug, Deserialize)]
pub struct X402AuthorizationDto {
    pub from: String,
    pub to: String,
    pub value: String,
    pub valid_after: u64,
    pub valid_before: u64,
    pub nonce: String,
}

fn parse_payload(req: &X402Request) -> Result<X402Payload, ApiError> {
    let from = EvmAddress::parse(&req.authorization.from).map_err(|e| ApiError::bad_request(e.to_string()))?;
    let to = EvmAddress::parse(&req.authorization.to).map_err(|e| ApiError::bad_request(e.to_string()))?;
    let value: u128 = req.authorization.value.parse().map_err(|_| ApiError::bad_request("value is not a valid integer"))?;

    let nonce_bytes = hex::decode(req.authorization.nonce.trim_start_matches("0x"))
        .map_err(|_| ApiError::bad_request("nonce is not valid hex"))?;
    let mut nonce = [0u8; 32];
    if nonce_bytes.len() != 32 {
        return Err(ApiError::bad_request("nonce must be 32 bytes"));
    }
    nonce.copy_from_slice(&nonce_bytes);

    let sig_bytes = hex::decode(req.signature.trim_start_matches("0x")).map_err(|_| ApiError::bad_request("signature is not valid hex"))?;
    if sig_bytes.len() != 65 {
        return Err(ApiError::bad_request("signature must be 65 bytes (r || s || v)"));
    }
    let mut signature_r = [0u8; 32];
    let mut signature_s = [0u8; 32];
    signature_r.copy_from_slice(&sig_bytes[0..32]);
    signature_s.copy_from_slice(&sig_bytes[32..64]);
    let signature_v = sig_bytes[64];

    Ok(X402Payload {
        x402_version: req.x402_version,
        scheme: req.scheme.clone(),
        network: req.network.clone(),
        signature_r,
        signature_s,
        signature_v,
        authorization: X402Authorization {
            from,
            to,
            value,
            valid_after: req.authorization.valid_after,
            valid_before: req.authorization.valid_before,
            nonce,
        },
    })
}

pub async fn verify(ctx: web::Data<AppContext>, body: web::Json<X402Request>) -> HttpResponse {
    let Some(verifier) = ctx.x402_verifier.as_ref() else {
        return super::api_error_response(&ApiError::service_unavailable("x402 is not configured on this deployment"));
    };
    let payload = match parse_payload(&body) {
        Ok(p) => p,
        Err(e) => return super::api_error_response(&e),
    };
    let outcome = verifier.verify(&payload, Utc::now().timestamp() as u64, None).await;
    HttpResponse::Ok().json(serde_json::json!({
        "valid": outcome.valid,
        "payer_address": outcome.payer_address.map(|a| a.to_string()),
        "amount_cents": outcome.amount_cents,
        "is_auth_only": outcome.is_auth_only,
        "requires_billing_details": outcome.requires_billing_details,
        "error": outcome.error,
    }))
}

pub async fn settle(ctx: web::Data<AppContext>, body: web::Json<X402Request>) -> HttpResponse {
    let Some(settler) = ctx.x402_settler.as_ref() else {
        return super::api_error_response(&ApiError::service_unavailable("x402 settlement is not configured on this deployment"));
    };
    let payload = match parse_payload(&body) {
        Ok(p) => p,
        Err(e) => return super::api_error_response(&e),
    };
    match settler.settle(&body.tenant_id, &payload, Utc::now().timestamp() as u64, None).await {
        Ok(outcome) => HttpResponse::Ok().json(serde_json::json!({
            "tx_hash": outcome.tx_hash,
            "amount_cents": outcome.amount_cents,
            "is_auth_only": outcome.is_auth_only,
            "idempotent_replay": outcome.idempotent_replay,
        })),
        Err(e) => super::api_error_response(&ApiError::bad_request(e.to_string())),
    }
}
