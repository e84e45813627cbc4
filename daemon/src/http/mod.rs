//! HTTP surface: checkout creation, provider webhook ingress, x402
//! verify/settle, and usage ingestion. Composed at the boundary with a
//! stable `ApiError` (§7 error taxonomy) rather than leaking internal error
//! enums to callers.

pub mod checkout;
pub mod usage;
pub mod webhooks;
pub mod x402;

use actix_web::{web, HttpResponse};
use purser_common::ApiError;

pub fn api_error_response(error: &ApiError) -> HttpResponse {
    HttpResponse::build(actix_web::http::StatusCode::from_u16(error.status).unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR))
        .json(error)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/checkout").route(web::post().to(checkout::create_checkout)))
        .service(web::resource("/webhooks/stripe").route(web::post().to(webhooks::stripe)))
        .service(web::resource("/webhooks/mollie").route(web::post().to(webhooks::mollie)))
        .service(web::resource("/x402/verify").route(web::post().to(x402::verify)))
        .service(web::resource("/x402/settle").route(web::post().to(x402::settle)))
        .service(web::resource("/usage").route(web::post().to(usage::record_usage)));
}
