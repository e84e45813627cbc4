//! x402 micropayment settlement engine (§4.6, §4.7).

pub mod nonce_repo;
pub mod reconciler;
pub mod settler;
pub mod verifier;

use purser_common::crypto::EvmAddress;

/// The EIP-3009 authorization payload carried in an x402 request.
#[derive(Debug, Clone)]
pub struct X402Authorization {
    pub from: EvmAddress,
    pub to: EvmAddress,
    pub value: u128,
    pub valid_after: u64,
    pub valid_before: u64,
    pub nonce: [u8; 32],
}

#[derive(Debug, Clone)]
pub struct X402Payload {
    pub x402_version: u8,
    pub scheme: String,
    pub network: String,
    pub signature_r: [u8; 32],
    pub signature_s: [u8; 32],
    pub signature_v: u8,
    pub authorization: X402Authorization,
}

#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub valid: bool,
    pub payer_address: Option<EvmAddress>,
    pub amount_cents: i64,
    pub is_auth_only: bool,
    pub requires_billing_details: bool,
    pub error: Option<String>,
}

impl VerifyOutcome {
    fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            payer_address: None,
            amount_cents: 0,
            is_auth_only: false,
            requires_billing_details: false,
            error: Some(error.into()),
        }
    }
}
