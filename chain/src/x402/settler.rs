//! X402Settler (§4.7): verifies a payload, submits the on-chain
//! `transferWithAuthorization` call with the gas wallet, and credits the
//! Ledger once the nonce is durably recorded.

use std::collections::HashMap;
use std::sync::Arc;

use libsecp256k1::SecretKey;
use primitive_types::U256;
use purser_common::crypto::{keccak256, EvmAddress};
use purser_ledger::{Ledger, TenantCache};
use thiserror::Error;

use crate::network::NetworkRegistry;
use crate::pricing::{PricingService, TenantBillingDetails};
use crate::rpc::{EvmRpcClient, LegacyTransaction, RpcError};
use crate::signing::sign_legacy_transaction;
use crate::x402::nonce_repo::X402NonceRepository;
use crate::x402::verifier::X402Verifier;
use crate::x402::X402Payload;

/// Fixed gas limit for the `transferWithAuthorization` call. USDC's
/// implementation comfortably fits under this on every supported network.
const GAS_LIMIT: u64 = 150_000;

#[derive(Debug, Error)]
pub enum SettleError {
    #[error("payload rejected: {0}")]
    Rejected(String),
    #[error("settlement simulation reverted: {0}")]
    SimulationFailed(String),
    #[error("nonce {0} was already settled for a different tenant or amount")]
    NonceReplayMismatch(String),
    #[error(transparent)]
    Purser(#[from] purser_common::PurserError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

#[derive(Debug, Clone)]
pub struct SettleOutcome {
    pub tx_hash: Option<String>,
    pub amount_cents: i64,
    pub is_auth_only: bool,
    /// True when this call returned the result of an earlier, already
    /// on-chain-submitted settlement rather than submitting a new one.
    pub idempotent_replay: bool,
}

pub struct X402Settler {
    verifier: Arc<X402Verifier>,
    nonce_repo: Arc<dyn X402NonceRepository>,
    ledger: Arc<Ledger>,
    pricing: Arc<PricingService>,
    tenant_cache: Arc<dyn TenantCache>,
    rpc_clients: HashMap<String, EvmRpcClient>,
    gas_wallet_key: SecretKey,
    gas_wallet_address: EvmAddress,
}

impl X402Settler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        verifier: Arc<X402Verifier>,
        nonce_repo: Arc<dyn X402NonceRepository>,
        ledger: Arc<Ledger>,
        pricing: Arc<PricingService>,
        tenant_cache: Arc<dyn TenantCache>,
        rpc_clients: HashMap<String, EvmRpcClient>,
        gas_wallet_key: SecretKey,
        gas_wallet_address: EvmAddress,
    ) -> Self {
        Self {
            verifier,
            nonce_repo,
            ledger,
            pricing,
            tenant_cache,
            rpc_clients,
            gas_wallet_key,
            gas_wallet_address,
        }
    }

    pub async fn settle(
        &self,
        tenant_id: &str,
        payload: &X402Payload,
        now_unix: u64,
        tenant_billing_details: Option<&TenantBillingDetails>,
    ) -> Result<SettleOutcome, SettleError> {
        let verification = self.verifier.verify(payload, now_unix, tenant_billing_details).await;
        if !verification.valid {
            return Err(SettleError::Rejected(verification.error.unwrap_or_else(|| "rejected".to_string())));
        }
        if verification.requires_billing_details {
            return Err(SettleError::Rejected("billing details required above threshold".to_string()));
        }
        if verification.is_auth_only {
            return Ok(SettleOutcome {
                tx_hash: None,
                amount_cents: 0,
                is_auth_only: true,
                idempotent_replay: false,
            });
        }

        let Some(network) = NetworkRegistry::by_name(&payload.network) else {
            return Err(SettleError::Rejected("unknown network".to_string()));
        };
        let Some(rpc) = self.rpc_clients.get(&payload.network) else {
            return Err(SettleError::Rejected(format!("no rpc client configured for {}", payload.network)));
        };
        let usdc = EvmAddress::parse(network.usdc_contract).expect("network registry holds a valid address");
        let calldata = encode_transfer_with_authorization(payload);

        rpc.eth_call(usdc.0, &calldata)
            .await
            .map_err(|e| SettleError::SimulationFailed(e.to_string()))?;

        let nonce = rpc.eth_get_transaction_count(self.gas_wallet_address.0, "pending").await?;
        let gas_price = rpc.eth_gas_price().await?;
        let tx = LegacyTransaction {
            nonce,
            gas_price,
            gas_limit: GAS_LIMIT,
            to: usdc.0,
            value: U256::zero(),
            data: calldata,
            chain_id: network.chain_id,
        };
        let (raw, _computed_hash) = sign_legacy_transaction(&tx, &self.gas_wallet_key);
        let tx_hash = rpc.eth_send_raw_transaction(&raw).await?;

        let nonce_hex = format!("0x{}", hex::encode(payload.authorization.nonce));
        let payer_hex = payload.authorization.from.to_string();
        let amount_eur_cents = self.pricing.usdc_cents_to_eur_cents(verification.amount_cents).await?;

        let upsert = self
            .nonce_repo
            .upsert_pending(&payload.network, &payer_hex, &nonce_hex, &tx_hash, tenant_id, amount_eur_cents)
            .await?;

        if !upsert.inserted {
            if upsert.tenant_id_matches && upsert.amount_matches {
                return Ok(SettleOutcome {
                    tx_hash: Some(upsert.tx_hash),
                    amount_cents: amount_eur_cents,
                    is_auth_only: false,
                    idempotent_replay: true,
                });
            }
            return Err(SettleError::NonceReplayMismatch(nonce_hex));
        }

        self.ledger
            .credit(tenant_id, "EUR", amount_eur_cents, "x402_payment", &tx_hash, "x402 micropayment")
            .await?;
        self.tenant_cache.invalidate(tenant_id).await;

        Ok(SettleOutcome {
            tx_hash: Some(tx_hash),
            amount_cents: amount_eur_cents,
            is_auth_only: false,
            idempotent_replay: false,
        })
    }
}

/// ABI-encodes `transferWithAuthorization(address,address,uint256,uint256,uint256,bytes32,uint8,bytes32,bytes32)`.
fn encode_transfer_with_authorization(payload: &X402Payload) -> Vec<u8> {
    let auth = &payload.authorization;
    let selector = &keccak256(
        b"transferWithAuthorization(address,address,uint256,uint256,uint256,bytes32,uint8,bytes32,bytes32)",
    )[..4];
    let mut out = Vec::with_capacity(4 + 32 * 9);
    out.extend_from_slice(selector);
    out.extend_from_slice(&pad_address(auth.from));
    out.extend_from_slice(&pad_address(auth.to));
    out.extend_from_slice(&pad_u128(auth.value));
    out.extend_from_slice(&pad_u64(auth.valid_after));
    out.extend_from_slice(&pad_u64(auth.valid_before));
    out.extend_from_slice(&auth.nonce);
    out.extend_from_slice(&pad_u64(payload.signature_v as u64));
    out.extend_from_slice(&payload.signature_r);
    out.extend_from_slice(&payload.signature_s);
    out
}

fn pad_address(addr: EvmAddress) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[12..].copy_from_slice(addr.0.as_bytes());
    out
}

fn pad_u128(value: u128) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[16..].copy_from_slice(&value.to_be_bytes());
    out
}

fn pad_u64(value: u64) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[24..].copy_from_slice(&value.to_be_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x402::X402Authorization;

    #[test]
    fn calldata_has_the_expected_abi_length() {
        let payload = X402Payload {
            x402_version: 1,
            scheme: "exact".to_string(),
            network: "base".to_string(),
            signature_r: [1u8; 32],
            signature_s: [2u8; 32],
            signature_v: 27,
            authorization: X402Authorization {
                from: EvmAddress::parse("0x0000000000000000000000000000000000dead").unwrap(),
                to: EvmAddress::parse("0x0000000000000000000000000000000000beef").unwrap(),
                value: 1_000_000,
                valid_after: 0,
                valid_before: 9_999_999_999,
                nonce: [3u8; 32],
            },
        };
        let calldata = encode_transfer_with_authorization(&payload);
        assert_eq!(calldata.len(), 4 + 32 * 9);
        assert_eq!(&calldata[..4], &keccak256(
            b"transferWithAuthorization(address,address,uint256,uint256,uint256,bytes32,uint8,bytes32,bytes32)",
        )[..4]);
    }
}
