//! X402Verifier (§4.6): validates an x402 payload without ever writing
//! state; every failure path returns `valid=false` rather than throwing.

use std::sync::Arc;

use purser_common::crypto::{eip712_domain_separator, keccak256, recover_address, CryptoError, EvmAddress, TransferWithAuthorization};
use purser_common::PurserResult;

use crate::network::NetworkRegistry;
use crate::pricing::{PricingService, TenantBillingDetails};
use crate::rpc::EvmRpcClient;
use crate::x402::nonce_repo::X402NonceRepository;
use crate::x402::{VerifyOutcome, X402Payload};

const USDC_DOMAIN_NAME: &str = "USD Coin";
const USDC_DOMAIN_VERSION: &str = "2";
const X402_BILLING_DETAILS_THRESHOLD_EUR_CENTS: i64 = purser_common::config::X402_BILLING_DETAILS_THRESHOLD_EUR_CENTS;

pub struct X402Verifier {
    nonce_repo: Arc<dyn X402NonceRepository>,
    pricing: Arc<PricingService>,
    platform_address: EvmAddress,
    include_testnets: bool,
    rpc_clients: std::collections::HashMap<String, EvmRpcClient>,
}

impl X402Verifier {
    pub fn new(
        nonce_repo: Arc<dyn X402NonceRepository>,
        pricing: Arc<PricingService>,
        platform_address: EvmAddress,
        include_testnets: bool,
        rpc_clients: std::collections::HashMap<String, EvmRpcClient>,
    ) -> Self {
        Self {
            nonce_repo,
            pricing,
            platform_address,
            include_testnets,
            rpc_clients,
        }
    }

    pub async fn verify(
        &self,
        payload: &X402Payload,
        now_unix: u64,
        tenant_billing_details: Option<&TenantBillingDetails>,
    ) -> VerifyOutcome {
        match self.verify_inner(payload, now_unix, tenant_billing_details).await {
            Ok(outcome) => outcome,
            Err(e) => VerifyOutcome::invalid(e.to_string()),
        }
    }

    async fn verify_inner(
        &self,
        payload: &X402Payload,
        now_unix: u64,
        tenant_billing_details: Option<&TenantBillingDetails>,
    ) -> PurserResult<VerifyOutcome> {
        let Some(network) = NetworkRegistry::by_name(&payload.network) else {
            return Ok(VerifyOutcome::invalid("unknown network"));
        };
        if !network.x402_enabled || (network.is_testnet && !self.include_testnets) {
            return Ok(VerifyOutcome::invalid("network not x402-enabled"));
        }

        let auth = &payload.authorization;
        if auth.to != self.platform_address {
            return Ok(VerifyOutcome::invalid("recipient must be the platform pay-to address"));
        }
        if auth.value % 10_000 != 0 {
            return Ok(VerifyOutcome::invalid("sub-cent precision is not supported"));
        }
        let is_auth_only = auth.value == 0;

        if now_unix < auth.valid_after || now_unix > auth.valid_before {
            return Ok(VerifyOutcome::invalid("authorization is outside its validity window"));
        }

        let domain_separator = eip712_domain_separator(
            USDC_DOMAIN_NAME,
            USDC_DOMAIN_VERSION,
            network.chain_id,
            EvmAddress::parse(network.usdc_contract).expect("network registry holds a valid address"),
        );
        let transfer = TransferWithAuthorization {
            from: auth.from,
            to: auth.to,
            value: auth.value,
            valid_after: auth.valid_after,
            valid_before: auth.valid_before,
            nonce: auth.nonce,
        };
        let signing_hash = transfer.signing_hash(domain_separator);
        let signer = match recover_address(signing_hash, payload.signature_r, payload.signature_s, payload.signature_v)
        {
            Ok(addr) => addr,
            Err(CryptoError::InvalidRecoveryId) => return Ok(VerifyOutcome::invalid("invalid recovery id")),
            Err(e) => return Ok(VerifyOutcome::invalid(format!("signature recovery failed: {e}"))),
        };
        if signer != auth.from {
            return Ok(VerifyOutcome::invalid("signature does not match the claimed payer"));
        }

        let nonce_hex = format!("0x{}", hex::encode(auth.nonce));
        let payer_hex = auth.from.to_string();

        if !is_auth_only {
            let locally_used = self.nonce_repo.is_nonce_used(&payload.network, &payer_hex, &nonce_hex).await?;
            if locally_used {
                return Ok(VerifyOutcome::invalid("nonce already used"));
            }

            if let Some(rpc) = self.rpc_clients.get(&payload.network) {
                let usdc = EvmAddress::parse(network.usdc_contract).expect("valid address");
                if self.authorization_state_on_chain(rpc, usdc, auth.from, auth.nonce).await? {
                    return Ok(VerifyOutcome::invalid("nonce already used"));
                }
                let balance = self.balance_of_on_chain(rpc, usdc, auth.from).await?;
                if balance < auth.value {
                    return Ok(VerifyOutcome::invalid("insufficient balance"));
                }
            }
        }

        let amount_cents = (auth.value / 10_000) as i64;
        let eur_cents = self.pricing.usdc_cents_to_eur_cents(amount_cents).await?;
        let requires_billing_details = eur_cents >= X402_BILLING_DETAILS_THRESHOLD_EUR_CENTS
            && tenant_billing_details.map(|d| !d.is_complete()).unwrap_or(true);

        Ok(VerifyOutcome {
            valid: true,
            payer_address: Some(auth.from),
            amount_cents,
            is_auth_only,
            requires_billing_details,
            error: None,
        })
    }

    async fn authorization_state_on_chain(
        &self,
        rpc: &EvmRpcClient,
        usdc: EvmAddress,
        from: EvmAddress,
        nonce: [u8; 32],
    ) -> PurserResult<bool> {
        let selector = &keccak256(b"authorizationState(address,bytes32)")[..4];
        let mut calldata = Vec::with_capacity(4 + 32 + 32);
        calldata.extend_from_slice(selector);
        calldata.extend_from_slice(&pad_address(from));
        calldata.extend_from_slice(&nonce);
        let result = rpc
            .eth_call(usdc.0, &calldata)
            .await
            .map_err(|e| purser_common::PurserError::transient("evm_rpc", anyhow::anyhow!(e.to_string())))?;
        Ok(result.last().map(|b| *b != 0).unwrap_or(false))
    }

    async fn balance_of_on_chain(&self, rpc: &EvmRpcClient, usdc: EvmAddress, owner: EvmAddress) -> PurserResult<u128> {
        let selector = &keccak256(b"balanceOf(address)")[..4];
        let mut calldata = Vec::with_capacity(4 + 32);
        calldata.extend_from_slice(selector);
        calldata.extend_from_slice(&pad_address(owner));
        let result = rpc
            .eth_call(usdc.0, &calldata)
            .await
            .map_err(|e| purser_common::PurserError::transient("evm_rpc", anyhow::anyhow!(e.to_string())))?;
        let mut buf = [0u8; 16];
        if result.len() >= 32 {
            buf.copy_from_slice(&result[16..32]);
        }
        Ok(u128::from_be_bytes(buf))
    }
}

fn pad_address(addr: EvmAddress) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[12..].copy_from_slice(addr.0.as_bytes());
    out
}
