//! EVM-flavoured crypto primitives: Keccak-256 hashing, EIP-712 typed-data
//! hashing and secp256k1 signature recovery.
//!
//! Mirrors the teacher's habit (see `common::crypto::ed25519`) of wrapping a
//! hashing crate behind small free functions rather than re-deriving crypto
//! by hand; here the hasher is `sha3::Keccak256` and the curve operations are
//! `libsecp256k1`, since EVM addresses and EIP-3009 signatures require
//! Keccak/secp256k1 rather than the chain's native ed25519/curve25519 stack.

use primitive_types::H160;
use sha3::{Digest, Keccak256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("malformed signature")]
    MalformedSignature,
    #[error("invalid recovery id")]
    InvalidRecoveryId,
    #[error("signature recovery failed: {0}")]
    RecoveryFailed(String),
    #[error("invalid extended public key")]
    InvalidXpub,
    #[error("extended key carries private material")]
    PrivateKeyRejected,
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let out = hasher.finalize();
    let mut buf = [0u8; 32];
    buf.copy_from_slice(&out);
    buf
}

/// An EVM address, lowercase-hex `0x`-prefixed on display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EvmAddress(pub H160);

impl EvmAddress {
    pub fn from_uncompressed_pubkey(pubkey_65: &[u8]) -> Self {
        debug_assert_eq!(pubkey_65.len(), 65);
        debug_assert_eq!(pubkey_65[0], 0x04);
        let hash = keccak256(&pubkey_65[1..]);
        EvmAddress(H160::from_slice(&hash[12..]))
    }

    pub fn parse(s: &str) -> Result<Self, CryptoError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|_| CryptoError::MalformedSignature)?;
        if bytes.len() != 20 {
            return Err(CryptoError::MalformedSignature);
        }
        Ok(EvmAddress(H160::from_slice(&bytes)))
    }
}

impl std::fmt::Display for EvmAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0.as_bytes()))
    }
}

impl TryFrom<String> for EvmAddress {
    type Error = CryptoError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        EvmAddress::parse(&value)
    }
}

impl From<EvmAddress> for String {
    fn from(value: EvmAddress) -> Self {
        value.to_string()
    }
}

/// EIP-712 domain separator for the USDC `transferWithAuthorization` domain.
pub fn eip712_domain_separator(name: &str, version: &str, chain_id: u64, verifying_contract: EvmAddress) -> [u8; 32] {
    const DOMAIN_TYPEHASH: &str =
        "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";
    let mut buf = Vec::with_capacity(32 * 4);
    buf.extend_from_slice(&keccak256(DOMAIN_TYPEHASH.as_bytes()));
    buf.extend_from_slice(&keccak256(name.as_bytes()));
    buf.extend_from_slice(&keccak256(version.as_bytes()));
    let mut chain_id_be = [0u8; 32];
    chain_id_be[24..].copy_from_slice(&chain_id.to_be_bytes());
    buf.extend_from_slice(&chain_id_be);
    let mut addr_be = [0u8; 32];
    addr_be[12..].copy_from_slice(verifying_contract.0.as_bytes());
    buf.extend_from_slice(&addr_be);
    keccak256(&buf)
}

/// EIP-3009 `TransferWithAuthorization` struct, for struct-hash and message-hash
/// computation during x402 verification and settlement.
pub struct TransferWithAuthorization {
    pub from: EvmAddress,
    pub to: EvmAddress,
    pub value: u128,
    pub valid_after: u64,
    pub valid_before: u64,
    pub nonce: [u8; 32],
}

impl TransferWithAuthorization {
    const TYPEHASH: &'static str = "TransferWithAuthorization(address from,address to,uint256 value,uint256 validAfter,uint256 validBefore,bytes32 nonce)";

    pub fn struct_hash(&self) -> [u8; 32] {
        let mut buf = Vec::with_capacity(32 * 6);
        buf.extend_from_slice(&keccak256(Self::TYPEHASH.as_bytes()));
        buf.extend_from_slice(&pad_address(self.from));
        buf.extend_from_slice(&pad_address(self.to));
        buf.extend_from_slice(&pad_u256(self.value));
        buf.extend_from_slice(&pad_u256(self.valid_after as u128));
        buf.extend_from_slice(&pad_u256(self.valid_before as u128));
        buf.extend_from_slice(&self.nonce);
        keccak256(&buf)
    }

    /// `keccak256(0x19 || 0x01 || domainSeparator || structHash)`.
    pub fn signing_hash(&self, domain_separator: [u8; 32]) -> [u8; 32] {
        let mut buf = Vec::with_capacity(2 + 32 + 32);
        buf.push(0x19);
        buf.push(0x01);
        buf.extend_from_slice(&domain_separator);
        buf.extend_from_slice(&self.struct_hash());
        keccak256(&buf)
    }
}

fn pad_address(addr: EvmAddress) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[12..].copy_from_slice(addr.0.as_bytes());
    out
}

fn pad_u256(value: u128) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[16..].copy_from_slice(&value.to_be_bytes());
    out
}

/// Recovers the signer address from an `(r, s, v)` EIP-712 signature over
/// `message_hash`. `v` must be 27 or 28 (legacy convention).
pub fn recover_address(message_hash: [u8; 32], r: [u8; 32], s: [u8; 32], v: u8) -> Result<EvmAddress, CryptoError> {
    use libsecp256k1::{recover, Message, RecoveryId, Signature};

    if v != 27 && v != 28 {
        return Err(CryptoError::InvalidRecoveryId);
    }
    let recovery_id = RecoveryId::parse(v - 27).map_err(|_| CryptoError::InvalidRecoveryId)?;
    let mut sig_bytes = [0u8; 64];
    sig_bytes[..32].copy_from_slice(&r);
    sig_bytes[32..].copy_from_slice(&s);
    let signature = Signature::parse_standard(&sig_bytes).map_err(|_| CryptoError::MalformedSignature)?;
    let message = Message::parse(&message_hash);
    let pubkey = recover(&message, &signature, &recovery_id)
        .map_err(|e| CryptoError::RecoveryFailed(format!("{e:?}")))?;
    Ok(EvmAddress::from_uncompressed_pubkey(&pubkey.serialize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keccak_matches_known_vector() {
        // keccak256("") = c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470
        let digest = keccak256(b"");
        assert_eq!(
            hex::encode(digest),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a47"
        );
    }

    #[test]
    fn address_parse_roundtrip() {
        let addr = EvmAddress::parse("0x000000000000000000000000000000000000ff").unwrap();
        assert_eq!(addr.to_string(), "0x000000000000000000000000000000000000ff");
    }

    #[test]
    fn domain_separator_is_deterministic() {
        let addr = EvmAddress::parse("0x0000000000000000000000000000000000dead").unwrap();
        let a = eip712_domain_separator("USD Coin", "2", 8453, addr);
        let b = eip712_domain_separator("USD Coin", "2", 8453, addr);
        assert_eq!(a, b);
        let c = eip712_domain_separator("USD Coin", "2", 1, addr);
        assert_ne!(a, c);
    }
}
