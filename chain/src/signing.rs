//! RLP encoding and EIP-155 signing for the legacy transaction the Settler
//! submits (§4.7 step 2). The corpus has no RLP crate dependency to reuse,
//! so this is a small, self-contained encoder rather than a fabricated one.

use libsecp256k1::{sign, Message, PublicKey, SecretKey};
use primitive_types::U256;
use purser_common::crypto::keccak256;

use crate::rpc::LegacyTransaction;

fn rlp_encode_bytes(bytes: &[u8]) -> Vec<u8> {
    if bytes.len() == 1 && bytes[0] < 0x80 {
        return vec![bytes[0]];
    }
    let mut out = encode_length(bytes.len(), 0x80);
    out.extend_from_slice(bytes);
    out
}

fn rlp_encode_list(items: &[Vec<u8>]) -> Vec<u8> {
    let payload: Vec<u8> = items.iter().flatten().copied().collect();
    let mut out = encode_length(payload.len(), 0xc0);
    out.extend_from_slice(&payload);
    out
}

fn encode_length(len: usize, offset: u8) -> Vec<u8> {
    if len <= 55 {
        vec![offset + len as u8]
    } else {
        let len_bytes = minimal_be_bytes(&(len as u64).to_be_bytes());
        let mut out = vec![offset + 55 + len_bytes.len() as u8];
        out.extend_from_slice(&len_bytes);
        out
    }
}

fn minimal_be_bytes(bytes: &[u8]) -> Vec<u8> {
    let first_nonzero = bytes.iter().position(|&b| b != 0);
    match first_nonzero {
        Some(idx) => bytes[idx..].to_vec(),
        None => Vec::new(),
    }
}

fn u256_minimal_bytes(value: U256) -> Vec<u8> {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    minimal_be_bytes(&buf)
}

fn u64_minimal_bytes(value: u64) -> Vec<u8> {
    minimal_be_bytes(&value.to_be_bytes())
}

fn rlp_fields(tx: &LegacyTransaction, v: &[u8], r: &[u8], s: &[u8]) -> Vec<u8> {
    rlp_encode_list(&[
        rlp_encode_bytes(&u64_minimal_bytes(tx.nonce)),
        rlp_encode_bytes(&u256_minimal_bytes(tx.gas_price)),
        rlp_encode_bytes(&u64_minimal_bytes(tx.gas_limit)),
        rlp_encode_bytes(tx.to.as_bytes()),
        rlp_encode_bytes(&u256_minimal_bytes(tx.value)),
        rlp_encode_bytes(&tx.data),
        rlp_encode_bytes(v),
        rlp_encode_bytes(r),
        rlp_encode_bytes(s),
    ])
}

/// `keccak256(rlp([nonce, gasPrice, gasLimit, to, value, data, chainId, 0, 0]))`
/// — the EIP-155 signing hash for a legacy transaction.
pub fn signing_hash(tx: &LegacyTransaction) -> [u8; 32] {
    let chain_id_bytes = u64_minimal_bytes(tx.chain_id);
    let encoded = rlp_fields(tx, &chain_id_bytes, &[], &[]);
    keccak256(&encoded)
}

/// Signs `tx` with the gas wallet's private key and returns the RLP-encoded
/// signed transaction plus its keccak256 hash (the on-chain tx hash).
pub fn sign_legacy_transaction(tx: &LegacyTransaction, private_key: &SecretKey) -> (Vec<u8>, [u8; 32]) {
    let hash = signing_hash(tx);
    let message = Message::parse(&hash);
    let (signature, recovery_id) = sign(&message, private_key);
    let sig_bytes = signature.serialize();
    let r = &sig_bytes[..32];
    let s = &sig_bytes[32..];
    let v = tx.chain_id * 2 + 35 + recovery_id.serialize() as u64;

    let signed = rlp_fields(tx, &u64_minimal_bytes(v), &minimal_be_bytes(r), &minimal_be_bytes(s));
    let tx_hash = keccak256(&signed);
    (signed, tx_hash)
}

/// Derives the uncompressed public key's EVM address equivalent for the gas
/// wallet, for logging/sanity checks at startup.
pub fn public_key_for(private_key: &SecretKey) -> PublicKey {
    PublicKey::from_secret_key(private_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rlp_encodes_empty_and_short_strings() {
        assert_eq!(rlp_encode_bytes(&[]), vec![0x80]);
        assert_eq!(rlp_encode_bytes(&[0x01]), vec![0x01]);
        assert_eq!(rlp_encode_bytes(&[0x81]), vec![0x81, 0x81]);
    }

    #[test]
    fn signing_is_deterministic() {
        let tx = LegacyTransaction {
            nonce: 5,
            gas_price: U256::from(20_000_000_000u64),
            gas_limit: 150_000,
            to: primitive_types::H160::repeat_byte(0xab),
            value: U256::zero(),
            data: vec![0xde, 0xad, 0xbe, 0xef],
            chain_id: 8453,
        };
        let a = signing_hash(&tx);
        let b = signing_hash(&tx);
        assert_eq!(a, b);
    }
}
