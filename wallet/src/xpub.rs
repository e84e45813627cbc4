//! Base58Check parsing and validation of a BIP32 extended public key.
//!
//! Only the public-key version bytes (`xpub`/`tpub` and their segwit
//! cousins) are accepted; any extended *private* key is rejected before its
//! key material is ever touched, per §4.2 "fails closed on private material".

use libsecp256k1::PublicKey;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum XpubError {
    #[error("not valid base58check")]
    MalformedBase58,
    #[error("unexpected extended key length")]
    BadLength,
    #[error("checksum mismatch")]
    BadChecksum,
    #[error("extended key carries private material")]
    PrivateKeyMaterial,
    #[error("unrecognised extended key version bytes")]
    UnknownVersion,
    #[error("malformed public key point")]
    BadPublicKey,
}

/// secp256k1 public-key version bytes for the version families we accept.
/// Private-key counterparts (`xprv` 0x0488ADE4, `yprv` 0x049D7878, `zprv`
/// 0x04B2430C, and testnet `tprv`/`uprv`/`vprv`) are deliberately absent —
/// any four bytes not in this list fall through to `UnknownVersion`, and the
/// private-key versions additionally fail the length check below since BIP32
/// serializes a private key as a leading 0x00 plus 32 bytes instead of a
/// 33-byte compressed point.
const PUBLIC_VERSIONS: &[[u8; 4]] = &[
    [0x04, 0x88, 0xB2, 0x1E], // xpub (mainnet)
    [0x04, 0x9D, 0x7C, 0xB2], // ypub
    [0x04, 0xB2, 0x47, 0x46], // zpub
    [0x04, 0x35, 0x87, 0xCF], // tpub (testnet)
    [0x04, 0x4A, 0x52, 0x62], // upub
    [0x04, 0x5F, 0x1C, 0xF6], // vpub
];

const PRIVATE_VERSIONS: &[[u8; 4]] = &[
    [0x04, 0x88, 0xAD, 0xE4], // xprv
    [0x04, 0x9D, 0x78, 0x78], // yprv
    [0x04, 0xB2, 0x43, 0x0C], // zprv
    [0x04, 0x35, 0x83, 0x94], // tprv
    [0x04, 0x4A, 0x4E, 0x28], // uprv
    [0x04, 0x5F, 0x18, 0xBC], // vprv
];

pub struct ExtendedPublicKey {
    pub depth: u8,
    pub parent_fingerprint: [u8; 4],
    pub child_number: u32,
    pub chain_code: [u8; 32],
    compressed_pubkey: [u8; 33],
}

impl ExtendedPublicKey {
    pub fn parse(s: &str) -> Result<Self, XpubError> {
        let raw = bs58::decode(s)
            .into_vec()
            .map_err(|_| XpubError::MalformedBase58)?;
        if raw.len() != 82 {
            return Err(XpubError::BadLength);
        }
        let (payload, checksum) = raw.split_at(78);
        let digest1 = Sha256::digest(payload);
        let digest2 = Sha256::digest(digest1);
        if &digest2[..4] != checksum {
            return Err(XpubError::BadChecksum);
        }

        let mut version = [0u8; 4];
        version.copy_from_slice(&payload[0..4]);
        if PRIVATE_VERSIONS.contains(&version) {
            return Err(XpubError::PrivateKeyMaterial);
        }
        if !PUBLIC_VERSIONS.contains(&version) {
            return Err(XpubError::UnknownVersion);
        }

        let depth = payload[4];
        let mut parent_fingerprint = [0u8; 4];
        parent_fingerprint.copy_from_slice(&payload[5..9]);
        let child_number = u32::from_be_bytes(payload[9..13].try_into().unwrap());
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&payload[13..45]);

        let key_field = &payload[45..78];
        if key_field[0] == 0x00 {
            // A leading zero byte here is the private-key encoding's marker
            // byte; the extended-key type checked above should already have
            // excluded this, but refuse to interpret it as a compressed
            // point regardless.
            return Err(XpubError::PrivateKeyMaterial);
        }
        let mut compressed_pubkey = [0u8; 33];
        compressed_pubkey.copy_from_slice(key_field);
        // Validate it decodes to a point on the curve up front.
        PublicKey::parse_compressed(&compressed_pubkey).map_err(|_| XpubError::BadPublicKey)?;

        Ok(Self {
            depth,
            parent_fingerprint,
            child_number,
            chain_code,
            compressed_pubkey,
        })
    }

    pub fn public_key(&self) -> Result<PublicKey, XpubError> {
        PublicKey::parse_compressed(&self.compressed_pubkey).map_err(|_| XpubError::BadPublicKey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_XPUB: &str = "xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjqJoCu1Rupje8YtGqsefD265TMg7usUDFdp6W1EGMcet8";
    const TEST_XPRV: &str = "xprv9s21ZrQH143K3QTDL4LXw2F7HEK3wJUD2nW2nRk4stbPy6cq3jPTAbLzHBLuBnhgP2Cugb2E2dnn29Ylgw59WnVkFsnPsFBwe2mWvwPo7R4";

    #[test]
    fn parses_valid_xpub() {
        let xpub = ExtendedPublicKey::parse(TEST_XPUB).unwrap();
        assert_eq!(xpub.depth, 0);
        assert!(xpub.public_key().is_ok());
    }

    #[test]
    fn rejects_xprv() {
        assert_eq!(
            ExtendedPublicKey::parse(TEST_XPRV).unwrap_err(),
            XpubError::PrivateKeyMaterial
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(ExtendedPublicKey::parse("not-base58check").is_err());
    }

    #[test]
    fn rejects_tampered_checksum() {
        let mut s = TEST_XPUB.to_string();
        s.pop();
        s.push(if TEST_XPUB.ends_with('t') { 'x' } else { 't' });
        assert_eq!(
            ExtendedPublicKey::parse(&s).unwrap_err(),
            XpubError::BadChecksum
        );
    }
}
