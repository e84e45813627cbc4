//! HD wallet: derives per-tenant Ethereum deposit addresses from a stored
//! extended public key, without ever touching private material (§4.2).

pub mod store;
pub mod xpub;

pub use store::{HdWalletStore, InMemoryHdWalletStore, PgHdWalletStore};

use hmac::{Hmac, Mac};
use libsecp256k1::SecretKey;
use purser_common::crypto::EvmAddress;
use sha2::Sha512;
use store::HdWalletStore;
use thiserror::Error;
use xpub::ExtendedPublicKey;

type HmacSha512 = Hmac<Sha512>;

#[derive(Debug, Error)]
pub enum HdWalletError {
    #[error(transparent)]
    Xpub(#[from] xpub::XpubError),
    #[error("child key derivation produced an invalid point")]
    DerivationFailed,
    #[error("hardened derivation is not supported for a public-only key")]
    HardenedIndex,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Index 0 is reserved for the platform's x402 pay-to address; tenant
/// deposit addresses start at 1 and increase monotonically (§3 "HD Wallet
/// State").
pub const PLATFORM_ADDRESS_INDEX: u32 = 0;

pub struct HdWallet<S: HdWalletStore> {
    xpub: ExtendedPublicKey,
    store: S,
}

impl<S: HdWalletStore> HdWallet<S> {
    pub fn new(xpub_str: &str, store: S) -> Result<Self, HdWalletError> {
        let xpub = ExtendedPublicKey::parse(xpub_str)?;
        Ok(Self { xpub, store })
    }

    /// Non-hardened CKDpub: derives child index `i` (`i < 2^31`) from the
    /// stored extended public key, per BIP32 §"Public parent key -> public
    /// child key".
    pub fn derive_address(&self, index: u32) -> Result<EvmAddress, HdWalletError> {
        if index & 0x8000_0000 != 0 {
            return Err(HdWalletError::HardenedIndex);
        }
        let parent_pubkey = self.xpub.public_key()?;
        let mut mac = HmacSha512::new_from_slice(&self.xpub.chain_code)
            .expect("HMAC accepts a key of any size");
        mac.update(&parent_pubkey.serialize_compressed());
        mac.update(&index.to_be_bytes());
        let i = mac.finalize().into_bytes();
        let (il, _ir) = i.split_at(32);

        let tweak = SecretKey::parse_slice(il).map_err(|_| HdWalletError::DerivationFailed)?;
        let mut child = parent_pubkey;
        child
            .tweak_add_assign(&tweak)
            .map_err(|_| HdWalletError::DerivationFailed)?;

        let uncompressed = child.serialize();
        Ok(EvmAddress::from_uncompressed_pubkey(&uncompressed))
    }

    pub fn platform_address(&self) -> Result<EvmAddress, HdWalletError> {
        self.derive_address(PLATFORM_ADDRESS_INDEX)
    }

    /// Returns the tenant's deposit address, deriving and persisting a new
    /// index if one has not yet been assigned. The store is responsible for
    /// the `SELECT ... FOR UPDATE` + atomic-increment semantics described in
    /// §4.2.
    pub async fn tenant_deposit_address(
        &self,
        tenant_id: &str,
    ) -> Result<(EvmAddress, u32, bool), HdWalletError> {
        let (index, created) = self.store.assign_index(tenant_id).await?;
        let address = self.derive_address(index)?;
        Ok((address, index, created))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::InMemoryHdWalletStore;

    // A valid mainnet xpub test vector (BIP32 test vector 1, "m").
    const TEST_XPUB: &str = "xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjqJoCu1Rupje8YtGqsefD265TMg7usUDFdp6W1EGMcet8";

    #[tokio::test]
    async fn platform_address_is_index_zero_and_stable() {
        let wallet = HdWallet::new(TEST_XPUB, InMemoryHdWalletStore::default()).unwrap();
        let a = wallet.platform_address().unwrap();
        let b = wallet.platform_address().unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn tenant_addresses_are_distinct_and_stable() {
        let wallet = HdWallet::new(TEST_XPUB, InMemoryHdWalletStore::default()).unwrap();
        let (addr_a1, idx_a1, created_a1) = wallet.tenant_deposit_address("tenant-a").await.unwrap();
        assert!(created_a1);
        assert_eq!(idx_a1, 1);

        let (addr_a2, idx_a2, created_a2) = wallet.tenant_deposit_address("tenant-a").await.unwrap();
        assert!(!created_a2);
        assert_eq!(addr_a1, addr_a2);
        assert_eq!(idx_a1, idx_a2);

        let (addr_b, idx_b, created_b) = wallet.tenant_deposit_address("tenant-b").await.unwrap();
        assert!(created_b);
        assert_eq!(idx_b, 2);
        assert_ne!(addr_a1, addr_b);
    }

    #[test]
    fn rejects_extended_private_key() {
        // BIP32 test vector 1 xprv for "m" (private material, must be rejected).
        const TEST_XPRV: &str = "xprv9s21ZrQH143K3QTDL4LXw2F7HEK3wJUD2nW2nRk4stbPy6cq3jPTAbLzHBLuBnhgP2Cugb2E2dnn29Ylgw59WnVkFsnPsFBwe2mWvwPo7R4";
        let err = HdWallet::new(TEST_XPRV, InMemoryHdWalletStore::default()).unwrap_err();
        assert!(matches!(err, HdWalletError::Xpub(_)));
    }
}
