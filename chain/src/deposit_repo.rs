//! Persistence for crypto deposit wallets, queried and mutated by
//! [`crate::monitor::CryptoMonitor`]. `crypto_wallets` is not one of the
//! Ledger-owned tables, so this lives alongside the monitor rather than in
//! `purser-ledger`.

use async_trait::async_trait;
use purser_common::model::{Asset, CryptoWallet, WalletPurpose, WalletStatus};
use purser_common::PurserResult;
use sqlx::{PgPool, Row};

/// A wallet plus the invoice total when `purpose == invoice` (the wallet's
/// own `expected_amount_cents` column is null in that case — the amount is
/// read from the joined invoice instead, §3 "exactly one of invoice_id /
/// expected_amount_cents is set").
#[derive(Debug, Clone)]
pub struct PollableWallet {
    pub wallet: CryptoWallet,
    pub invoice_total_cents: Option<i64>,
}

impl PollableWallet {
    pub fn expected_amount_cents(&self) -> Option<i64> {
        self.wallet.expected_amount_cents.or(self.invoice_total_cents)
    }
}

#[async_trait]
pub trait CryptoWalletRepository: Send + Sync {
    /// Wallets eligible for a monitor pass: `active`, unexpired, and (for
    /// invoice wallets) whose invoice is still pending.
    async fn pollable_wallets(&self) -> PurserResult<Vec<PollableWallet>>;

    /// Marks a wallet `used`, only if it is still `active` (idempotent
    /// guard against crediting twice on retry, §4.4 "failure model").
    async fn mark_used(&self, wallet_id: &str) -> PurserResult<bool>;
}

pub struct PgCryptoWalletRepository {
    pool: PgPool,
}

impl PgCryptoWalletRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CryptoWalletRepository for PgCryptoWalletRepository {
    async fn pollable_wallets(&self) -> PurserResult<Vec<PollableWallet>> {
        let rows = sqlx::query(
            "SELECT w.id, w.tenant_id, w.purpose, w.invoice_id, w.expected_amount_cents, \
                    w.asset, w.network, w.wallet_address, w.derivation_index, w.status, w.expires_at, \
                    (i.base_amount_cents + i.metered_amount_cents) AS invoice_total_cents \
             FROM purser.crypto_wallets w \
             LEFT JOIN purser.billing_invoices i ON i.id = w.invoice_id \
             WHERE w.status = 'active' AND w.expires_at > now() \
               AND (w.invoice_id IS NULL OR i.status = 'pending')",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(purser_common::PurserError::from)?;

        rows.into_iter()
            .map(|row| {
                let wallet = CryptoWallet {
                    id: row.try_get("id").map_err(purser_common::PurserError::from)?,
                    tenant_id: row.try_get("tenant_id").map_err(purser_common::PurserError::from)?,
                    purpose: row.try_get::<WalletPurpose, _>("purpose").map_err(purser_common::PurserError::from)?,
                    invoice_id: row.try_get("invoice_id").map_err(purser_common::PurserError::from)?,
                    expected_amount_cents: row
                        .try_get("expected_amount_cents")
                        .map_err(purser_common::PurserError::from)?,
                    asset: row.try_get::<Asset, _>("asset").map_err(purser_common::PurserError::from)?,
                    network: row.try_get("network").map_err(purser_common::PurserError::from)?,
                    wallet_address: row.try_get("wallet_address").map_err(purser_common::PurserError::from)?,
                    derivation_index: row.try_get("derivation_index").map_err(purser_common::PurserError::from)?,
                    status: row.try_get::<WalletStatus, _>("status").map_err(purser_common::PurserError::from)?,
                    expires_at: row.try_get("expires_at").map_err(purser_common::PurserError::from)?,
                };
                Ok(PollableWallet {
                    wallet,
                    invoice_total_cents: row.try_get("invoice_total_cents").map_err(purser_common::PurserError::from)?,
                })
            })
            .collect()
    }

    async fn mark_used(&self, wallet_id: &str) -> PurserResult<bool> {
        let result = sqlx::query(
            "UPDATE purser.crypto_wallets SET status = 'used' WHERE id = $1::uuid AND status = 'active'",
        )
        .bind(wallet_id)
        .execute(&self.pool)
        .await
        .map_err(purser_common::PurserError::from)?;
        Ok(result.rows_affected() > 0)
    }
}
