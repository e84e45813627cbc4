//! Persistence for `x402_nonces` (§3, §4.7). Distinct from the ledger's
//! tables: nonce bookkeeping is chain-specific and not one of the
//! Ledger-owned entities.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use purser_common::model::NonceStatus;
use purser_common::PurserResult;
use sqlx::{PgPool, Row};

#[derive(Debug, Clone)]
pub struct NonceRecord {
    pub network: String,
    pub payer_address: String,
    pub nonce: String,
    pub tx_hash: String,
    pub tenant_id: String,
    pub amount_cents: i64,
    pub status: NonceStatus,
    pub settled_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub block_number: Option<i64>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct UpsertOutcome {
    pub inserted: bool,
    pub tenant_id_matches: bool,
    pub amount_matches: bool,
    pub tx_hash: String,
}

#[async_trait]
pub trait X402NonceRepository: Send + Sync {
    /// `INSERT ... ON CONFLICT (network, payer_address, nonce) DO UPDATE
    /// SET tx_hash = x402_nonces.tx_hash` (§4.7 step 3) — a no-op update on
    /// conflict so `RETURNING` still yields the stored row.
    async fn upsert_pending(
        &self,
        network: &str,
        payer_address: &str,
        nonce: &str,
        tx_hash: &str,
        tenant_id: &str,
        amount_cents: i64,
    ) -> PurserResult<UpsertOutcome>;

    async fn mark_confirmed(
        &self,
        network: &str,
        payer_address: &str,
        nonce: &str,
        block_number: i64,
        gas_used: i64,
    ) -> PurserResult<()>;

    async fn mark_failed(
        &self,
        network: &str,
        payer_address: &str,
        nonce: &str,
        reason: &str,
    ) -> PurserResult<()>;

    async fn pending_older_than(&self, seconds: i64) -> PurserResult<Vec<NonceRecord>>;

    async fn failed_timeouts_within(&self, recovery_window_seconds: i64) -> PurserResult<Vec<NonceRecord>>;

    async fn confirmed_within(&self, seconds: i64) -> PurserResult<Vec<NonceRecord>>;

    async fn is_nonce_used(&self, network: &str, payer_address: &str, nonce: &str) -> PurserResult<bool>;
}

pub struct PgX402NonceRepository {
    pool: PgPool,
}

impl PgX402NonceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: sqlx::postgres::PgRow) -> PurserResult<NonceRecord> {
        Ok(NonceRecord {
            network: row.try_get("network").map_err(purser_common::PurserError::from)?,
            payer_address: row.try_get("payer_address").map_err(purser_common::PurserError::from)?,
            nonce: row.try_get("nonce").map_err(purser_common::PurserError::from)?,
            tx_hash: row.try_get("tx_hash").map_err(purser_common::PurserError::from)?,
            tenant_id: row.try_get("tenant_id").map_err(purser_common::PurserError::from)?,
            amount_cents: row.try_get("amount_cents").map_err(purser_common::PurserError::from)?,
            status: row.try_get::<NonceStatus, _>("status").map_err(purser_common::PurserError::from)?,
            settled_at: row.try_get("settled_at").map_err(purser_common::PurserError::from)?,
            confirmed_at: row.try_get("confirmed_at").map_err(purser_common::PurserError::from)?,
            block_number: row.try_get("block_number").map_err(purser_common::PurserError::from)?,
            failure_reason: row.try_get("failure_reason").map_err(purser_common::PurserError::from)?,
        })
    }
}

#[async_trait]
impl X402NonceRepository for PgX402NonceRepository {
    async fn upsert_pending(
        &self,
        network: &str,
        payer_address: &str,
        nonce: &str,
        tx_hash: &str,
        tenant_id: &str,
        amount_cents: i64,
    ) -> PurserResult<UpsertOutcome> {
        let row = sqlx::query(
            "INSERT INTO purser.x402_nonces (network, payer_address, nonce, tx_hash, tenant_id, amount_cents, status, settled_at) \
             VALUES ($1, $2, $3, $4, $5, $6, 'pending', now()) \
             ON CONFLICT (network, payer_address, nonce) \
             DO UPDATE SET tx_hash = purser.x402_nonces.tx_hash \
             RETURNING tx_hash, tenant_id, amount_cents, (xmax = 0) AS inserted",
        )
        .bind(network)
        .bind(payer_address)
        .bind(nonce)
        .bind(tx_hash)
        .bind(tenant_id)
        .bind(amount_cents)
        .fetch_one(&self.pool)
        .await
        .map_err(purser_common::PurserError::from)?;

        let stored_tx_hash: String = row.try_get("tx_hash").map_err(purser_common::PurserError::from)?;
        let stored_tenant_id: String = row.try_get("tenant_id").map_err(purser_common::PurserError::from)?;
        let stored_amount: i64 = row.try_get("amount_cents").map_err(purser_common::PurserError::from)?;
        let inserted: bool = row.try_get("inserted").map_err(purser_common::PurserError::from)?;

        Ok(UpsertOutcome {
            inserted,
            tenant_id_matches: stored_tenant_id == tenant_id,
            amount_matches: stored_amount == amount_cents,
            tx_hash: stored_tx_hash,
        })
    }

    async fn mark_confirmed(
        &self,
        network: &str,
        payer_address: &str,
        nonce: &str,
        block_number: i64,
        gas_used: i64,
    ) -> PurserResult<()> {
        sqlx::query(
            "UPDATE purser.x402_nonces SET status = 'confirmed', confirmed_at = now(), \
             block_number = $4, gas_used = $5 \
             WHERE network = $1 AND payer_address = $2 AND nonce = $3",
        )
        .bind(network)
        .bind(payer_address)
        .bind(nonce)
        .bind(block_number)
        .bind(gas_used)
        .execute(&self.pool)
        .await
        .map_err(purser_common::PurserError::from)?;
        Ok(())
    }

    async fn mark_failed(&self, network: &str, payer_address: &str, nonce: &str, reason: &str) -> PurserResult<()> {
        sqlx::query(
            "UPDATE purser.x402_nonces SET status = 'failed', failure_reason = $4 \
             WHERE network = $1 AND payer_address = $2 AND nonce = $3",
        )
        .bind(network)
        .bind(payer_address)
        .bind(nonce)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(purser_common::PurserError::from)?;
        Ok(())
    }

    async fn pending_older_than(&self, seconds: i64) -> PurserResult<Vec<NonceRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM purser.x402_nonces WHERE status = 'pending' AND settled_at < now() - make_interval(secs => $1)",
        )
        .bind(seconds as f64)
        .fetch_all(&self.pool)
        .await
        .map_err(purser_common::PurserError::from)?;
        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn failed_timeouts_within(&self, recovery_window_seconds: i64) -> PurserResult<Vec<NonceRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM purser.x402_nonces WHERE status = 'failed' AND failure_reason LIKE 'timeout%' \
             AND settled_at > now() - make_interval(secs => $1)",
        )
        .bind(recovery_window_seconds as f64)
        .fetch_all(&self.pool)
        .await
        .map_err(purser_common::PurserError::from)?;
        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn confirmed_within(&self, seconds: i64) -> PurserResult<Vec<NonceRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM purser.x402_nonces WHERE status = 'confirmed' AND confirmed_at > now() - make_interval(secs => $1)",
        )
        .bind(seconds as f64)
        .fetch_all(&self.pool)
        .await
        .map_err(purser_common::PurserError::from)?;
        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn is_nonce_used(&self, network: &str, payer_address: &str, nonce: &str) -> PurserResult<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM purser.x402_nonces WHERE network = $1 AND payer_address = $2 AND nonce = $3",
        )
        .bind(network)
        .bind(payer_address)
        .bind(nonce)
        .fetch_optional(&self.pool)
        .await
        .map_err(purser_common::PurserError::from)?;
        Ok(row.is_some())
    }
}
