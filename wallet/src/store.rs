//! Persistence seam between HD-derivation logic and whatever backs the HD
//! wallet's index assignment (Postgres, in the `ledger` crate, in
//! production; an in-memory map in tests).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Assigns and remembers the BIP32 child index used for a tenant's deposit
/// address. Index 0 is reserved for the platform address and is never
/// handed out by `assign_index`.
#[async_trait]
pub trait HdWalletStore: Send + Sync {
    /// Returns `(index, created)` — `created` is `true` the first time a
    /// tenant is assigned an index, `false` on every subsequent call for the
    /// same tenant (idempotent lookup-or-create).
    async fn assign_index(&self, tenant_id: &str) -> Result<(u32, bool), anyhow::Error>;
}

#[derive(Default)]
pub struct InMemoryHdWalletStore {
    inner: Mutex<InMemoryState>,
}

#[derive(Default)]
struct InMemoryState {
    next_index: u32,
    assigned: HashMap<String, u32>,
}

impl InMemoryState {
    fn next(&mut self) -> u32 {
        if self.next_index == 0 {
            self.next_index = 1;
        }
        let idx = self.next_index;
        self.next_index += 1;
        idx
    }
}

#[async_trait]
impl HdWalletStore for InMemoryHdWalletStore {
    async fn assign_index(&self, tenant_id: &str) -> Result<(u32, bool), anyhow::Error> {
        let mut state = self.inner.lock().expect("lock poisoned");
        if let Some(existing) = state.assigned.get(tenant_id) {
            return Ok((*existing, false));
        }
        let idx = state.next();
        state.assigned.insert(tenant_id.to_string(), idx);
        Ok((idx, true))
    }
}

/// Postgres-backed store matching the transaction described in §4.2
/// `tenantDepositAddress`: `SELECT ... FOR UPDATE` the tenant's
/// `x402_address_index`, and on first assignment atomically increment the
/// singleton `hd_wallet_state.next_index`.
pub struct PgHdWalletStore {
    pool: sqlx::PgPool,
}

impl PgHdWalletStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HdWalletStore for PgHdWalletStore {
    async fn assign_index(&self, tenant_id: &str) -> Result<(u32, bool), anyhow::Error> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<i64> = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT x402_address_index FROM purser.tenant_subscriptions WHERE tenant_id = $1 FOR UPDATE",
        )
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await?
        .flatten();

        if let Some(index) = existing {
            tx.commit().await?;
            return Ok((index as u32, false));
        }

        let next_index: i64 = sqlx::query_scalar(
            "UPDATE purser.hd_wallet_state SET next_index = next_index + 1 WHERE id = true RETURNING next_index - 1",
        )
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE purser.tenant_subscriptions SET x402_address_index = $2 WHERE tenant_id = $1")
            .bind(tenant_id)
            .bind(next_index)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok((next_index as u32, true))
    }
}
