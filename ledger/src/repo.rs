//! Persistence for the ledger: one Postgres-backed implementation for
//! production, behind a trait so the ledger's business rules in
//! [`crate::ledger::Ledger`] can be exercised without a database in tests.

use async_trait::async_trait;
use chrono::Utc;
use purser_common::model::{BillingModel, SubscriptionStatus, TransactionType};
use purser_common::{PurserError, PurserResult};
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct LedgerEffect {
    pub tenant_id: String,
    pub currency: String,
    /// Signed delta; positive for credit-shaped effects, negative for debits.
    pub amount_cents: i64,
    pub transaction_type: TransactionType,
    pub reference_type: String,
    pub reference_id: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy)]
pub struct EffectOutcome {
    pub previous_balance_cents: i64,
    pub new_balance_cents: i64,
    pub applied: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantSnapshot {
    pub billing_model: BillingModel,
    pub status: SubscriptionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepaidTopupOutcome {
    NotFound,
    TenantMismatch,
    /// The `pending_topups` row was already `completed` by an earlier,
    /// already-committed delivery of the same webhook.
    AlreadyCompleted,
    Applied { amount_cents: i64, currency: String, new_balance_cents: i64 },
}

#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Applies `effect` under `SELECT ... FOR UPDATE` on the balance row,
    /// short-circuiting to the existing post-balance if the effect's
    /// natural key `(tenant_id, reference_type, reference_id,
    /// transaction_type)` was already applied.
    async fn apply_effect(&self, effect: LedgerEffect) -> PurserResult<EffectOutcome>;

    async fn get_tenant_snapshot(&self, tenant_id: &str) -> PurserResult<Option<TenantSnapshot>>;

    /// Compare-and-set style transition: succeeds only if the subscription's
    /// current status is one of `from`. Returns whether the row transitioned.
    async fn transition_subscription(
        &self,
        tenant_id: &str,
        from: &[SubscriptionStatus],
        to: SubscriptionStatus,
    ) -> PurserResult<bool>;

    /// Records a payment against an invoice and transitions it to `paid`
    /// (only from `pending`/`overdue`), idempotent on `provider_ref`.
    /// Invoices are Ledger-owned (§3 "Ownership rules"); other components
    /// (crypto monitor, webhook ingress) propose this effect but never
    /// write the row directly.
    async fn record_invoice_payment(
        &self,
        invoice_id: &str,
        provider: &str,
        provider_ref: &str,
        amount_cents: i64,
    ) -> PurserResult<bool>;

    /// Whether an effect with this natural key was already applied. Used by
    /// the x402 reconciler to decide whether a reorg/timeout compensating
    /// entry has a matching prior transaction (§4.7).
    async fn has_effect(
        &self,
        tenant_id: &str,
        reference_type: &str,
        reference_id: &str,
        transaction_type: TransactionType,
    ) -> PurserResult<bool>;

    /// §4.5 step 3 "prepaid": within a single transaction, locks and claims
    /// `pending_topups`, credits the balance, stamps the completed row with
    /// the resulting `balance_transaction_id`, and unsuspends the tenant.
    /// `pending_topups` is otherwise checkout-owned, but this routine must
    /// share one transaction with the Ledger-owned tables it also touches,
    /// so it lives on the Ledger side of the boundary.
    async fn claim_and_credit_prepaid_topup(
        &self,
        reference_id: &str,
        tenant_id: &str,
        description: &str,
    ) -> PurserResult<PrepaidTopupOutcome>;
}

pub struct PgLedgerRepository {
    pool: PgPool,
}

impl PgLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerRepository for PgLedgerRepository {
    async fn apply_effect(&self, effect: LedgerEffect) -> PurserResult<EffectOutcome> {
        let mut tx = self.pool.begin().await.map_err(PurserError::from)?;

        sqlx::query(
            "INSERT INTO purser.prepaid_balances (tenant_id, currency, balance_cents, updated_at) \
             VALUES ($1, $2, 0, now()) ON CONFLICT (tenant_id, currency) DO NOTHING",
        )
        .bind(&effect.tenant_id)
        .bind(&effect.currency)
        .execute(&mut *tx)
        .await
        .map_err(PurserError::from)?;

        // Holding the row lock here serializes concurrent deliveries of the
        // same natural key onto the INSERT ... ON CONFLICT below, so only one
        // of them ever observes `inserted = true`.
        let row = sqlx::query(
            "SELECT balance_cents FROM purser.prepaid_balances \
             WHERE tenant_id = $1 AND currency = $2 FOR UPDATE",
        )
        .bind(&effect.tenant_id)
        .bind(&effect.currency)
        .fetch_one(&mut *tx)
        .await
        .map_err(PurserError::from)?;
        let previous_balance_cents: i64 = row.try_get("balance_cents").map_err(PurserError::from)?;
        let new_balance_cents = previous_balance_cents + effect.amount_cents;

        let inserted_row = sqlx::query(
            "INSERT INTO purser.balance_transactions \
             (id, tenant_id, amount_cents, balance_after_cents, transaction_type, reference_type, reference_id, description, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (tenant_id, reference_type, reference_id, transaction_type) DO NOTHING \
             RETURNING balance_after_cents",
        )
        .bind(Uuid::new_v4())
        .bind(&effect.tenant_id)
        .bind(effect.amount_cents)
        .bind(new_balance_cents)
        .bind(&effect.transaction_type)
        .bind(&effect.reference_type)
        .bind(&effect.reference_id)
        .bind(&effect.description)
        .bind(Utc::now())
        .fetch_optional(&mut *tx)
        .await
        .map_err(PurserError::from)?;

        let Some(inserted_row) = inserted_row else {
            // Already applied under this natural key; return the stored
            // effect's post-balance as success rather than double-applying.
            let existing = sqlx::query(
                "SELECT balance_after_cents FROM purser.balance_transactions \
                 WHERE tenant_id = $1 AND reference_type = $2 AND reference_id = $3 AND transaction_type = $4",
            )
            .bind(&effect.tenant_id)
            .bind(&effect.reference_type)
            .bind(&effect.reference_id)
            .bind(&effect.transaction_type)
            .fetch_one(&mut *tx)
            .await
            .map_err(PurserError::from)?;
            let balance_after: i64 = existing.try_get("balance_after_cents").map_err(PurserError::from)?;
            tx.commit().await.map_err(PurserError::from)?;
            return Ok(EffectOutcome {
                previous_balance_cents: balance_after,
                new_balance_cents: balance_after,
                applied: false,
            });
        };
        let new_balance_cents: i64 = inserted_row.try_get("balance_after_cents").map_err(PurserError::from)?;

        sqlx::query(
            "UPDATE purser.prepaid_balances SET balance_cents = $3, updated_at = now() \
             WHERE tenant_id = $1 AND currency = $2",
        )
        .bind(&effect.tenant_id)
        .bind(&effect.currency)
        .bind(new_balance_cents)
        .execute(&mut *tx)
        .await
        .map_err(PurserError::from)?;

        tx.commit().await.map_err(PurserError::from)?;

        Ok(EffectOutcome {
            previous_balance_cents,
            new_balance_cents,
            applied: true,
        })
    }

    async fn get_tenant_snapshot(&self, tenant_id: &str) -> PurserResult<Option<TenantSnapshot>> {
        let row = sqlx::query(
            "SELECT billing_model, status FROM purser.tenant_subscriptions WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(PurserError::from)?;

        let Some(row) = row else { return Ok(None) };
        Ok(Some(TenantSnapshot {
            billing_model: row.try_get("billing_model").map_err(PurserError::from)?,
            status: row.try_get("status").map_err(PurserError::from)?,
        }))
    }

    async fn transition_subscription(
        &self,
        tenant_id: &str,
        from: &[SubscriptionStatus],
        to: SubscriptionStatus,
    ) -> PurserResult<bool> {
        let from_names: Vec<String> = from.iter().map(|s| status_db_name(*s).to_string()).collect();
        let result = sqlx::query(
            "UPDATE purser.tenant_subscriptions SET status = $2 \
             WHERE tenant_id = $1 AND status = ANY($3)",
        )
        .bind(tenant_id)
        .bind(to)
        .bind(&from_names)
        .execute(&self.pool)
        .await
        .map_err(PurserError::from)?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_invoice_payment(
        &self,
        invoice_id: &str,
        provider: &str,
        provider_ref: &str,
        amount_cents: i64,
    ) -> PurserResult<bool> {
        let mut tx = self.pool.begin().await.map_err(PurserError::from)?;

        let existing = sqlx::query(
            "SELECT 1 FROM purser.billing_payments WHERE invoice_id = $1::uuid AND provider = $2 AND provider_ref = $3",
        )
        .bind(invoice_id)
        .bind(provider)
        .bind(provider_ref)
        .fetch_optional(&mut *tx)
        .await
        .map_err(PurserError::from)?;
        if existing.is_some() {
            tx.commit().await.map_err(PurserError::from)?;
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO purser.billing_payments (invoice_id, provider, provider_ref, amount_cents) \
             VALUES ($1::uuid, $2, $3, $4)",
        )
        .bind(invoice_id)
        .bind(provider)
        .bind(provider_ref)
        .bind(amount_cents)
        .execute(&mut *tx)
        .await
        .map_err(PurserError::from)?;

        let result = sqlx::query(
            "UPDATE purser.billing_invoices SET status = 'paid', paid_at = now() \
             WHERE id = $1::uuid AND status IN ('pending', 'overdue')",
        )
        .bind(invoice_id)
        .execute(&mut *tx)
        .await
        .map_err(PurserError::from)?;

        tx.commit().await.map_err(PurserError::from)?;
        Ok(result.rows_affected() > 0)
    }

    async fn has_effect(
        &self,
        tenant_id: &str,
        reference_type: &str,
        reference_id: &str,
        transaction_type: TransactionType,
    ) -> PurserResult<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM purser.balance_transactions \
             WHERE tenant_id = $1 AND reference_type = $2 AND reference_id = $3 AND transaction_type = $4",
        )
        .bind(tenant_id)
        .bind(reference_type)
        .bind(reference_id)
        .bind(transaction_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(PurserError::from)?;
        Ok(row.is_some())
    }

    async fn claim_and_credit_prepaid_topup(
        &self,
        reference_id: &str,
        tenant_id: &str,
        description: &str,
    ) -> PurserResult<PrepaidTopupOutcome> {
        let mut tx = self.pool.begin().await.map_err(PurserError::from)?;

        let topup = sqlx::query(
            "SELECT tenant_id, amount_cents, currency, status FROM purser.pending_topups \
             WHERE id = $1::uuid FOR UPDATE",
        )
        .bind(reference_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(PurserError::from)?;
        let Some(topup) = topup else {
            tx.commit().await.map_err(PurserError::from)?;
            return Ok(PrepaidTopupOutcome::NotFound);
        };
        let stored_tenant: String = topup.try_get("tenant_id").map_err(PurserError::from)?;
        if stored_tenant != tenant_id {
            tx.commit().await.map_err(PurserError::from)?;
            return Ok(PrepaidTopupOutcome::TenantMismatch);
        }
        let status: String = topup.try_get("status").map_err(PurserError::from)?;
        if status != "pending" {
            tx.commit().await.map_err(PurserError::from)?;
            return Ok(PrepaidTopupOutcome::AlreadyCompleted);
        }
        let amount_cents: i64 = topup.try_get("amount_cents").map_err(PurserError::from)?;
        let currency: String = topup.try_get("currency").map_err(PurserError::from)?;

        sqlx::query(
            "INSERT INTO purser.prepaid_balances (tenant_id, currency, balance_cents, updated_at) \
             VALUES ($1, $2, 0, now()) ON CONFLICT (tenant_id, currency) DO NOTHING",
        )
        .bind(tenant_id)
        .bind(&currency)
        .execute(&mut *tx)
        .await
        .map_err(PurserError::from)?;

        let balance_row = sqlx::query(
            "SELECT balance_cents FROM purser.prepaid_balances WHERE tenant_id = $1 AND currency = $2 FOR UPDATE",
        )
        .bind(tenant_id)
        .bind(&currency)
        .fetch_one(&mut *tx)
        .await
        .map_err(PurserError::from)?;
        let previous_balance_cents: i64 = balance_row.try_get("balance_cents").map_err(PurserError::from)?;
        let computed_balance_cents = previous_balance_cents + amount_cents;

        let transaction_id = Uuid::new_v4();
        let inserted = sqlx::query(
            "INSERT INTO purser.balance_transactions \
             (id, tenant_id, amount_cents, balance_after_cents, transaction_type, reference_type, reference_id, description, created_at) \
             VALUES ($1, $2, $3, $4, 'topup', 'prepaid_topup', $5, $6, $7) \
             ON CONFLICT (tenant_id, reference_type, reference_id, transaction_type) DO NOTHING \
             RETURNING id, balance_after_cents",
        )
        .bind(transaction_id)
        .bind(tenant_id)
        .bind(amount_cents)
        .bind(computed_balance_cents)
        .bind(reference_id)
        .bind(description)
        .bind(Utc::now())
        .fetch_optional(&mut *tx)
        .await
        .map_err(PurserError::from)?;

        let (balance_transaction_id, new_balance_cents) = match inserted {
            Some(row) => {
                let id: Uuid = row.try_get("id").map_err(PurserError::from)?;
                let balance_after: i64 = row.try_get("balance_after_cents").map_err(PurserError::from)?;
                sqlx::query(
                    "UPDATE purser.prepaid_balances SET balance_cents = $3, updated_at = now() \
                     WHERE tenant_id = $1 AND currency = $2",
                )
                .bind(tenant_id)
                .bind(&currency)
                .bind(balance_after)
                .execute(&mut *tx)
                .await
                .map_err(PurserError::from)?;
                (id, balance_after)
            }
            None => {
                // A prior delivery already credited this natural key and
                // crashed before marking `pending_topups` completed.
                let existing = sqlx::query(
                    "SELECT id, balance_after_cents FROM purser.balance_transactions \
                     WHERE tenant_id = $1 AND reference_type = 'prepaid_topup' AND reference_id = $2 AND transaction_type = 'topup'",
                )
                .bind(tenant_id)
                .bind(reference_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(PurserError::from)?;
                let id: Uuid = existing.try_get("id").map_err(PurserError::from)?;
                let balance_after: i64 = existing.try_get("balance_after_cents").map_err(PurserError::from)?;
                (id, balance_after)
            }
        };

        sqlx::query(
            "UPDATE purser.pending_topups SET status = 'completed', balance_transaction_id = $2 WHERE id = $1::uuid",
        )
        .bind(reference_id)
        .bind(balance_transaction_id)
        .execute(&mut *tx)
        .await
        .map_err(PurserError::from)?;

        sqlx::query(
            "UPDATE purser.tenant_subscriptions SET status = 'active' \
             WHERE tenant_id = $1 AND status = 'suspended'",
        )
        .bind(tenant_id)
        .execute(&mut *tx)
        .await
        .map_err(PurserError::from)?;

        tx.commit().await.map_err(PurserError::from)?;

        Ok(PrepaidTopupOutcome::Applied {
            amount_cents,
            currency,
            new_balance_cents,
        })
    }
}

fn status_db_name(status: SubscriptionStatus) -> &'static str {
    match status {
        SubscriptionStatus::Active => "active",
        SubscriptionStatus::Trialing => "trialing",
        SubscriptionStatus::Suspended => "suspended",
        SubscriptionStatus::Cancelled => "cancelled",
    }
}
