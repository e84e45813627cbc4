//! Periodic invoice generation and overdue sweeping. Grounded on the same
//! Postgres-trait-plus-mock shape as [`crate::repo`]; kept as its own trait
//! because it touches `tenant_subscriptions`/`billing_tiers`/
//! `billing_invoices` columns `apply_effect` never needs to read.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use purser_common::event::EventBus;
use purser_common::model::{BillingEvent, BillingPeriod, BillingTier, TenantSubscription};
use purser_common::{PurserError, PurserResult};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use uuid::Uuid;

/// Grace period between an invoice's issue date and its due date.
pub const INVOICE_DUE_IN_DAYS: i64 = 14;

#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    /// Subscriptions (any status but `cancelled`) whose `next_billing_date`
    /// has arrived.
    async fn due_tenants(&self, now: DateTime<Utc>) -> PurserResult<Vec<TenantSubscription>>;

    async fn get_tier(&self, tier_id: &str) -> PurserResult<Option<BillingTier>>;

    /// Inserts a `pending` invoice for the tier's base price and returns its id.
    async fn create_invoice(
        &self,
        tenant_id: &str,
        base_amount_cents: i64,
        currency: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        due_date: DateTime<Utc>,
    ) -> PurserResult<String>;

    async fn advance_next_billing_date(&self, tenant_id: &str, next_billing_date: DateTime<Utc>) -> PurserResult<()>;

    /// Transitions `pending` invoices past `due_date` to `overdue`, returning
    /// the transitioned invoice ids for the reminder notification.
    async fn mark_overdue(&self, now: DateTime<Utc>) -> PurserResult<Vec<String>>;
}

pub struct PgInvoiceRepository {
    pool: PgPool,
}

impl PgInvoiceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InvoiceRepository for PgInvoiceRepository {
    async fn due_tenants(&self, now: DateTime<Utc>) -> PurserResult<Vec<TenantSubscription>> {
        let rows = sqlx::query(
            "SELECT tenant_id, tier_id, status, billing_model, billing_email, billing_street, \
             billing_city, billing_postal_code, billing_country, tax_id, next_billing_date, \
             stripe_customer_id, stripe_subscription_id, x402_address_index \
             FROM purser.tenant_subscriptions \
             WHERE status != 'cancelled' AND next_billing_date <= $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(PurserError::from)?;

        rows.into_iter()
            .map(|row| {
                Ok(TenantSubscription {
                    tenant_id: row.try_get("tenant_id").map_err(PurserError::from)?,
                    tier_id: row.try_get("tier_id").map_err(PurserError::from)?,
                    status: row.try_get("status").map_err(PurserError::from)?,
                    billing_model: row.try_get("billing_model").map_err(PurserError::from)?,
                    billing_email: row.try_get("billing_email").map_err(PurserError::from)?,
                    billing_address: purser_common::model::BillingAddress {
                        street: row.try_get("billing_street").map_err(PurserError::from)?,
                        city: row.try_get("billing_city").map_err(PurserError::from)?,
                        postal_code: row.try_get("billing_postal_code").map_err(PurserError::from)?,
                        country: row.try_get("billing_country").map_err(PurserError::from)?,
                    },
                    tax_id: row.try_get("tax_id").map_err(PurserError::from)?,
                    next_billing_date: row.try_get("next_billing_date").map_err(PurserError::from)?,
                    stripe_customer_id: row.try_get("stripe_customer_id").map_err(PurserError::from)?,
                    stripe_subscription_id: row.try_get("stripe_subscription_id").map_err(PurserError::from)?,
                    x402_address_index: row.try_get("x402_address_index").map_err(PurserError::from)?,
                })
            })
            .collect()
    }

    async fn get_tier(&self, tier_id: &str) -> PurserResult<Option<BillingTier>> {
        let row = sqlx::query(
            "SELECT id, tier_name, base_price_cents, currency, billing_period, metering_enabled, \
             bandwidth_alloc, storage_alloc, compute_alloc, \
             bandwidth_overage_cents, storage_overage_cents, compute_overage_cents \
             FROM purser.billing_tiers WHERE id = $1",
        )
        .bind(tier_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(PurserError::from)?;

        let Some(row) = row else { return Ok(None) };
        Ok(Some(BillingTier {
            id: row.try_get("id").map_err(PurserError::from)?,
            tier_name: row.try_get("tier_name").map_err(PurserError::from)?,
            base_price_cents: row.try_get("base_price_cents").map_err(PurserError::from)?,
            currency: row.try_get("currency").map_err(PurserError::from)?,
            billing_period: row.try_get("billing_period").map_err(PurserError::from)?,
            metering_enabled: row.try_get("metering_enabled").map_err(PurserError::from)?,
            allocations: purser_common::model::TierAllocations {
                bandwidth: row.try_get("bandwidth_alloc").map_err(PurserError::from)?,
                storage: row.try_get("storage_alloc").map_err(PurserError::from)?,
                compute: row.try_get("compute_alloc").map_err(PurserError::from)?,
            },
            overage_rates: purser_common::model::OverageRates {
                bandwidth_cents: row.try_get("bandwidth_overage_cents").map_err(PurserError::from)?,
                storage_cents: row.try_get("storage_overage_cents").map_err(PurserError::from)?,
                compute_cents: row.try_get("compute_overage_cents").map_err(PurserError::from)?,
            },
        }))
    }

    async fn create_invoice(
        &self,
        tenant_id: &str,
        base_amount_cents: i64,
        currency: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        due_date: DateTime<Utc>,
    ) -> PurserResult<String> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO purser.billing_invoices \
             (id, tenant_id, base_amount_cents, metered_amount_cents, currency, status, due_date, period_start, period_end) \
             VALUES ($1, $2, $3, 0, $4, 'pending', $5, $6, $7)",
        )
        .bind(id)
        .bind(tenant_id)
        .bind(base_amount_cents)
        .bind(currency)
        .bind(due_date)
        .bind(period_start)
        .bind(period_end)
        .execute(&self.pool)
        .await
        .map_err(PurserError::from)?;
        Ok(id.to_string())
    }

    async fn advance_next_billing_date(&self, tenant_id: &str, next_billing_date: DateTime<Utc>) -> PurserResult<()> {
        sqlx::query("UPDATE purser.tenant_subscriptions SET next_billing_date = $2, updated_at = now() WHERE tenant_id = $1")
            .bind(tenant_id)
            .bind(next_billing_date)
            .execute(&self.pool)
            .await
            .map_err(PurserError::from)?;
        Ok(())
    }

    async fn mark_overdue(&self, now: DateTime<Utc>) -> PurserResult<Vec<String>> {
        let rows = sqlx::query(
            "UPDATE purser.billing_invoices SET status = 'overdue' \
             WHERE status = 'pending' AND due_date < $1 RETURNING id",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(PurserError::from)?;
        rows.into_iter()
            .map(|row| row.try_get::<Uuid, _>("id").map(|id| id.to_string()).map_err(PurserError::from))
            .collect()
    }
}

fn period_length(period: BillingPeriod) -> Duration {
    match period {
        BillingPeriod::Monthly => Duration::days(30),
        BillingPeriod::Yearly => Duration::days(365),
    }
}

/// Drives the two scheduled sweeps the daemon's `InvoiceJobs` task invokes:
/// drafting the next period's invoice for every tenant whose billing date
/// has arrived, and flagging unpaid invoices past their due date.
pub struct InvoiceGenerator {
    repo: Arc<dyn InvoiceRepository>,
    event_bus: Arc<dyn EventBus>,
}

impl InvoiceGenerator {
    pub fn new(repo: Arc<dyn InvoiceRepository>, event_bus: Arc<dyn EventBus>) -> Self {
        Self { repo, event_bus }
    }

    /// Creates one invoice per due tenant and rolls `next_billing_date`
    /// forward by the tier's billing period. A tier lookup miss is logged
    /// and the tenant is skipped rather than failing the whole sweep.
    pub async fn generate_due_invoices(&self, now: DateTime<Utc>) -> PurserResult<usize> {
        let tenants = self.repo.due_tenants(now).await?;
        let mut created = 0;
        for tenant in tenants {
            let Some(tier) = self.repo.get_tier(&tenant.tier_id).await? else {
                log::warn!("tenant {} references unknown tier {}, skipping invoice", tenant.tenant_id, tenant.tier_id);
                continue;
            };
            let period_end = tenant.next_billing_date + period_length(tier.billing_period);
            let invoice_id = self
                .repo
                .create_invoice(
                    &tenant.tenant_id,
                    tier.base_price_cents,
                    &tier.currency,
                    tenant.next_billing_date,
                    period_end,
                    now + Duration::days(INVOICE_DUE_IN_DAYS),
                )
                .await?;
            self.repo.advance_next_billing_date(&tenant.tenant_id, period_end).await?;
            self.event_bus
                .publish(
                    BillingEvent::new("invoice_created", tenant.tenant_id.as_str())
                        .with_resource("invoice", invoice_id.as_str()),
                )
                .await;
            created += 1;
        }
        Ok(created)
    }

    pub async fn sweep_overdue(&self, now: DateTime<Utc>) -> PurserResult<usize> {
        let overdue = self.repo.mark_overdue(now).await?;
        for invoice_id in &overdue {
            self.event_bus
                .publish(BillingEvent::new("invoice_overdue", "").with_resource("invoice", invoice_id.as_str()))
                .await;
        }
        Ok(overdue.len())
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    pub struct MockInvoiceRepository {
        inner: Mutex<State>,
    }

    struct State {
        tenants: HashMap<String, TenantSubscription>,
        tiers: HashMap<String, BillingTier>,
        invoices: HashMap<String, (DateTime<Utc>, purser_common::model::InvoiceStatus)>,
    }

    impl MockInvoiceRepository {
        pub fn new() -> Self {
            Self {
                inner: Mutex::new(State {
                    tenants: HashMap::new(),
                    tiers: HashMap::new(),
                    invoices: HashMap::new(),
                }),
            }
        }

        pub fn seed_tenant(&self, tenant: TenantSubscription) {
            self.inner.lock().unwrap().tenants.insert(tenant.tenant_id.clone(), tenant);
        }

        pub fn seed_tier(&self, tier: BillingTier) {
            self.inner.lock().unwrap().tiers.insert(tier.id.clone(), tier);
        }

        pub fn invoice_count(&self) -> usize {
            self.inner.lock().unwrap().invoices.len()
        }
    }

    impl Default for MockInvoiceRepository {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl InvoiceRepository for MockInvoiceRepository {
        async fn due_tenants(&self, now: DateTime<Utc>) -> PurserResult<Vec<TenantSubscription>> {
            Ok(self
                .inner
                .lock()
                .unwrap()
                .tenants
                .values()
                .filter(|t| t.status != purser_common::model::SubscriptionStatus::Cancelled && t.next_billing_date <= now)
                .cloned()
                .collect())
        }

        async fn get_tier(&self, tier_id: &str) -> PurserResult<Option<BillingTier>> {
            Ok(self.inner.lock().unwrap().tiers.get(tier_id).cloned())
        }

        async fn create_invoice(
            &self,
            _tenant_id: &str,
            _base_amount_cents: i64,
            _currency: &str,
            _period_start: DateTime<Utc>,
            _period_end: DateTime<Utc>,
            due_date: DateTime<Utc>,
        ) -> PurserResult<String> {
            let id = Uuid::new_v4().to_string();
            self.inner
                .lock()
                .unwrap()
                .invoices
                .insert(id.clone(), (due_date, purser_common::model::InvoiceStatus::Pending));
            Ok(id)
        }

        async fn advance_next_billing_date(&self, tenant_id: &str, next_billing_date: DateTime<Utc>) -> PurserResult<()> {
            if let Some(tenant) = self.inner.lock().unwrap().tenants.get_mut(tenant_id) {
                tenant.next_billing_date = next_billing_date;
            }
            Ok(())
        }

        async fn mark_overdue(&self, now: DateTime<Utc>) -> PurserResult<Vec<String>> {
            let mut state = self.inner.lock().unwrap();
            let mut overdue = Vec::new();
            for (id, (due_date, status)) in state.invoices.iter_mut() {
                if *status == purser_common::model::InvoiceStatus::Pending && *due_date < now {
                    *status = purser_common::model::InvoiceStatus::Overdue;
                    overdue.push(id.clone());
                }
            }
            Ok(overdue)
        }
    }

    #[tokio::test]
    async fn generates_one_invoice_per_due_tenant_and_rolls_billing_date() {
        use purser_common::event::InProcessEventBus;

        let repo = Arc::new(MockInvoiceRepository::new());
        repo.seed_tier(BillingTier {
            id: "starter".to_string(),
            tier_name: "Starter".to_string(),
            base_price_cents: 2900,
            currency: "EUR".to_string(),
            billing_period: BillingPeriod::Monthly,
            metering_enabled: false,
            allocations: Default::default(),
            overage_rates: Default::default(),
        });
        let now = DateTime::parse_from_rfc3339("2026-07-28T00:00:00Z").unwrap().with_timezone(&Utc);
        repo.seed_tenant(TenantSubscription {
            tenant_id: "T1".to_string(),
            tier_id: "starter".to_string(),
            status: purser_common::model::SubscriptionStatus::Active,
            billing_model: purser_common::model::BillingModel::Postpaid,
            billing_email: "billing@example.com".to_string(),
            billing_address: Default::default(),
            tax_id: None,
            next_billing_date: now,
            stripe_customer_id: None,
            stripe_subscription_id: None,
            x402_address_index: None,
        });

        let generator = InvoiceGenerator::new(repo.clone(), Arc::new(InProcessEventBus::default()));
        let created = generator.generate_due_invoices(now).await.unwrap();
        assert_eq!(created, 1);
        assert_eq!(repo.invoice_count(), 1);
    }
}
