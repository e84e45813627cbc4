//! Persistence for checkout-adjacent, non-Ledger-owned tables: dedupe log,
//! subscription upserts, and cluster grants. The pending top-up claim lives
//! on [`purser_ledger::Ledger`] instead, since it must share one transaction
//! with the Ledger-owned tables it also mutates (§4.5 step "prepaid").

use async_trait::async_trait;
use purser_common::model::SubscriptionStatus;
use purser_common::{PurserError, PurserResult};
use sqlx::{PgPool, Row};

#[async_trait]
pub trait CheckoutRepository: Send + Sync {
    /// `INSERT ... ON CONFLICT (provider, event_id) DO NOTHING`; returns
    /// whether this call actually inserted the row (§4.5 step 2).
    async fn record_webhook_event(&self, provider: &str, event_id: &str) -> PurserResult<bool>;

    async fn upsert_tenant_subscription(
        &self,
        tenant_id: &str,
        status: SubscriptionStatus,
        stripe_customer_id: Option<&str>,
        stripe_subscription_id: Option<&str>,
    ) -> PurserResult<()>;

    async fn upsert_cluster_subscription(
        &self,
        tenant_id: &str,
        cluster_id: &str,
        provider: &str,
        provider_ref: &str,
    ) -> PurserResult<()>;
}

pub struct PgCheckoutRepository {
    pool: PgPool,
}

impl PgCheckoutRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckoutRepository for PgCheckoutRepository {
    async fn record_webhook_event(&self, provider: &str, event_id: &str) -> PurserResult<bool> {
        let row = sqlx::query(
            "INSERT INTO purser.webhook_events (provider, event_id, received_at) VALUES ($1, $2, now()) \
             ON CONFLICT (provider, event_id) DO NOTHING RETURNING provider",
        )
        .bind(provider)
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(PurserError::from)?;
        Ok(row.is_some())
    }

    async fn upsert_tenant_subscription(
        &self,
        tenant_id: &str,
        status: SubscriptionStatus,
        stripe_customer_id: Option<&str>,
        stripe_subscription_id: Option<&str>,
    ) -> PurserResult<()> {
        sqlx::query(
            "INSERT INTO purser.tenant_subscriptions (tenant_id, status, stripe_customer_id, stripe_subscription_id) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (tenant_id) DO UPDATE SET \
             status = EXCLUDED.status, \
             stripe_customer_id = COALESCE(EXCLUDED.stripe_customer_id, purser.tenant_subscriptions.stripe_customer_id), \
             stripe_subscription_id = COALESCE(EXCLUDED.stripe_subscription_id, purser.tenant_subscriptions.stripe_subscription_id)",
        )
        .bind(tenant_id)
        .bind(status)
        .bind(stripe_customer_id)
        .bind(stripe_subscription_id)
        .execute(&self.pool)
        .await
        .map_err(PurserError::from)?;
        Ok(())
    }

    async fn upsert_cluster_subscription(
        &self,
        tenant_id: &str,
        cluster_id: &str,
        provider: &str,
        provider_ref: &str,
    ) -> PurserResult<()> {
        sqlx::query(
            "INSERT INTO purser.cluster_subscriptions (tenant_id, cluster_id, provider, provider_ref, status) \
             VALUES ($1, $2, $3, $4, 'active') \
             ON CONFLICT (tenant_id, cluster_id) DO UPDATE SET \
             provider = EXCLUDED.provider, provider_ref = EXCLUDED.provider_ref, status = 'active'",
        )
        .bind(tenant_id)
        .bind(cluster_id)
        .bind(provider)
        .bind(provider_ref)
        .execute(&self.pool)
        .await
        .map_err(PurserError::from)?;
        Ok(())
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    pub struct MockCheckoutRepository {
        inner: Mutex<State>,
    }

    #[derive(Default)]
    struct State {
        webhook_events: std::collections::HashSet<(String, String)>,
    }

    impl MockCheckoutRepository {
        pub fn new() -> Self {
            Self {
                inner: Mutex::new(State::default()),
            }
        }
    }

    impl Default for MockCheckoutRepository {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl CheckoutRepository for MockCheckoutRepository {
        async fn record_webhook_event(&self, provider: &str, event_id: &str) -> PurserResult<bool> {
            Ok(self
                .inner
                .lock()
                .unwrap()
                .webhook_events
                .insert((provider.to_string(), event_id.to_string())))
        }

        async fn upsert_tenant_subscription(
            &self,
            _tenant_id: &str,
            _status: SubscriptionStatus,
            _stripe_customer_id: Option<&str>,
            _stripe_subscription_id: Option<&str>,
        ) -> PurserResult<()> {
            Ok(())
        }

        async fn upsert_cluster_subscription(
            &self,
            _tenant_id: &str,
            _cluster_id: &str,
            _provider: &str,
            _provider_ref: &str,
        ) -> PurserResult<()> {
            Ok(())
        }
    }
}
