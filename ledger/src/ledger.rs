//! The Ledger service (§4.1): idempotent credit/debit over the prepaid
//! balance, with post-mutation threshold enforcement.

use std::sync::Arc;

use chrono::NaiveDate;
use purser_common::event::EventBus;
use purser_common::model::{BillingEvent, BillingModel, SubscriptionStatus, TransactionType};
use purser_common::{PurserError, PurserResult};
use uuid::Uuid;

use crate::collaborators::{Notifier, SessionManager, TenantCache};
use crate::repo::{LedgerEffect, LedgerRepository, PrepaidTopupOutcome};

/// Namespace used to derive the deterministic `invoice_credit` reference id
/// (§4.1 `applyInvoiceCredit`), so re-invocation for the same tenant/period
/// is a no-op rather than a fresh debit.
const INVOICE_CREDIT_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6f, 0x4e, 0x1c, 0x02, 0x6b, 0x7a, 0x4c, 0x3f, 0x9a, 0x5e, 0x0d, 0x3b, 0x7e, 0x92, 0xf1, 0x10,
]);

#[derive(Debug, Clone, Copy)]
pub struct ApplyOutcome {
    pub new_balance_cents: i64,
    pub applied: bool,
}

pub struct Ledger {
    repo: Arc<dyn LedgerRepository>,
    event_bus: Arc<dyn EventBus>,
    session_manager: Arc<dyn SessionManager>,
    tenant_cache: Arc<dyn TenantCache>,
    notifier: Arc<dyn Notifier>,
}

impl Ledger {
    pub fn new(
        repo: Arc<dyn LedgerRepository>,
        event_bus: Arc<dyn EventBus>,
        session_manager: Arc<dyn SessionManager>,
        tenant_cache: Arc<dyn TenantCache>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            repo,
            event_bus,
            session_manager,
            tenant_cache,
            notifier,
        }
    }

    pub async fn credit(
        &self,
        tenant_id: &str,
        currency: &str,
        amount_cents: i64,
        reference_type: &str,
        reference_id: &str,
        description: &str,
    ) -> PurserResult<ApplyOutcome> {
        if amount_cents <= 0 {
            return Err(PurserError::IntegrityViolation(format!(
                "credit amount must be positive, got {amount_cents}"
            )));
        }
        self.apply(LedgerEffect {
            tenant_id: tenant_id.to_string(),
            currency: currency.to_string(),
            amount_cents,
            transaction_type: TransactionType::Topup,
            reference_type: reference_type.to_string(),
            reference_id: reference_id.to_string(),
            description: description.to_string(),
        })
        .await
    }

    pub async fn debit(
        &self,
        tenant_id: &str,
        currency: &str,
        amount_cents: i64,
        transaction_type: TransactionType,
        reference_type: &str,
        reference_id: &str,
        description: &str,
    ) -> PurserResult<ApplyOutcome> {
        if amount_cents <= 0 {
            return Err(PurserError::IntegrityViolation(format!(
                "debit amount must be positive, got {amount_cents}"
            )));
        }
        self.apply(LedgerEffect {
            tenant_id: tenant_id.to_string(),
            currency: currency.to_string(),
            amount_cents: -amount_cents,
            transaction_type,
            reference_type: reference_type.to_string(),
            reference_id: reference_id.to_string(),
            description: description.to_string(),
        })
        .await
    }

    pub async fn deduct_for_usage(
        &self,
        tenant_id: &str,
        currency: &str,
        amount_cents: i64,
        reference_id: &str,
        description: &str,
    ) -> PurserResult<ApplyOutcome> {
        self.debit(
            tenant_id,
            currency,
            amount_cents,
            TransactionType::Debit,
            "usage",
            reference_id,
            description,
        )
        .await
    }

    pub async fn apply_invoice_credit(
        &self,
        tenant_id: &str,
        currency: &str,
        invoice_id: &str,
        amount_cents: i64,
        period_start: NaiveDate,
    ) -> PurserResult<ApplyOutcome> {
        if amount_cents <= 0 {
            return Err(PurserError::IntegrityViolation(format!(
                "invoice credit amount must be positive, got {amount_cents}"
            )));
        }
        let seed = format!("{tenant_id}:{period_start}");
        let reference_id = Uuid::new_v5(&INVOICE_CREDIT_NAMESPACE, seed.as_bytes()).to_string();
        self.apply(LedgerEffect {
            tenant_id: tenant_id.to_string(),
            currency: currency.to_string(),
            amount_cents: -amount_cents,
            transaction_type: TransactionType::InvoiceCredit,
            reference_type: "invoice_credit".to_string(),
            reference_id,
            description: format!("invoice {invoice_id} period {period_start}"),
        })
        .await
    }

    /// Records a payment and transitions an invoice to `paid` (§4.4 step 6,
    /// §4.5 `invoice` purpose). Idempotent on `(provider, provider_ref)`.
    pub async fn mark_invoice_paid(
        &self,
        tenant_id: &str,
        invoice_id: &str,
        provider: &str,
        provider_ref: &str,
        amount_cents: i64,
    ) -> PurserResult<bool> {
        let applied = self
            .repo
            .record_invoice_payment(invoice_id, provider, provider_ref, amount_cents)
            .await?;
        if applied {
            self.event_bus
                .publish(
                    BillingEvent::new("invoice.paid", tenant_id)
                        .with_resource("invoice", invoice_id),
                )
                .await;
            self.notifier.notify_payment_success(tenant_id, invoice_id).await;
        }
        Ok(applied)
    }

    /// Exposes the natural-key idempotency check to collaborators that need
    /// to know whether an effect already landed (§4.7 reconciler passes)
    /// without granting them direct repository access.
    pub async fn has_effect(
        &self,
        tenant_id: &str,
        reference_type: &str,
        reference_id: &str,
        transaction_type: TransactionType,
    ) -> PurserResult<bool> {
        self.repo.has_effect(tenant_id, reference_type, reference_id, transaction_type).await
    }

    /// Unsuspends a tenant. Only called explicitly from the prepaid
    /// top-up completion path (§4.1: "no auto-unsuspend on partial
    /// recovery"); never invoked from [`Ledger::enforce_thresholds`].
    pub async fn unsuspend(&self, tenant_id: &str) -> PurserResult<bool> {
        self.repo
            .transition_subscription(tenant_id, &[SubscriptionStatus::Suspended], SubscriptionStatus::Active)
            .await
    }

    /// §4.5 step 3 "prepaid": claims the pending top-up, credits the
    /// balance, stamps the row with the resulting transaction id, and
    /// unsuspends the tenant, all within the one transaction
    /// [`LedgerRepository::claim_and_credit_prepaid_topup`] opens. A crash
    /// between those writes is impossible by construction, so a webhook
    /// redelivery either finds the row still `pending` or already
    /// `completed` — never a gap where the credit landed but the claim
    /// didn't.
    pub async fn complete_prepaid_topup(
        &self,
        tenant_id: &str,
        reference_id: &str,
        description: &str,
    ) -> PurserResult<PrepaidTopupOutcome> {
        let outcome = self.repo.claim_and_credit_prepaid_topup(reference_id, tenant_id, description).await?;
        if let PrepaidTopupOutcome::Applied { new_balance_cents, .. } = &outcome {
            self.event_bus
                .publish(BillingEvent::new("topup_credited", tenant_id).with_resource("pending_topup", reference_id))
                .await;
            if *new_balance_cents > 0 {
                self.tenant_cache.invalidate(tenant_id).await;
            }
        }
        Ok(outcome)
    }

    async fn apply(&self, effect: LedgerEffect) -> PurserResult<ApplyOutcome> {
        let tenant_id = effect.tenant_id.clone();
        let transaction_type = effect.transaction_type;
        let outcome = self.repo.apply_effect(effect).await?;

        if outcome.applied {
            if matches!(transaction_type, TransactionType::Topup | TransactionType::InvoiceCredit) {
                let _ = self
                    .repo
                    .transition_subscription(&tenant_id, &[SubscriptionStatus::Trialing], SubscriptionStatus::Active)
                    .await;
            }
            self.enforce_thresholds(&tenant_id, outcome.previous_balance_cents, outcome.new_balance_cents)
                .await?;
        }

        Ok(ApplyOutcome {
            new_balance_cents: outcome.new_balance_cents,
            applied: outcome.applied,
        })
    }

    /// Post-mutation callback (§4.1 "enforceThresholds"). Zero-crossing
    /// always fires before suspension; suspension is monotone.
    async fn enforce_thresholds(&self, tenant_id: &str, previous: i64, new: i64) -> PurserResult<()> {
        let Some(snapshot) = self.repo.get_tenant_snapshot(tenant_id).await? else {
            return Ok(());
        };
        if snapshot.billing_model != BillingModel::Prepaid {
            return Ok(());
        }

        if previous > 0 && new <= 0 {
            self.tenant_cache.invalidate(tenant_id).await;
        }

        if new < purser_common::model::SUSPENSION_CENTS && snapshot.status == SubscriptionStatus::Active {
            let transitioned = self
                .repo
                .transition_subscription(tenant_id, &[SubscriptionStatus::Active], SubscriptionStatus::Suspended)
                .await?;
            if transitioned {
                self.event_bus
                    .publish(
                        BillingEvent::new("subscription.suspended", tenant_id)
                            .with_resource("subscription", tenant_id),
                    )
                    .await;
                self.session_manager
                    .terminate_sessions(tenant_id, "insufficient_balance")
                    .await;
                self.notifier.notify_suspension(tenant_id).await;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockLedgerRepository;
    use purser_common::event::InProcessEventBus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSessionManager {
        terminations: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl SessionManager for CountingSessionManager {
        async fn terminate_sessions(&self, _tenant_id: &str, _reason: &str) {
            self.terminations.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct CountingTenantCache {
        invalidations: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl TenantCache for CountingTenantCache {
        async fn invalidate(&self, _tenant_id: &str) {
            self.invalidations.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct NoopNotifier;

    #[async_trait::async_trait]
    impl Notifier for NoopNotifier {
        async fn notify_suspension(&self, _tenant_id: &str) {}
        async fn notify_payment_success(&self, _tenant_id: &str, _invoice_id: &str) {}
    }

    fn build(
        repo: Arc<MockLedgerRepository>,
    ) -> (Ledger, Arc<CountingSessionManager>, Arc<CountingTenantCache>) {
        let sessions = Arc::new(CountingSessionManager {
            terminations: AtomicUsize::new(0),
        });
        let cache = Arc::new(CountingTenantCache {
            invalidations: AtomicUsize::new(0),
        });
        let ledger = Ledger::new(
            repo,
            Arc::new(InProcessEventBus::default()),
            sessions.clone(),
            cache.clone(),
            Arc::new(NoopNotifier),
        );
        (ledger, sessions, cache)
    }

    #[tokio::test]
    async fn duplicate_credit_is_a_no_op() {
        let repo = Arc::new(MockLedgerRepository::new());
        repo.seed_tenant("t1", BillingModel::Prepaid, SubscriptionStatus::Active);
        let (ledger, _sessions, _cache) = build(repo.clone());

        let first = ledger.credit("t1", "EUR", 2500, "topup", "tp1", "top-up").await.unwrap();
        assert!(first.applied);
        assert_eq!(first.new_balance_cents, 2500);

        let second = ledger.credit("t1", "EUR", 2500, "topup", "tp1", "top-up").await.unwrap();
        assert!(!second.applied);
        assert_eq!(second.new_balance_cents, 2500);
        assert_eq!(repo.balance("t1", "EUR"), 2500);
    }

    #[tokio::test]
    async fn suspension_fires_once_below_threshold() {
        let repo = Arc::new(MockLedgerRepository::new());
        repo.seed_tenant("t2", BillingModel::Prepaid, SubscriptionStatus::Active);
        // Pre-load a positive balance via a topup so the subsequent debit
        // crosses the suspension threshold (mirrors scenario 4 in §8).
        let (ledger, sessions, cache) = build(repo.clone());
        ledger.credit("t2", "EUR", 200, "topup", "tp-seed", "seed").await.unwrap();

        let outcome = ledger
            .debit("t2", "EUR", 1500, TransactionType::Debit, "usage", "u1", "usage")
            .await
            .unwrap();
        assert_eq!(outcome.new_balance_cents, -1300);
        assert_eq!(repo.status("t2"), Some(SubscriptionStatus::Suspended));
        assert_eq!(sessions.terminations.load(Ordering::SeqCst), 1);
        assert_eq!(cache.invalidations.load(Ordering::SeqCst), 1);

        // A later top-up must not auto-unsuspend.
        let topup = ledger.credit("t2", "EUR", 3000, "topup", "tp9", "top-up").await.unwrap();
        assert_eq!(topup.new_balance_cents, 1700);
        assert_eq!(repo.status("t2"), Some(SubscriptionStatus::Suspended));

        assert!(ledger.unsuspend("t2").await.unwrap());
        assert_eq!(repo.status("t2"), Some(SubscriptionStatus::Active));
    }

    #[tokio::test]
    async fn invoice_credit_is_idempotent_per_period() {
        let repo = Arc::new(MockLedgerRepository::new());
        repo.seed_tenant("t3", BillingModel::Prepaid, SubscriptionStatus::Active);
        let (ledger, _sessions, _cache) = build(repo.clone());
        ledger.credit("t3", "EUR", 5000, "topup", "seed", "seed").await.unwrap();

        let period_start = chrono::NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        let first = ledger
            .apply_invoice_credit("t3", "EUR", "inv-1", 1200, period_start)
            .await
            .unwrap();
        assert!(first.applied);
        assert_eq!(first.new_balance_cents, 3800);

        let second = ledger
            .apply_invoice_credit("t3", "EUR", "inv-1", 1200, period_start)
            .await
            .unwrap();
        assert!(!second.applied);
        assert_eq!(repo.balance("t3", "EUR"), 3800);
    }

    #[tokio::test]
    async fn rejects_non_positive_amounts() {
        let repo = Arc::new(MockLedgerRepository::new());
        repo.seed_tenant("t4", BillingModel::Prepaid, SubscriptionStatus::Active);
        let (ledger, _sessions, _cache) = build(repo);
        assert!(ledger.credit("t4", "EUR", 0, "topup", "x", "x").await.is_err());
        assert!(ledger
            .debit("t4", "EUR", -5, TransactionType::Debit, "usage", "x", "x")
            .await
            .is_err());
    }
}
