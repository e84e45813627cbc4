//! In-memory repository double for exercising [`crate::ledger::Ledger`]'s
//! business rules without a database, following the teacher's
//! `MockStorage` pattern (`daemon/src/core/tests/mock_storage.rs`).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use purser_common::model::{BillingModel, SubscriptionStatus};
use purser_common::PurserResult;

use crate::repo::{EffectOutcome, LedgerEffect, LedgerRepository, PrepaidTopupOutcome, TenantSnapshot};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NaturalKey {
    tenant_id: String,
    reference_type: String,
    reference_id: String,
    transaction_type: String,
}

pub struct MockLedgerRepository {
    inner: Mutex<MockState>,
}

struct MockState {
    balances: HashMap<(String, String), i64>,
    applied: HashMap<NaturalKey, i64>,
    tenants: HashMap<String, TenantSnapshot>,
    paid_invoices: HashMap<String, String>,
    topups: HashMap<String, MockTopup>,
}

struct MockTopup {
    tenant_id: String,
    amount_cents: i64,
    currency: String,
    completed: bool,
}

impl MockLedgerRepository {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MockState {
                balances: HashMap::new(),
                applied: HashMap::new(),
                tenants: HashMap::new(),
                paid_invoices: HashMap::new(),
                topups: HashMap::new(),
            }),
        }
    }

    pub fn seed_tenant(&self, tenant_id: &str, billing_model: BillingModel, status: SubscriptionStatus) {
        self.inner
            .lock()
            .unwrap()
            .tenants
            .insert(tenant_id.to_string(), TenantSnapshot { billing_model, status });
    }

    pub fn seed_pending_topup(&self, reference_id: &str, tenant_id: &str, amount_cents: i64, currency: &str) {
        self.inner.lock().unwrap().topups.insert(
            reference_id.to_string(),
            MockTopup {
                tenant_id: tenant_id.to_string(),
                amount_cents,
                currency: currency.to_string(),
                completed: false,
            },
        );
    }

    pub fn balance(&self, tenant_id: &str, currency: &str) -> i64 {
        *self
            .inner
            .lock()
            .unwrap()
            .balances
            .get(&(tenant_id.to_string(), currency.to_string()))
            .unwrap_or(&0)
    }

    pub fn status(&self, tenant_id: &str) -> Option<SubscriptionStatus> {
        self.inner.lock().unwrap().tenants.get(tenant_id).map(|s| s.status)
    }
}

impl Default for MockLedgerRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn db_name(transaction_type: purser_common::model::TransactionType) -> &'static str {
    use purser_common::model::TransactionType::*;
    match transaction_type {
        Topup => "topup",
        Debit => "debit",
        Reversal => "reversal",
        Adjustment => "adjustment",
        InvoiceCredit => "invoice_credit",
    }
}

#[async_trait]
impl LedgerRepository for MockLedgerRepository {
    async fn apply_effect(&self, effect: LedgerEffect) -> PurserResult<EffectOutcome> {
        let mut state = self.inner.lock().unwrap();
        let key = NaturalKey {
            tenant_id: effect.tenant_id.clone(),
            reference_type: effect.reference_type.clone(),
            reference_id: effect.reference_id.clone(),
            transaction_type: db_name(effect.transaction_type).to_string(),
        };
        if let Some(&balance_after) = state.applied.get(&key) {
            return Ok(EffectOutcome {
                previous_balance_cents: balance_after,
                new_balance_cents: balance_after,
                applied: false,
            });
        }

        let balance_key = (effect.tenant_id.clone(), effect.currency.clone());
        let previous = *state.balances.get(&balance_key).unwrap_or(&0);
        let new_balance = previous + effect.amount_cents;
        state.balances.insert(balance_key, new_balance);
        state.applied.insert(key, new_balance);

        Ok(EffectOutcome {
            previous_balance_cents: previous,
            new_balance_cents: new_balance,
            applied: true,
        })
    }

    async fn get_tenant_snapshot(&self, tenant_id: &str) -> PurserResult<Option<TenantSnapshot>> {
        Ok(self.inner.lock().unwrap().tenants.get(tenant_id).copied())
    }

    async fn transition_subscription(
        &self,
        tenant_id: &str,
        from: &[SubscriptionStatus],
        to: SubscriptionStatus,
    ) -> PurserResult<bool> {
        let mut state = self.inner.lock().unwrap();
        let Some(snapshot) = state.tenants.get_mut(tenant_id) else {
            return Ok(false);
        };
        if from.contains(&snapshot.status) {
            snapshot.status = to;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn record_invoice_payment(
        &self,
        invoice_id: &str,
        _provider: &str,
        provider_ref: &str,
        _amount_cents: i64,
    ) -> PurserResult<bool> {
        let mut state = self.inner.lock().unwrap();
        if state.paid_invoices.contains_key(invoice_id) {
            return Ok(false);
        }
        state.paid_invoices.insert(invoice_id.to_string(), provider_ref.to_string());
        Ok(true)
    }

    async fn has_effect(
        &self,
        tenant_id: &str,
        reference_type: &str,
        reference_id: &str,
        transaction_type: purser_common::model::TransactionType,
    ) -> PurserResult<bool> {
        let key = NaturalKey {
            tenant_id: tenant_id.to_string(),
            reference_type: reference_type.to_string(),
            reference_id: reference_id.to_string(),
            transaction_type: db_name(transaction_type).to_string(),
        };
        Ok(self.inner.lock().unwrap().applied.contains_key(&key))
    }

    async fn claim_and_credit_prepaid_topup(
        &self,
        reference_id: &str,
        tenant_id: &str,
        _description: &str,
    ) -> PurserResult<PrepaidTopupOutcome> {
        let mut state = self.inner.lock().unwrap();
        let Some(topup) = state.topups.get(reference_id) else {
            return Ok(PrepaidTopupOutcome::NotFound);
        };
        if topup.tenant_id != tenant_id {
            return Ok(PrepaidTopupOutcome::TenantMismatch);
        }
        if topup.completed {
            return Ok(PrepaidTopupOutcome::AlreadyCompleted);
        }
        let amount_cents = topup.amount_cents;
        let currency = topup.currency.clone();

        let balance_key = (tenant_id.to_string(), currency.clone());
        let previous = *state.balances.get(&balance_key).unwrap_or(&0);
        let new_balance = previous + amount_cents;
        state.balances.insert(balance_key, new_balance);

        if let Some(snapshot) = state.tenants.get_mut(tenant_id) {
            if snapshot.status == SubscriptionStatus::Suspended {
                snapshot.status = SubscriptionStatus::Active;
            }
        }
        state.topups.get_mut(reference_id).unwrap().completed = true;

        Ok(PrepaidTopupOutcome::Applied {
            amount_cents,
            currency,
            new_balance_cents: new_balance,
        })
    }
}
