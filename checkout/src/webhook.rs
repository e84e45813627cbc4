//! WebhookIngress (§4.5): verify, deduplicate, and purpose-route provider
//! webhooks. Every dispatch arm that mutates Ledger-owned state goes
//! through [`purser_ledger::Ledger`] rather than writing rows directly
//! (§3 "Ownership rules").

use std::sync::Arc;

use purser_common::model::SubscriptionStatus;
use purser_common::webhook::{verify_stripe_signature, WebhookSignatureError};
use purser_common::PurserError;
use purser_ledger::{Ledger, PrepaidTopupOutcome};
use serde::Deserialize;
use thiserror::Error;

use crate::collaborators::ClusterAccessGrantor;
use crate::provider::{CheckoutPurpose, MollieClient};
use crate::repo::CheckoutRepository;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error(transparent)]
    Signature(#[from] WebhookSignatureError),
    #[error("malformed webhook payload: {0}")]
    Malformed(String),
    #[error("tenant mismatch between session metadata and pending_topup — possible integrity violation")]
    TenantMismatch,
    #[error(transparent)]
    Purser(#[from] PurserError),
    #[error(transparent)]
    Provider(#[from] crate::provider::CheckoutProviderError),
}

/// Stripe's `checkout.session.completed` (and legacy `invoice.payment_succeeded`)
/// envelope, narrowed to the fields this service reads.
#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: StripeEventObject,
}

#[derive(Debug, Deserialize)]
struct StripeEventObject {
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    metadata: std::collections::HashMap<String, String>,
    #[serde(default)]
    amount_total: Option<i64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    customer: Option<String>,
    #[serde(default)]
    subscription: Option<String>,
}

pub struct WebhookIngress {
    stripe_secret: Option<Vec<u8>>,
    mollie: Option<Arc<MollieClient>>,
    repo: Arc<dyn CheckoutRepository>,
    ledger: Arc<Ledger>,
    cluster_access: Arc<dyn ClusterAccessGrantor>,
}

impl WebhookIngress {
    pub fn new(
        stripe_secret: Option<Vec<u8>>,
        mollie: Option<Arc<MollieClient>>,
        repo: Arc<dyn CheckoutRepository>,
        ledger: Arc<Ledger>,
        cluster_access: Arc<dyn ClusterAccessGrantor>,
    ) -> Self {
        Self {
            stripe_secret,
            mollie,
            repo,
            ledger,
            cluster_access,
        }
    }

    /// §4.5 steps 1-3 for Stripe. Fails closed: `Err(Signature(MissingSecret))`
    /// is the caller's cue to return HTTP 503, not skip verification.
    pub async fn handle_stripe_webhook(
        &self,
        raw_body: &str,
        signature_header: &str,
        now_unix: i64,
    ) -> Result<(), WebhookError> {
        verify_stripe_signature(self.stripe_secret.as_deref(), signature_header, raw_body, now_unix)?;

        let event: StripeEvent =
            serde_json::from_str(raw_body).map_err(|e| WebhookError::Malformed(e.to_string()))?;

        if !self.repo.record_webhook_event("stripe", &event.id).await? {
            return Ok(()); // already processed — §4.5 step 2 dedupe.
        }

        let object = event.data.object;
        let purpose = resolve_purpose(&object.metadata, object.mode.as_deref());
        let tenant_id = object
            .metadata
            .get("tenant_id")
            .ok_or_else(|| WebhookError::Malformed("missing tenant_id in metadata".to_string()))?;
        let reference_id = object.metadata.get("reference_id").cloned().unwrap_or_else(|| event.id.clone());
        let amount_cents = object.amount_total.unwrap_or(0);

        self.dispatch(
            purpose,
            tenant_id,
            &reference_id,
            object.metadata.get("cluster_id").map(String::as_str),
            amount_cents,
            "stripe",
            &event.id,
            object.customer.as_deref(),
            object.subscription.as_deref(),
        )
        .await?;

        let _ = event.event_type; // routing already derived from mode/metadata, not the type string.
        Ok(())
    }

    /// §4.5 / §6: Mollie webhooks carry only a payment id; the state must be
    /// fetched back from the Mollie API before acting on it.
    pub async fn handle_mollie_webhook(&self, payment_id: &str) -> Result<(), WebhookError> {
        let mollie = self.mollie.as_ref().ok_or(WebhookError::Provider(
            crate::provider::CheckoutProviderError::NotConfigured,
        ))?;
        let payment = mollie.get_payment(payment_id).await?;
        if payment.status != "paid" {
            return Ok(());
        }

        if !self.repo.record_webhook_event("mollie", &payment.id).await? {
            return Ok(());
        }

        let metadata = payment.metadata.unwrap_or_default();
        let purpose = resolve_purpose(&metadata, None);
        let tenant_id = metadata
            .get("tenant_id")
            .ok_or_else(|| WebhookError::Malformed("missing tenant_id in metadata".to_string()))?;
        let reference_id = metadata.get("reference_id").cloned().unwrap_or_else(|| payment.id.clone());
        let amount_cents = (payment.amount.value.parse::<f64>().unwrap_or(0.0) * 100.0).round() as i64;

        self.dispatch(
            purpose,
            tenant_id,
            &reference_id,
            metadata.get("cluster_id").map(String::as_str),
            amount_cents,
            "mollie",
            &payment.id,
            None,
            None,
        )
        .await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch(
        &self,
        purpose: CheckoutPurpose,
        tenant_id: &str,
        reference_id: &str,
        cluster_id: Option<&str>,
        amount_cents: i64,
        provider: &str,
        provider_ref: &str,
        stripe_customer_id: Option<&str>,
        stripe_subscription_id: Option<&str>,
    ) -> Result<(), WebhookError> {
        match purpose {
            CheckoutPurpose::Subscription => {
                self.repo
                    .upsert_tenant_subscription(
                        tenant_id,
                        SubscriptionStatus::Active,
                        stripe_customer_id,
                        stripe_subscription_id,
                    )
                    .await?;
            }
            CheckoutPurpose::ClusterSubscription => {
                let Some(cluster_id) = cluster_id else {
                    return Err(WebhookError::Malformed("cluster_subscription purpose missing cluster_id".to_string()));
                };
                self.repo
                    .upsert_cluster_subscription(tenant_id, cluster_id, provider, provider_ref)
                    .await?;
                self.cluster_access.grant_access(tenant_id, cluster_id).await;
            }
            CheckoutPurpose::Invoice => {
                self.ledger
                    .mark_invoice_paid(tenant_id, reference_id, provider, provider_ref, amount_cents)
                    .await?;
            }
            CheckoutPurpose::Prepaid => {
                self.complete_prepaid_topup(tenant_id, reference_id).await?;
            }
        }
        Ok(())
    }

    /// Delegates to [`purser_ledger::Ledger::complete_prepaid_topup`], which
    /// claims the row, credits the balance, stamps the transaction id, and
    /// unsuspends the tenant in one transaction (§4.5 step "prepaid").
    async fn complete_prepaid_topup(&self, tenant_id: &str, reference_id: &str) -> Result<(), WebhookError> {
        match self.ledger.complete_prepaid_topup(tenant_id, reference_id, "prepaid top-up").await? {
            PrepaidTopupOutcome::NotFound => Err(WebhookError::Malformed(format!("no pending_topup {reference_id}"))),
            PrepaidTopupOutcome::TenantMismatch => Err(WebhookError::TenantMismatch),
            PrepaidTopupOutcome::AlreadyCompleted => Ok(()),
            PrepaidTopupOutcome::Applied { .. } => Ok(()),
        }
    }
}

/// §4.5 step 3: explicit `purpose` metadata wins; fall back to `subscription`
/// for `mode == subscription`, else `invoice` for legacy events.
fn resolve_purpose(metadata: &std::collections::HashMap<String, String>, mode: Option<&str>) -> CheckoutPurpose {
    match metadata.get("purpose").map(String::as_str) {
        Some("subscription") => CheckoutPurpose::Subscription,
        Some("cluster_subscription") => CheckoutPurpose::ClusterSubscription,
        Some("invoice") => CheckoutPurpose::Invoice,
        Some("prepaid") => CheckoutPurpose::Prepaid,
        _ if mode == Some("subscription") => CheckoutPurpose::Subscription,
        _ => CheckoutPurpose::Invoice,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::testing::MockCheckoutRepository;
    use purser_common::event::InProcessEventBus;
    use purser_ledger::testing::MockLedgerRepository;
    use purser_ledger::{LoggingNotifier, LoggingSessionManager, LoggingTenantCache};

    struct NoopClusterAccess;

    #[async_trait::async_trait]
    impl ClusterAccessGrantor for NoopClusterAccess {
        async fn grant_access(&self, _tenant_id: &str, _cluster_id: &str) {}
    }

    fn build() -> (WebhookIngress, Arc<MockCheckoutRepository>, Arc<MockLedgerRepository>) {
        let checkout_repo = Arc::new(MockCheckoutRepository::new());
        let ledger_repo = Arc::new(MockLedgerRepository::new());
        ledger_repo.seed_tenant("T1", purser_common::model::BillingModel::Prepaid, purser_common::model::SubscriptionStatus::Active);
        let ledger = Arc::new(Ledger::new(
            ledger_repo.clone(),
            Arc::new(InProcessEventBus::default()),
            Arc::new(LoggingSessionManager),
            Arc::new(LoggingTenantCache),
            Arc::new(LoggingNotifier),
        ));
        let ingress = WebhookIngress::new(
            Some(b"whsec_test".to_vec()),
            None,
            checkout_repo.clone(),
            ledger,
            Arc::new(NoopClusterAccess),
        );
        (ingress, checkout_repo, ledger_repo)
    }

    #[tokio::test]
    async fn missing_secret_is_rejected_closed() {
        let (mut ingress, _repo, _ledger) = build();
        ingress.stripe_secret = None;
        let err = ingress.handle_stripe_webhook("{}", "t=1,v1=x", 1).await.unwrap_err();
        assert!(matches!(err, WebhookError::Signature(WebhookSignatureError::MissingSecret)));
    }

    #[tokio::test]
    async fn prepaid_topup_credits_ledger_and_completes_once() {
        let (ingress, _repo, ledger_repo) = build();
        ledger_repo.seed_pending_topup("tp1", "T1", 2500, "EUR");

        ingress.complete_prepaid_topup("T1", "tp1").await.unwrap();
        assert_eq!(ledger_repo.balance("T1", "EUR"), 2500);

        // Re-delivery of the same webhook is a no-op, not a double credit.
        ingress.complete_prepaid_topup("T1", "tp1").await.unwrap();
        assert_eq!(ledger_repo.balance("T1", "EUR"), 2500);
    }

    #[tokio::test]
    async fn tenant_mismatch_is_rejected() {
        let (ingress, _repo, ledger_repo) = build();
        ledger_repo.seed_pending_topup("tp2", "T2", 500, "EUR");
        let err = ingress.complete_prepaid_topup("T1", "tp2").await.unwrap_err();
        assert!(matches!(err, WebhookError::TenantMismatch));
    }
}
