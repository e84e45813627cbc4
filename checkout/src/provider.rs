//! Stripe and Mollie checkout-session adapters (§4.5 `createCheckout`).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckoutProviderError {
    #[error("provider transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider rejected the request: {0}")]
    Rejected(String),
    #[error("provider not configured")]
    NotConfigured,
}

/// The purpose carried in checkout metadata, routing webhook dispatch
/// without a database lookup (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutPurpose {
    Subscription,
    ClusterSubscription,
    Invoice,
    Prepaid,
}

impl CheckoutPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckoutPurpose::Subscription => "subscription",
            CheckoutPurpose::ClusterSubscription => "cluster_subscription",
            CheckoutPurpose::Invoice => "invoice",
            CheckoutPurpose::Prepaid => "prepaid",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub tenant_id: String,
    pub purpose: CheckoutPurpose,
    pub reference_id: String,
    pub cluster_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
}

impl CheckoutRequest {
    fn metadata(&self) -> HashMap<&'static str, String> {
        let mut metadata = HashMap::new();
        metadata.insert("purpose", self.purpose.as_str().to_string());
        metadata.insert("tenant_id", self.tenant_id.clone());
        metadata.insert("reference_id", self.reference_id.clone());
        if let Some(cluster_id) = &self.cluster_id {
            metadata.insert("cluster_id", cluster_id.clone());
        }
        metadata
    }
}

#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub checkout_url: String,
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait CheckoutProvider: Send + Sync {
    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<CheckoutSession, CheckoutProviderError>;
}

/// Stripe Checkout Sessions API client (REST, form-encoded; v82 per §6).
pub struct StripeClient {
    http: Client,
    secret_key: String,
}

impl StripeClient {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            secret_key: secret_key.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StripeSessionResponse {
    id: String,
    url: String,
    expires_at: i64,
}

#[async_trait]
impl CheckoutProvider for StripeClient {
    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<CheckoutSession, CheckoutProviderError> {
        let mode = match request.purpose {
            CheckoutPurpose::Subscription | CheckoutPurpose::ClusterSubscription => "subscription",
            CheckoutPurpose::Invoice | CheckoutPurpose::Prepaid => "payment",
        };

        let mut form: Vec<(String, String)> = vec![
            ("mode".to_string(), mode.to_string()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("line_items[0][price_data][currency]".to_string(), request.currency.to_lowercase()),
            ("line_items[0][price_data][unit_amount]".to_string(), request.amount_cents.to_string()),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                format!("{} ({})", request.purpose.as_str(), request.reference_id),
            ),
        ];
        for (key, value) in request.metadata() {
            form.push((format!("metadata[{key}]"), value));
        }

        let response = self
            .http
            .post("https://api.stripe.com/v1/checkout/sessions")
            .basic_auth(&self.secret_key, Option::<&str>::None)
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CheckoutProviderError::Rejected(format!("stripe {status}: {body}")));
        }

        let parsed: StripeSessionResponse = response.json().await?;
        Ok(CheckoutSession {
            checkout_url: parsed.url,
            session_id: parsed.id,
            expires_at: DateTime::from_timestamp(parsed.expires_at, 0).unwrap_or_else(Utc::now),
        })
    }
}

/// Mollie Payments API client. Mollie webhooks carry only a payment id, so
/// the server must call back into the API to confirm state (§4.5, §6).
pub struct MollieClient {
    http: Client,
    api_key: String,
}

impl MollieClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            api_key: api_key.into(),
        }
    }

    pub async fn get_payment(&self, payment_id: &str) -> Result<MolliePayment, CheckoutProviderError> {
        let response = self
            .http
            .get(format!("https://api.mollie.com/v2/payments/{payment_id}"))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            return Err(CheckoutProviderError::Rejected(format!("mollie {status} fetching {payment_id}")));
        }
        Ok(response.json().await?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MolliePayment {
    pub id: String,
    pub status: String,
    pub metadata: Option<HashMap<String, String>>,
    #[serde(rename = "amount")]
    pub amount: MollieAmount,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MollieAmount {
    pub currency: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
struct MolliePaymentCreated {
    id: String,
    #[serde(rename = "_links")]
    links: MollieLinks,
}

#[derive(Debug, Deserialize)]
struct MollieLinks {
    checkout: Option<MollieLink>,
}

#[derive(Debug, Deserialize)]
struct MollieLink {
    href: String,
}

#[async_trait]
impl CheckoutProvider for MollieClient {
    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<CheckoutSession, CheckoutProviderError> {
        let body = serde_json::json!({
            "amount": {
                "currency": request.currency,
                "value": format!("{:.2}", request.amount_cents as f64 / 100.0),
            },
            "description": format!("{} ({})", request.purpose.as_str(), request.reference_id),
            "redirectUrl": request.success_url,
            "metadata": request.metadata(),
        });

        let response = self
            .http
            .post("https://api.mollie.com/v2/payments")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CheckoutProviderError::Rejected(format!("mollie {status}: {body}")));
        }

        let parsed: MolliePaymentCreated = response.json().await?;
        let checkout_url = parsed
            .links
            .checkout
            .map(|l| l.href)
            .ok_or_else(|| CheckoutProviderError::Rejected("mollie response missing checkout link".to_string()))?;

        Ok(CheckoutSession {
            checkout_url,
            session_id: parsed.id,
            // Mollie payments expire server-side; 1h matches its default.
            expires_at: Utc::now() + chrono::Duration::hours(1),
        })
    }
}
