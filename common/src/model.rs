//! Domain entities, ported from the data model in §3 of the specification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default suspension threshold, in cents: below this a prepaid tenant is
/// suspended. Negative because it represents a debt ceiling.
pub const SUSPENSION_CENTS: i64 = -1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    Suspended,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BillingModel {
    Prepaid,
    Postpaid,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BillingAddress {
    pub street: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    /// ISO-3166 alpha-2, normalized on write.
    pub country: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSubscription {
    pub tenant_id: String,
    pub tier_id: String,
    pub status: SubscriptionStatus,
    pub billing_model: BillingModel,
    pub billing_email: String,
    pub billing_address: BillingAddress,
    pub tax_id: Option<String>,
    pub next_billing_date: DateTime<Utc>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub x402_address_index: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BillingPeriod {
    Monthly,
    Yearly,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TierAllocations {
    pub bandwidth: i64,
    pub storage: i64,
    pub compute: i64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OverageRates {
    pub bandwidth_cents: i64,
    pub storage_cents: i64,
    pub compute_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingTier {
    pub id: String,
    pub tier_name: String,
    pub base_price_cents: i64,
    pub currency: String,
    pub billing_period: BillingPeriod,
    pub metering_enabled: bool,
    pub allocations: TierAllocations,
    pub overage_rates: OverageRates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Pending,
    Paid,
    Overdue,
    Void,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub tenant_id: String,
    pub base_amount_cents: i64,
    pub metered_amount_cents: i64,
    pub currency: String,
    pub status: InvoiceStatus,
    pub due_date: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub usage_details: serde_json::Value,
}

impl Invoice {
    pub fn total_amount_cents(&self) -> i64 {
        self.base_amount_cents + self.metered_amount_cents
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepaidBalance {
    pub tenant_id: String,
    pub currency: String,
    pub balance_cents: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Topup,
    Debit,
    Reversal,
    Adjustment,
    InvoiceCredit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceTransaction {
    pub id: i64,
    pub tenant_id: String,
    pub currency: String,
    pub amount_cents: i64,
    pub balance_after_cents: i64,
    pub transaction_type: TransactionType,
    pub reference_type: String,
    pub reference_id: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Asset {
    Eth,
    Usdc,
    Lpt,
}

impl Asset {
    /// Decimals for converting base units to native units.
    pub fn decimals(self) -> u32 {
        match self {
            Asset::Eth => 18,
            Asset::Usdc => 6,
            Asset::Lpt => 18,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WalletPurpose {
    Invoice,
    Prepaid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WalletStatus {
    Active,
    Used,
    Swept,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoWallet {
    pub id: String,
    pub tenant_id: String,
    pub purpose: WalletPurpose,
    pub invoice_id: Option<String>,
    pub expected_amount_cents: Option<i64>,
    pub asset: Asset,
    pub network: String,
    pub wallet_address: String,
    pub derivation_index: i64,
    pub status: WalletStatus,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NonceStatus {
    Pending,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct X402Nonce {
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
    pub gas_used: Option<i64>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TopupStatus {
    Pending,
    Completed,
    Failed,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTopup {
    pub id: String,
    pub tenant_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: TopupStatus,
    pub provider: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HdWalletState {
    pub xpub: String,
    pub network: String,
    pub next_index: i64,
}

/// Payload emitted to the downstream event bus on each billing state
/// transition (§6 "Inbound surfaces").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingEvent {
    pub event_type: String,
    pub tenant_id: String,
    pub resource_type: String,
    pub resource_id: String,
    pub timestamp: DateTime<Utc>,
    pub payment_id: Option<String>,
    pub invoice_id: Option<String>,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    pub provider: Option<String>,
    pub status: Option<String>,
}

impl BillingEvent {
    pub fn new(event_type: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            tenant_id: tenant_id.into(),
            resource_type: String::new(),
            resource_id: String::new(),
            timestamp: Utc::now(),
            payment_id: None,
            invoice_id: None,
            amount_cents: None,
            currency: None,
            provider: None,
            status: None,
        }
    }

    pub fn with_resource(mut self, resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        self.resource_type = resource_type.into();
        self.resource_id = resource_id.into();
        self
    }
}

/// Normalizes a country string to ISO-3166 alpha-2 upper case.
pub fn normalize_country(country: &str) -> String {
    country.trim().to_uppercase()
}
