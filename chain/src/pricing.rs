//! Pricing auxiliaries (§4.8): ECB-sourced EUR/USD conversion with a
//! reader-writer-locked 24h cache, and the static EU VAT rate table.

use std::collections::HashMap;
use std::time::Duration;

use purser_common::config::EUR_RATE_CACHE_TTL_SECS;
use purser_common::PurserResult;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use tokio::time::Instant;

const FRANKFURTER_URL: &str = "https://api.frankfurter.app/latest?from=USD&to=EUR";

#[derive(Debug, Deserialize)]
struct FrankfurterResponse {
    rates: HashMap<String, f64>,
}

struct CachedRate {
    usd_to_eur: f64,
    fetched_at: Instant,
}

pub struct PricingService {
    http: Client,
    cache: RwLock<Option<CachedRate>>,
}

impl PricingService {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
            cache: RwLock::new(None),
        }
    }

    /// Converts a USDC-denominated amount in cents to EUR cents, using the
    /// cached USD/EUR rate. On refresh failure, returns the stale cached
    /// value if present; with an empty cache, propagates the error.
    pub async fn usdc_cents_to_eur_cents(&self, usd_cents: i64) -> PurserResult<i64> {
        let rate = self.rate().await?;
        Ok((usd_cents as f64 * rate).round() as i64)
    }

    async fn rate(&self) -> PurserResult<f64> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < Duration::from_secs(EUR_RATE_CACHE_TTL_SECS) {
                    return Ok(cached.usd_to_eur);
                }
            }
        }

        match self.fetch_rate().await {
            Ok(rate) => {
                let mut cache = self.cache.write().await;
                *cache = Some(CachedRate {
                    usd_to_eur: rate,
                    fetched_at: Instant::now(),
                });
                Ok(rate)
            }
            Err(e) => {
                let cache = self.cache.read().await;
                if let Some(cached) = cache.as_ref() {
                    Ok(cached.usd_to_eur)
                } else {
                    Err(purser_common::PurserError::transient("eur_rate", e))
                }
            }
        }
    }

    async fn fetch_rate(&self) -> Result<f64, anyhow::Error> {
        let response: FrankfurterResponse = self.http.get(FRANKFURTER_URL).send().await?.json().await?;
        response
            .rates
            .get("EUR")
            .copied()
            .ok_or_else(|| anyhow::anyhow!("frankfurter response missing EUR rate"))
    }
}

impl Default for PricingService {
    fn default() -> Self {
        Self::new()
    }
}

/// EU VAT rates in basis points, by ISO-3166 alpha-2 country code. Non-EU
/// countries are export-exempt (0 bps) and not listed here.
const EU_VAT_RATES_BPS: &[(&str, u32)] = &[
    ("AT", 2000), ("BE", 2100), ("BG", 2000), ("HR", 2500), ("CY", 1900),
    ("CZ", 2100), ("DK", 2500), ("EE", 2200), ("FI", 2550), ("FR", 2000),
    ("DE", 1900), ("GR", 2400), ("HU", 2700), ("IE", 2300), ("IT", 2200),
    ("LV", 2100), ("LT", 2100), ("LU", 1700), ("MT", 1800), ("NL", 2100),
    ("PL", 2300), ("PT", 2300), ("RO", 1900), ("SK", 2000), ("SI", 2200),
    ("ES", 2100), ("SE", 2500),
];

pub fn is_eu_country(country: &str) -> bool {
    EU_VAT_RATES_BPS.iter().any(|(code, _)| *code == country)
}

pub fn vat_rate_bps(country: &str) -> u32 {
    EU_VAT_RATES_BPS
        .iter()
        .find(|(code, _)| *code == country)
        .map(|(_, bps)| *bps)
        .unwrap_or(0)
}

/// Validates an EU VAT ID's shape: a 2-letter EU country prefix followed by
/// 8-12 alphanumerics. Does not call VIES; format validation only.
pub fn is_valid_eu_vat_id(vat_id: &str) -> bool {
    let vat_id = vat_id.trim().to_uppercase();
    if vat_id.len() < 10 || vat_id.len() > 14 {
        return false;
    }
    let (prefix, digits) = vat_id.split_at(2);
    is_eu_country(prefix) && digits.len() >= 8 && digits.len() <= 12 && digits.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Computes the VAT rate basis points to apply, given a tenant's billing
/// country and optional VAT ID (§4.8).
pub fn resolve_vat_bps(billing_country: Option<&str>, vat_id: Option<&str>, geoip_country: Option<&str>) -> u32 {
    if let Some(vat_id) = vat_id {
        if is_valid_eu_vat_id(vat_id) {
            return 0; // B2B reverse charge.
        }
    }
    let country = billing_country.or(geoip_country).unwrap_or("");
    vat_rate_bps(country)
}

#[derive(Debug, Clone, Default)]
pub struct TenantBillingDetails {
    pub name: Option<String>,
    pub address: Option<String>,
    pub country: Option<String>,
}

impl TenantBillingDetails {
    pub fn is_complete(&self) -> bool {
        self.name.as_ref().is_some_and(|s| !s.is_empty())
            && self.address.as_ref().is_some_and(|s| !s.is_empty())
            && self.country.as_ref().is_some_and(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_eu_vat_id_is_reverse_charge() {
        assert_eq!(resolve_vat_bps(Some("DE"), Some("DE123456789"), None), 0);
    }

    #[test]
    fn invalid_prefix_falls_back_to_country_rate() {
        assert_eq!(resolve_vat_bps(Some("DE"), Some("XX123456789"), None), vat_rate_bps("DE"));
    }

    #[test]
    fn non_eu_country_is_exempt() {
        assert_eq!(resolve_vat_bps(Some("US"), None, None), 0);
    }

    #[test]
    fn falls_back_to_geoip_without_billing_country() {
        assert_eq!(resolve_vat_bps(None, None, Some("FR")), vat_rate_bps("FR"));
    }
}
