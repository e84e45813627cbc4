//! Block-explorer client (Etherscan/Basescan/Arbiscan) for the crypto
//! deposit monitor (§4.4 step 4).

use std::time::Duration;

use purser_common::config::DEFAULT_PROVIDER_TIMEOUT_SECS;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExplorerError {
    #[error("explorer transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("explorer returned an error status: {0}")]
    ApiError(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExplorerTransaction {
    pub hash: String,
    pub from: String,
    pub to: String,
    /// Base-unit value as a decimal string (the explorer API's own encoding).
    pub value: String,
    #[serde(default, deserialize_with = "deserialize_str_as_u64")]
    pub confirmations: u64,
    #[serde(rename = "blockNumber", default, deserialize_with = "deserialize_str_as_u64")]
    pub block_number: u64,
    #[serde(rename = "timeStamp", default, deserialize_with = "deserialize_str_as_u64")]
    pub time_stamp: u64,
}

fn deserialize_str_as_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize)]
struct ExplorerEnvelope {
    status: String,
    message: String,
    result: serde_json::Value,
}

pub struct ExplorerClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl ExplorerClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS))
            .build()
            .expect("reqwest client builds with default TLS backend");
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Native-asset transfer history (`action=txlist`).
    pub async fn native_transfers(&self, address: &str) -> Result<Vec<ExplorerTransaction>, ExplorerError> {
        self.fetch("txlist", address, None).await
    }

    /// ERC-20 transfer history scoped to `contract_address` (`action=tokentx`).
    pub async fn token_transfers(
        &self,
        address: &str,
        contract_address: &str,
    ) -> Result<Vec<ExplorerTransaction>, ExplorerError> {
        self.fetch("tokentx", address, Some(contract_address)).await
    }

    async fn fetch(
        &self,
        action: &str,
        address: &str,
        contract_address: Option<&str>,
    ) -> Result<Vec<ExplorerTransaction>, ExplorerError> {
        let mut query = vec![
            ("module", "account"),
            ("action", action),
            ("address", address),
            ("sort", "desc"),
            ("apikey", self.api_key.as_str()),
        ];
        if let Some(contract) = contract_address {
            query.push(("contractaddress", contract));
        }

        let envelope: ExplorerEnvelope = self.http.get(&self.base_url).query(&query).send().await?.json().await?;

        // Etherscan-family APIs report "no transactions found" as status "0"
        // with an empty result array; that is not a transport failure.
        if envelope.status != "1" && envelope.message.to_lowercase() != "no transactions found" {
            return Err(ExplorerError::ApiError(envelope.message));
        }

        let transactions: Vec<ExplorerTransaction> = serde_json::from_value(envelope.result).unwrap_or_default();
        Ok(transactions)
    }
}
