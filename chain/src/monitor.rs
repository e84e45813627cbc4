//! CryptoMonitor (§4.4): polls block explorers for per-tenant deposit
//! addresses every 10 seconds and credits matching transfers to the ledger.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use purser_common::config::CRYPTO_MONITOR_INTERVAL_SECS;
use purser_common::event::EventBus;
use purser_common::model::{BillingEvent, WalletPurpose};
use purser_ledger::Ledger;
use tokio::time::interval;

use crate::deposit_repo::{CryptoWalletRepository, PollableWallet};
use crate::explorer::ExplorerClient;
use crate::network::NetworkRegistry;

/// 1% tolerance band, each side, for matching a deposit against the
/// expected amount (§4.4 step 5).
const TOLERANCE: f64 = purser_common::config::CRYPTO_DEPOSIT_TOLERANCE;

pub struct CryptoMonitor {
    repo: Arc<dyn CryptoWalletRepository>,
    ledger: Arc<Ledger>,
    event_bus: Arc<dyn EventBus>,
    explorers: HashMap<String, ExplorerClient>,
    running: Arc<AtomicBool>,
}

impl CryptoMonitor {
    pub fn new(
        repo: Arc<dyn CryptoWalletRepository>,
        ledger: Arc<Ledger>,
        event_bus: Arc<dyn EventBus>,
        explorers: HashMap<String, ExplorerClient>,
    ) -> Self {
        Self {
            repo,
            ledger,
            event_bus,
            explorers,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Runs the poll loop until [`CryptoMonitor::stop`] is called or the
    /// process shuts down. Mirrors the teacher's discovery server: an
    /// `AtomicBool` flag checked each tick, driven by `tokio::select!`.
    pub async fn run(&self) {
        self.running.store(true, Ordering::SeqCst);
        let mut ticker = interval(Duration::from_secs(CRYPTO_MONITOR_INTERVAL_SECS));
        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        error!("crypto monitor pass failed: {e}");
                    }
                }
            }
        }
    }

    pub async fn poll_once(&self) -> anyhow::Result<()> {
        let wallets = self.repo.pollable_wallets().await?;
        for pollable in wallets {
            if let Err(e) = self.check_wallet(&pollable).await {
                warn!("wallet {} scan failed: {e}", pollable.wallet.id);
            }
        }
        Ok(())
    }

    async fn check_wallet(&self, pollable: &PollableWallet) -> anyhow::Result<()> {
        let wallet = &pollable.wallet;
        let Some(network) = NetworkRegistry::by_name(&wallet.network) else {
            return Ok(());
        };
        let Some(explorer) = self.explorers.get(&wallet.network) else {
            return Ok(());
        };
        let Some(expected_cents) = pollable.expected_amount_cents() else {
            return Ok(());
        };
        let expected_native = expected_cents as f64 / 100.0;

        let transactions = match wallet.asset {
            purser_common::model::Asset::Eth => explorer.native_transfers(&wallet.wallet_address).await?,
            purser_common::model::Asset::Usdc => {
                explorer.token_transfers(&wallet.wallet_address, network.usdc_contract).await?
            }
            purser_common::model::Asset::Lpt => {
                let Some(lpt) = network.lpt_contract else { return Ok(()) };
                explorer.token_transfers(&wallet.wallet_address, lpt).await?
            }
        };

        let decimals = wallet.asset.decimals();
        let divisor = 10f64.powi(decimals as i32);

        for tx in transactions {
            if !tx.to.eq_ignore_ascii_case(&wallet.wallet_address) {
                continue;
            }
            let amount = match tx.value.parse::<f64>() {
                Ok(v) => v / divisor,
                Err(_) => continue,
            };
            if amount == 0.0 {
                continue;
            }
            let lower = expected_native * (1.0 - TOLERANCE);
            let upper = expected_native * (1.0 + TOLERANCE);
            if amount < lower || amount > upper {
                continue;
            }
            if tx.confirmations < network.confirmations {
                continue;
            }

            self.credit_deposit(pollable, &tx.hash, expected_cents).await?;
            break;
        }
        Ok(())
    }

    async fn credit_deposit(&self, pollable: &PollableWallet, tx_hash: &str, amount_cents: i64) -> anyhow::Result<()> {
        let wallet = &pollable.wallet;
        match wallet.purpose {
            WalletPurpose::Invoice => {
                let invoice_id = wallet
                    .invoice_id
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("invoice-purpose wallet missing invoice_id"))?;
                let applied = self
                    .ledger
                    .mark_invoice_paid(&wallet.tenant_id, invoice_id, "crypto", tx_hash, amount_cents)
                    .await?;
                if !applied {
                    return Ok(());
                }
            }
            WalletPurpose::Prepaid => {
                self.ledger
                    .credit(&wallet.tenant_id, "EUR", amount_cents, "crypto_deposit", tx_hash, "crypto deposit")
                    .await?;
            }
        }

        self.repo.mark_used(&wallet.id).await?;
        self.event_bus
            .publish(
                BillingEvent::new("crypto_deposit.credited", &wallet.tenant_id)
                    .with_resource("crypto_wallet", &wallet.id),
            )
            .await;
        info!("credited crypto deposit {tx_hash} for tenant {}", wallet.tenant_id);
        Ok(())
    }
}
