//! X402Reconciler (§4.7): a 30s cooperative task that drives pending
//! settlements to a terminal state, recovers from false-negative timeouts,
//! and watches confirmed settlements for reorgs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{error, info, warn};
use purser_common::config::{
    DEFAULT_X402_RECOVERY_WINDOW_HOURS, DEFAULT_X402_REORG_DEPTH_BLOCKS, DEFAULT_X402_RPC_ERROR_LIMIT,
    X402_RECONCILER_INTERVAL_SECS,
};
use purser_common::event::EventBus;
use purser_common::model::{BillingEvent, TransactionType};
use purser_ledger::Ledger;
use tokio::time::interval;

use crate::network::NetworkRegistry;
use crate::rpc::EvmRpcClient;
use crate::x402::nonce_repo::{NonceRecord, X402NonceRepository};

/// Pending settlements older than this with no receipt are presumed dropped
/// from the mempool (§4.7 pending pass).
const PENDING_TIMEOUT_SECS: i64 = 120;

pub struct X402Reconciler {
    nonce_repo: Arc<dyn X402NonceRepository>,
    ledger: Arc<Ledger>,
    event_bus: Arc<dyn EventBus>,
    rpc_clients: HashMap<String, EvmRpcClient>,
    recovery_window_hours: u64,
    reorg_depth_blocks: u64,
    rpc_error_limit: u32,
    running: Arc<AtomicBool>,
    consecutive_rpc_errors: AtomicU32,
}

impl X402Reconciler {
    pub fn new(
        nonce_repo: Arc<dyn X402NonceRepository>,
        ledger: Arc<Ledger>,
        event_bus: Arc<dyn EventBus>,
        rpc_clients: HashMap<String, EvmRpcClient>,
    ) -> Self {
        Self {
            nonce_repo,
            ledger,
            event_bus,
            rpc_clients,
            recovery_window_hours: DEFAULT_X402_RECOVERY_WINDOW_HOURS,
            reorg_depth_blocks: DEFAULT_X402_REORG_DEPTH_BLOCKS,
            rpc_error_limit: DEFAULT_X402_RPC_ERROR_LIMIT,
            running: Arc::new(AtomicBool::new(false)),
            consecutive_rpc_errors: AtomicU32::new(0),
        }
    }

    pub fn with_recovery_window_hours(mut self, hours: u64) -> Self {
        self.recovery_window_hours = hours;
        self
    }

    pub fn with_reorg_depth_blocks(mut self, blocks: u64) -> Self {
        self.reorg_depth_blocks = blocks;
        self
    }

    pub fn with_rpc_error_limit(mut self, limit: u32) -> Self {
        self.rpc_error_limit = limit;
        self
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub async fn run(&self) {
        self.running.store(true, Ordering::SeqCst);
        let mut ticker = interval(Duration::from_secs(X402_RECONCILER_INTERVAL_SECS));
        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.reconcile_once().await {
                        error!("x402 reconciler pass failed: {e}");
                    }
                }
            }
        }
    }

    pub async fn reconcile_once(&self) -> anyhow::Result<()> {
        self.pending_pass().await?;
        self.failed_timeouts_pass().await?;
        self.confirmed_reorg_pass().await?;
        Ok(())
    }

    async fn pending_pass(&self) -> anyhow::Result<()> {
        let records = self.nonce_repo.pending_older_than(15).await?;
        for record in records {
            let Some(rpc) = self.rpc_clients.get(&record.network) else { continue };
            let Some(network) = NetworkRegistry::by_name(&record.network) else { continue };

            let receipt = match rpc.eth_get_transaction_receipt(&record.tx_hash).await {
                Ok(r) => {
                    self.consecutive_rpc_errors.store(0, Ordering::SeqCst);
                    r
                }
                Err(e) => {
                    self.note_rpc_error(&record.network, &e.to_string()).await;
                    continue;
                }
            };

            match receipt {
                None => {
                    let age_secs = (Utc::now() - record.settled_at).num_seconds();
                    if age_secs > PENDING_TIMEOUT_SECS {
                        self.fail_and_reverse(&record, "timeout: no receipt after 2 minutes").await?;
                    }
                }
                Some(receipt) if !receipt.status => {
                    self.fail_and_reverse(&record, "reverted on-chain").await?;
                }
                Some(receipt) => {
                    let confirmations = match rpc.eth_block_number().await {
                        Ok(tip) => tip.saturating_sub(receipt.block_number) + 1,
                        Err(_) => 0,
                    };
                    if confirmations >= network.confirmations {
                        self.nonce_repo
                            .mark_confirmed(
                                &record.network,
                                &record.payer_address,
                                &record.nonce,
                                receipt.block_number as i64,
                                receipt.gas_used as i64,
                            )
                            .await?;
                        info!("x402 settlement {} confirmed for tenant {}", record.tx_hash, record.tenant_id);
                    }
                }
            }
        }
        Ok(())
    }

    async fn failed_timeouts_pass(&self) -> anyhow::Result<()> {
        let recovery_window_seconds = (self.recovery_window_hours * 3600) as i64;
        let records = self.nonce_repo.failed_timeouts_within(recovery_window_seconds).await?;
        for record in records {
            let Some(rpc) = self.rpc_clients.get(&record.network) else { continue };
            let Some(network) = NetworkRegistry::by_name(&record.network) else { continue };

            let receipt = match rpc.eth_get_transaction_receipt(&record.tx_hash).await {
                Ok(Some(r)) if r.status => r,
                _ => continue,
            };
            let confirmations = match rpc.eth_block_number().await {
                Ok(tip) => tip.saturating_sub(receipt.block_number) + 1,
                Err(_) => 0,
            };
            if confirmations < network.confirmations {
                continue;
            }

            let was_reversed = self
                .ledger
                .has_effect(&record.tenant_id, "x402_failed", &record.tx_hash, TransactionType::Reversal)
                .await?;
            if !was_reversed {
                warn!(
                    "x402 settlement {} for tenant {} confirmed after being marked failed without a prior reversal; skipping recovery credit",
                    record.tx_hash, record.tenant_id
                );
                self.event_bus
                    .publish(
                        BillingEvent::new("x402.accounting_anomaly", &record.tenant_id)
                            .with_resource("x402_nonce", &record.tx_hash),
                    )
                    .await;
                continue;
            }

            self.ledger
                .credit(
                    &record.tenant_id,
                    "EUR",
                    record.amount_cents,
                    "x402_payment_recovery",
                    &record.tx_hash,
                    "x402 settlement recovered after false-negative timeout",
                )
                .await?;
            self.nonce_repo
                .mark_confirmed(&record.network, &record.payer_address, &record.nonce, receipt.block_number as i64, receipt.gas_used as i64)
                .await?;
            info!("recovered x402 settlement {} for tenant {}", record.tx_hash, record.tenant_id);
        }
        Ok(())
    }

    async fn confirmed_reorg_pass(&self) -> anyhow::Result<()> {
        let records = self.nonce_repo.confirmed_within(3600).await?;
        for record in records {
            let Some(rpc) = self.rpc_clients.get(&record.network) else { continue };
            let Some(block_number) = record.block_number else { continue };

            let tip = match rpc.eth_block_number().await {
                Ok(tip) => tip,
                Err(e) => {
                    self.note_rpc_error(&record.network, &e.to_string()).await;
                    continue;
                }
            };
            if tip.saturating_sub(block_number as u64) < self.reorg_depth_blocks {
                continue;
            }

            let receipt = rpc.eth_get_transaction_receipt(&record.tx_hash).await.ok().flatten();
            let still_confirmed = receipt.as_ref().is_some_and(|r| r.status);
            if still_confirmed {
                continue;
            }

            self.fail_and_reverse(&record, "transaction reorged or missing").await?;
        }
        Ok(())
    }

    async fn fail_and_reverse(&self, record: &NonceRecord, reason: &str) -> anyhow::Result<()> {
        self.nonce_repo
            .mark_failed(&record.network, &record.payer_address, &record.nonce, reason)
            .await?;
        let had_credit = self
            .ledger
            .has_effect(&record.tenant_id, "x402_payment", &record.tx_hash, TransactionType::Topup)
            .await?;
        if had_credit {
            self.ledger
                .debit(
                    &record.tenant_id,
                    "EUR",
                    record.amount_cents,
                    TransactionType::Reversal,
                    "x402_failed",
                    &record.tx_hash,
                    &format!("x402 settlement reversed: {reason}"),
                )
                .await?;
        }
        self.event_bus
            .publish(
                BillingEvent::new("x402.settlement_failed", &record.tenant_id)
                    .with_resource("x402_nonce", &record.tx_hash),
            )
            .await;
        warn!("x402 settlement {} failed for tenant {}: {reason}", record.tx_hash, record.tenant_id);
        Ok(())
    }

    async fn note_rpc_error(&self, network: &str, message: &str) {
        let count = self.consecutive_rpc_errors.fetch_add(1, Ordering::SeqCst) + 1;
        warn!("x402 reconciler rpc call failed on {network}: {message} ({count} consecutive)");
        if count >= self.rpc_error_limit {
            error!("x402 reconciler rpc error limit reached on {network}; raising operator alert");
            self.event_bus
                .publish(BillingEvent::new("x402.rpc_degraded", network))
                .await;
        }
    }
}
