//! Periodic invoice generation and overdue sweeping, following the same
//! `AtomicBool` + `tokio::select!` cooperative-task idiom as
//! `CryptoMonitor`/`X402Reconciler`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::error;
use purser_ledger::InvoiceGenerator;
use tokio::time::interval;

pub struct InvoiceJobs {
    generator: Arc<InvoiceGenerator>,
    interval_secs: u64,
    running: Arc<AtomicBool>,
}

impl InvoiceJobs {
    pub fn new(generator: Arc<InvoiceGenerator>, interval_secs: u64) -> Self {
        Self {
            generator,
            interval_secs,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub async fn run(&self) {
        self.running.store(true, Ordering::SeqCst);
        let mut ticker = interval(Duration::from_secs(self.interval_secs));
        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!("invoice job pass failed: {e}");
                    }
                }
            }
        }
    }

    async fn run_once(&self) -> anyhow::Result<()> {
        let now = Utc::now();
        let created = self.generator.generate_due_invoices(now).await?;
        let overdue = self.generator.sweep_overdue(now).await?;
        if created > 0 || overdue > 0 {
            log::info!("invoice job: created {created} invoices, marked {overdue} overdue");
        }
        Ok(())
    }
}
