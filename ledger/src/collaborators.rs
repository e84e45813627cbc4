//! Out-of-scope external collaborators the Ledger calls on suspension and
//! payment events (§1 "Out of scope"). These are thin seams — the daemon's
//! composition root wires a real session-manager/tenant-cache/notifier
//! client; until then a logging stub keeps the ledger runnable standalone.

use async_trait::async_trait;
use log::info;

#[async_trait]
pub trait SessionManager: Send + Sync {
    async fn terminate_sessions(&self, tenant_id: &str, reason: &str);
}

#[async_trait]
pub trait TenantCache: Send + Sync {
    async fn invalidate(&self, tenant_id: &str);
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_suspension(&self, tenant_id: &str);
    async fn notify_payment_success(&self, tenant_id: &str, invoice_id: &str);
}

pub struct LoggingSessionManager;

#[async_trait]
impl SessionManager for LoggingSessionManager {
    async fn terminate_sessions(&self, tenant_id: &str, reason: &str) {
        info!("terminating sessions for tenant {tenant_id}: {reason}");
    }
}

pub struct LoggingTenantCache;

#[async_trait]
impl TenantCache for LoggingTenantCache {
    async fn invalidate(&self, tenant_id: &str) {
        info!("invalidating tenant cache entry for {tenant_id}");
    }
}

pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify_suspension(&self, tenant_id: &str) {
        info!("sending suspension notice to tenant {tenant_id}");
    }

    async fn notify_payment_success(&self, tenant_id: &str, invoice_id: &str) {
        info!("sending payment-success notice to tenant {tenant_id} for invoice {invoice_id}");
    }
}
