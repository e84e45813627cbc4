//! Transactional prepaid-balance ledger: the single owner of mutations to
//! `prepaid_balances`, `balance_transactions`, `invoices` and
//! `tenant_subscriptions.status`.

pub mod collaborators;
pub mod invoicing;
pub mod ledger;
pub mod repo;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use collaborators::{LoggingNotifier, LoggingSessionManager, LoggingTenantCache, Notifier, SessionManager, TenantCache};
pub use invoicing::{InvoiceGenerator, InvoiceRepository, PgInvoiceRepository};
pub use ledger::{ApplyOutcome, Ledger};
pub use repo::{LedgerRepository, PgLedgerRepository, PrepaidTopupOutcome};

/// Embedded schema migrations (`ledger/migrations/`), run by the daemon's
/// composition root at startup via `MIGRATOR.run(&pool)`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();
