//! Checkout session creation and payment-provider webhook ingress (§4.5,
//! §6). Collaborates with `purser-ledger` for all balance-owning mutations.

pub mod collaborators;
pub mod coordinator;
pub mod provider;
pub mod repo;
pub mod webhook;

pub use collaborators::{ClusterAccessGrantor, LoggingClusterAccessGrantor};
pub use coordinator::{CheckoutCoordinator, PaymentProvider};
pub use provider::{
    CheckoutProvider, CheckoutProviderError, CheckoutPurpose, CheckoutRequest, CheckoutSession, MollieClient,
    StripeClient,
};
pub use repo::{CheckoutRepository, PgCheckoutRepository};
pub use webhook::{WebhookError, WebhookIngress};
