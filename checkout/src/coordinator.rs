//! CheckoutCoordinator (§4.5): dispatches checkout creation to the
//! requested provider adapter.

use std::sync::Arc;

use crate::provider::{CheckoutProvider, CheckoutProviderError, CheckoutRequest, CheckoutSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentProvider {
    Stripe,
    Mollie,
}

pub struct CheckoutCoordinator {
    stripe: Option<Arc<dyn CheckoutProvider>>,
    mollie: Option<Arc<dyn CheckoutProvider>>,
}

impl CheckoutCoordinator {
    pub fn new(stripe: Option<Arc<dyn CheckoutProvider>>, mollie: Option<Arc<dyn CheckoutProvider>>) -> Self {
        Self { stripe, mollie }
    }

    pub async fn create_checkout(
        &self,
        provider: PaymentProvider,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, CheckoutProviderError> {
        let adapter = match provider {
            PaymentProvider::Stripe => self.stripe.as_ref(),
            PaymentProvider::Mollie => self.mollie.as_ref(),
        };
        adapter.ok_or(CheckoutProviderError::NotConfigured)?.create_checkout(request).await
    }
}
