//! Composition root: wires every collaborator the HTTP handlers and
//! background jobs need, failing closed at startup on missing hard
//! dependencies per §6 "Configuration (recognised options)".

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context as _};
use libsecp256k1::SecretKey;
use purser_chain::{CryptoMonitor, CryptoWalletRepository, EvmRpcClient, ExplorerClient, NetworkRegistry, PgCryptoWalletRepository, PricingService};
use purser_checkout::{
    CheckoutCoordinator, CheckoutProvider, CheckoutRepository, LoggingClusterAccessGrantor, MollieClient,
    PgCheckoutRepository, StripeClient, WebhookIngress,
};
use purser_common::crypto::EvmAddress;
use purser_common::event::{EventBus, InProcessEventBus};
use purser_ledger::{InvoiceGenerator, Ledger, LoggingNotifier, LoggingSessionManager, LoggingTenantCache, PgInvoiceRepository, PgLedgerRepository};
use purser_wallet::{HdWallet, PgHdWalletStore};
use sqlx::PgPool;

use crate::config::Config;

pub struct AppContext {
    pub ledger: Arc<Ledger>,
    pub checkout: Arc<CheckoutCoordinator>,
    pub webhook: Arc<WebhookIngress>,
    pub invoice_generator: Arc<InvoiceGenerator>,
    pub crypto_monitor: Option<Arc<CryptoMonitor>>,
    pub x402_verifier: Option<Arc<purser_chain::x402::verifier::X402Verifier>>,
    pub x402_settler: Option<Arc<purser_chain::x402::settler::X402Settler>>,
    pub x402_reconciler: Option<Arc<purser_chain::x402::reconciler::X402Reconciler>>,
    pub pricing: Arc<PricingService>,
}

impl AppContext {
    pub async fn bootstrap(config: &Config) -> anyhow::Result<Self> {
        let pool = PgPool::connect(&config.database_url).await.context("connecting to postgres")?;
        purser_ledger::MIGRATOR.run(&pool).await.context("running schema migrations")?;

        let event_bus: Arc<dyn EventBus> = Arc::new(InProcessEventBus::default());
        let ledger_repo = Arc::new(PgLedgerRepository::new(pool.clone()));
        let ledger = Arc::new(Ledger::new(
            ledger_repo,
            event_bus.clone(),
            Arc::new(LoggingSessionManager),
            Arc::new(LoggingTenantCache),
            Arc::new(LoggingNotifier),
        ));

        let pricing = Arc::new(PricingService::new());

        let invoice_repo = Arc::new(PgInvoiceRepository::new(pool.clone()));
        let invoice_generator = Arc::new(InvoiceGenerator::new(invoice_repo, event_bus.clone()));

        let checkout_repo: Arc<dyn CheckoutRepository> = Arc::new(PgCheckoutRepository::new(pool.clone()));
        let stripe: Option<Arc<dyn CheckoutProvider>> = config
            .stripe_secret_key
            .as_ref()
            .map(|key| Arc::new(StripeClient::new(key.clone())) as Arc<dyn CheckoutProvider>);
        let mollie_client = config.mollie_api_key.as_ref().map(|key| Arc::new(MollieClient::new(key.clone())));
        let mollie: Option<Arc<dyn CheckoutProvider>> = mollie_client
            .clone()
            .map(|client| client as Arc<dyn CheckoutProvider>);
        let checkout = Arc::new(CheckoutCoordinator::new(stripe, mollie));

        let webhook = Arc::new(WebhookIngress::new(
            config.stripe_webhook_secret.as_ref().map(|s| s.clone().into_bytes()),
            mollie_client,
            checkout_repo,
            ledger.clone(),
            Arc::new(LoggingClusterAccessGrantor),
        ));

        let (crypto_monitor, x402_verifier, x402_settler, x402_reconciler) =
            Self::bootstrap_chain(config, &pool, &ledger, &pricing, event_bus.clone()).await?;

        Ok(Self {
            ledger,
            checkout,
            webhook,
            invoice_generator,
            crypto_monitor,
            x402_verifier,
            x402_settler,
            x402_reconciler,
            pricing,
        })
    }

    /// Wires the HD wallet, per-network RPC/explorer clients, and the x402
    /// pipeline. Everything here is soft-disabled (logs a warning and
    /// returns `None`) when `HD_WALLET_XPUB` is absent, since a daemon with
    /// only fiat checkout configured is a legitimate deployment (§1
    /// Non-goals list x402/crypto as independently optional).
    #[allow(clippy::type_complexity)]
    async fn bootstrap_chain(
        config: &Config,
        pool: &PgPool,
        ledger: &Arc<Ledger>,
        pricing: &Arc<PricingService>,
        event_bus: Arc<dyn EventBus>,
    ) -> anyhow::Result<(
        Option<Arc<CryptoMonitor>>,
        Option<Arc<purser_chain::x402::verifier::X402Verifier>>,
        Option<Arc<purser_chain::x402::settler::X402Settler>>,
        Option<Arc<purser_chain::x402::reconciler::X402Reconciler>>,
    )> {
        let Some(xpub) = config.hd_wallet_xpub.as_ref() else {
            log::warn!("HD_WALLET_XPUB not configured; crypto deposits and x402 are disabled");
            return Ok((None, None, None, None));
        };

        let store = PgHdWalletStore::new(pool.clone());
        let hd_wallet = HdWallet::new(xpub, store).context("parsing HD_WALLET_XPUB")?;
        let platform_address =
            hd_wallet.platform_address().map_err(|e| anyhow::anyhow!("deriving platform address: {e}"))?;

        let deposit_networks = NetworkRegistry::deposit_networks(config.crypto_include_testnets);
        let mut explorers = HashMap::new();
        let mut rpc_clients: HashMap<String, EvmRpcClient> = HashMap::new();
        for network in &deposit_networks {
            let Ok(rpc_endpoint) = std::env::var(network.rpc_endpoint_env_var) else {
                log::warn!("{} not set; skipping network {}", network.rpc_endpoint_env_var, network.name);
                continue;
            };
            let Ok(explorer_key) = std::env::var(network.explorer_api_env_var) else {
                log::warn!("{} not set; skipping network {}", network.explorer_api_env_var, network.name);
                continue;
            };
            rpc_clients.insert(network.name.to_string(), EvmRpcClient::new(rpc_endpoint));
            explorers.insert(network.name.to_string(), ExplorerClient::new(network.explorer_api_url, explorer_key));
        }

        let crypto_wallet_repo: Arc<dyn CryptoWalletRepository> = Arc::new(PgCryptoWalletRepository::new(pool.clone()));
        let crypto_monitor = Arc::new(CryptoMonitor::new(crypto_wallet_repo, ledger.clone(), event_bus.clone(), explorers));

        let nonce_repo: Arc<dyn purser_chain::x402::nonce_repo::X402NonceRepository> =
            Arc::new(purser_chain::x402::nonce_repo::PgX402NonceRepository::new(pool.clone()));

        let x402_rpc_clients: HashMap<String, EvmRpcClient> = NetworkRegistry::x402_networks(config.x402_include_testnets)
            .into_iter()
            .filter_map(|n| std::env::var(n.rpc_endpoint_env_var).ok().map(|endpoint| (n.name.to_string(), EvmRpcClient::new(endpoint))))
            .collect();

        let verifier = Arc::new(purser_chain::x402::verifier::X402Verifier::new(
            nonce_repo.clone(),
            pricing.clone(),
            platform_address,
            config.x402_include_testnets,
            x402_rpc_clients.clone(),
        ));

        let Some(gas_key_hex) = config.x402_gas_wallet_privkey.as_ref() else {
            log::warn!("X402_GAS_WALLET_PRIVKEY not configured; x402 settlement is disabled (verification only)");
            let reconciler = Arc::new(purser_chain::x402::reconciler::X402Reconciler::new(
                nonce_repo,
                ledger.clone(),
                event_bus,
                x402_rpc_clients,
            ));
            return Ok((Some(crypto_monitor), Some(verifier), None, Some(reconciler)));
        };
        let gas_key_bytes = hex::decode(gas_key_hex.trim_start_matches("0x")).context("decoding X402_GAS_WALLET_PRIVKEY")?;
        let gas_wallet_key = SecretKey::parse_slice(&gas_key_bytes).context("parsing X402_GAS_WALLET_PRIVKEY")?;
        let gas_wallet_address = derive_gas_wallet_address(&gas_wallet_key)?;

        let settler = Arc::new(purser_chain::x402::settler::X402Settler::new(
            verifier.clone(),
            nonce_repo.clone(),
            ledger.clone(),
            pricing.clone(),
            Arc::new(LoggingTenantCache),
            x402_rpc_clients.clone(),
            gas_wallet_key,
            gas_wallet_address,
        ));

        let reconciler = Arc::new(
            purser_chain::x402::reconciler::X402Reconciler::new(nonce_repo, ledger.clone(), event_bus, x402_rpc_clients)
                .with_recovery_window_hours(config.x402_recovery_window_hours)
                .with_reorg_depth_blocks(config.x402_reorg_depth_blocks)
                .with_rpc_error_limit(config.x402_rpc_error_limit),
        );

        Ok((Some(crypto_monitor), Some(verifier), Some(settler), Some(reconciler)))
    }

    pub fn require_supplier_details(config: &Config) -> anyhow::Result<()> {
        if !config.supplier_details_configured()
            && (config.supplier_name.is_some() || config.supplier_address.is_some() || config.supplier_vat_number.is_some())
        {
            bail!("SUPPLIER_NAME, SUPPLIER_ADDRESS and SUPPLIER_VAT_NUMBER must all be set together, or not at all");
        }
        Ok(())
    }
}

fn derive_gas_wallet_address(key: &SecretKey) -> anyhow::Result<EvmAddress> {
    let public = libsecp256k1::PublicKey::from_secret_key(key);
    Ok(EvmAddress::from_uncompressed_pubkey(&public.serialize()))
}
