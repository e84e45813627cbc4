//! Process configuration (§6 "Configuration (recognised options)"),
//! following the teacher's `ta` CLI's `clap::Parser` convention rather than
//! the node daemon's hand-rolled env-toggle style.

use clap::Parser;
use log::LevelFilter;

#[derive(Parser, Debug)]
#[command(name = "purser-daemon", about = "Billing ledger & settlement engine", version)]
pub struct Config {
    /// Postgres connection string.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Address the HTTP API binds to.
    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0:8088")]
    pub bind_address: String,

    /// actix-web worker thread count; 0 lets actix pick a sensible default.
    #[arg(long, env = "HTTP_WORKERS", default_value_t = 0)]
    pub http_workers: usize,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LevelFilter,

    #[arg(long, env = "STRIPE_SECRET_KEY")]
    pub stripe_secret_key: Option<String>,

    #[arg(long, env = "STRIPE_WEBHOOK_SECRET")]
    pub stripe_webhook_secret: Option<String>,

    #[arg(long, env = "MOLLIE_API_KEY")]
    pub mollie_api_key: Option<String>,

    /// Hex-encoded secp256k1 private key for the gas wallet that submits
    /// `transferWithAuthorization` on the tenant's behalf (§4.7).
    #[arg(long, env = "X402_GAS_WALLET_PRIVKEY")]
    pub x402_gas_wallet_privkey: Option<String>,

    #[arg(long, env = "X402_INCLUDE_TESTNETS", default_value_t = false)]
    pub x402_include_testnets: bool,

    #[arg(long, env = "X402_RECOVERY_WINDOW_HOURS", default_value_t = purser_common::config::DEFAULT_X402_RECOVERY_WINDOW_HOURS)]
    pub x402_recovery_window_hours: u64,

    #[arg(long, env = "X402_REORG_DEPTH_BLOCKS", default_value_t = purser_common::config::DEFAULT_X402_REORG_DEPTH_BLOCKS)]
    pub x402_reorg_depth_blocks: u64,

    #[arg(long, env = "X402_RPC_ERROR_LIMIT", default_value_t = purser_common::config::DEFAULT_X402_RPC_ERROR_LIMIT)]
    pub x402_rpc_error_limit: u32,

    /// Extended public key the HD wallet derives tenant deposit addresses
    /// from. Required for crypto deposits and x402 to be usable (§4.2).
    #[arg(long, env = "HD_WALLET_XPUB")]
    pub hd_wallet_xpub: Option<String>,

    #[arg(long, env = "CRYPTO_INCLUDE_TESTNETS", default_value_t = false)]
    pub crypto_include_testnets: bool,

    /// Required together to emit EN 16931-shaped simplified invoices (§4.8);
    /// absent by default, in which case that rendering is skipped.
    #[arg(long, env = "SUPPLIER_NAME")]
    pub supplier_name: Option<String>,

    #[arg(long, env = "SUPPLIER_ADDRESS")]
    pub supplier_address: Option<String>,

    #[arg(long, env = "SUPPLIER_VAT_NUMBER")]
    pub supplier_vat_number: Option<String>,

    #[arg(long, env = "INVOICE_JOB_INTERVAL_SECS", default_value_t = 3600)]
    pub invoice_job_interval_secs: u64,
}

impl Config {
    pub fn supplier_details_configured(&self) -> bool {
        self.supplier_name.is_some() && self.supplier_address.is_some() && self.supplier_vat_number.is_some()
    }
}
