//! Shared default constants for settings recognised in §6 of the
//! specification. Components still read the effective value from their own
//! `clap::Parser` config struct; these are the documented defaults.

/// `X402_RECOVERY_WINDOW_HOURS` default.
pub const DEFAULT_X402_RECOVERY_WINDOW_HOURS: u64 = 168;
/// `X402_REORG_DEPTH_BLOCKS` default.
pub const DEFAULT_X402_REORG_DEPTH_BLOCKS: u64 = 50;
/// `X402_RPC_ERROR_LIMIT` default.
pub const DEFAULT_X402_RPC_ERROR_LIMIT: u32 = 5;

/// Default RPC call deadline (§5).
pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 10;
/// Default outbound provider-call deadline (§5).
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 30;

/// CryptoMonitor poll interval (§4.4).
pub const CRYPTO_MONITOR_INTERVAL_SECS: u64 = 10;
/// X402Reconciler poll interval (§4.7).
pub const X402_RECONCILER_INTERVAL_SECS: u64 = 30;

/// Tolerance band for matching crypto deposits against expected amounts (§4.4).
pub const CRYPTO_DEPOSIT_TOLERANCE: f64 = 0.01;

/// EUR/USD rate cache TTL (§4.8).
pub const EUR_RATE_CACHE_TTL_SECS: u64 = 24 * 60 * 60;

/// EUR threshold above which incomplete billing details block an x402 auth-only payment (§4.6).
pub const X402_BILLING_DETAILS_THRESHOLD_EUR_CENTS: i64 = 100_00;
