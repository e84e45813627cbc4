//! EVM chain integrations: JSON-RPC and block-explorer clients, the crypto
//! deposit monitor (§4.4), and the x402 micropayment engine (§4.6, §4.7).

pub mod deposit_repo;
pub mod explorer;
pub mod monitor;
pub mod network;
pub mod pricing;
pub mod rpc;
pub mod signing;
pub mod x402;

pub use deposit_repo::{CryptoWalletRepository, PgCryptoWalletRepository, PollableWallet};
pub use explorer::ExplorerClient;
pub use monitor::CryptoMonitor;
pub use network::{NetworkConfig, NetworkRegistry};
pub use pricing::PricingService;
pub use rpc::EvmRpcClient;
